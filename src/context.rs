//! Per-request environment supplied by the transport.
//!
//! The dispatch engine never talks to the transport directly. Everything it
//! needs from the surrounding request (headers, request parameters, locale,
//! session identity and, for push streams, an event sink) is carried by a
//! [`RequestContext`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

/// Read-only view of the inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    headers: HashMap<String, String>,
    params: Map<String, Value>,
    locale: Option<String>,
    session: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header. Names are matched case-insensitively.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Add a request (query string or form) parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Identity of the client session, used for session-scoped locking.
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }
}

/// One event of a push stream.
///
/// Empty fields are omitted when the transport frames the event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl PushEvent {
    pub fn data(data: impl fmt::Display) -> Self {
        Self {
            data: Some(data.to_string()),
            ..Self::default()
        }
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_retry(mut self, retry: u64) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Interpret a handler's return value as the final event of a stream.
    ///
    /// Objects shaped like an event are used as is, strings and other values
    /// become the event data. `null` produces no event.
    pub fn from_result(value: Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(Self::data(s)),
            Value::Object(ref object)
                if !object.is_empty()
                    && object.keys().all(|k| {
                        matches!(k.as_str(), "id" | "event" | "data" | "retry" | "comment")
                    }) =>
            {
                serde_json::from_value(value.clone())
                    .ok()
                    .or_else(|| Some(Self::data(value)))
            }
            other => Some(Self::data(other)),
        }
    }
}

/// Destination of push-stream events. Framing is the transport's concern.
pub trait EventSink: Send + Sync {
    fn write(&self, event: PushEvent) -> Result<(), Error>;
}

impl EventSink for tokio::sync::mpsc::UnboundedSender<PushEvent> {
    fn write(&self, event: PushEvent) -> Result<(), Error> {
        self.send(event).map_err(|_| Error::StreamClosed)
    }
}

/// Handle given to push-stream handlers for emitting events.
#[derive(Clone)]
pub struct PushWriter {
    sink: Arc<dyn EventSink>,
}

impl PushWriter {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    pub fn write(&self, event: PushEvent) -> Result<(), Error> {
        self.sink.write(event)
    }

    /// Write `data` as a plain data event.
    pub fn write_data(&self, data: impl fmt::Display) -> Result<(), Error> {
        self.write(PushEvent::data(data))
    }
}

impl fmt::Debug for PushWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushWriter").finish_non_exhaustive()
    }
}
