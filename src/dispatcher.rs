//! Batch dispatch.
//!
//! This module provides the [`Dispatcher`], the entry point of the router. Call
//! [`Dispatcher::dispatch`] with the raw bytes of a router envelope to resolve,
//! bind and invoke every call it contains, or [`Dispatcher::call`] to get the
//! encoded response document directly. Poll, form post and push stream
//! requests have their own entry points.

use std::sync::Arc;

use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use crate::binder::bind;
use crate::config::{BatchExecutionPolicy, Configuration};
use crate::context::{EventSink, PushEvent, PushWriter, RequestContext};
use crate::error::Error;
use crate::invoker::{SessionLocks, invoke};
use crate::policy::{Classified, classify};
use crate::registry::{CallKind, MethodEntry, MethodRegistry};
use crate::result::{form_post_failure, wrap};

/// Wire discriminator of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    Rpc,
    Event,
    Exception,
}

/// Response to one call of a router envelope.
///
/// `tid`, `action` and `method` are echoed from the request even on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResponse {
    #[serde(rename = "type")]
    pub kind: ResponseKind,
    pub tid: Value,
    pub action: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl CallResponse {
    fn success(header: CallHeader, result: Value) -> Self {
        Self {
            kind: ResponseKind::Rpc,
            tid: header.tid,
            action: header.action,
            method: header.method,
            result: Some(result),
            message: None,
            trace: None,
        }
    }

    fn failure(header: CallHeader, classified: Classified) -> Self {
        Self {
            kind: ResponseKind::Exception,
            tid: header.tid,
            action: header.action,
            method: header.method,
            result: None,
            message: Some(classified.message),
            trace: classified.trace,
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind == ResponseKind::Rpc
    }
}

/// Responses of one envelope, in envelope order.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResponse {
    pub responses: Vec<CallResponse>,
    /// Set when the configuration or an invoked method asks for the response
    /// to be flushed incrementally.
    pub stream_response: bool,
}

impl BatchResponse {
    /// Encode the responses as a JSON array.
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string(&self.responses).map_err(Error::Serialization)
    }
}

/// Response to a poll request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollResponse {
    #[serde(rename = "type")]
    pub kind: ResponseKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

/// What the transport should do with a form post.
#[derive(Debug, Clone, PartialEq)]
pub enum FormPostOutcome {
    /// Hand the request to another endpoint of the host application.
    Forward(String),
    Response(CallResponse),
}

/// Correlation fields of one call.
#[derive(Debug, Clone)]
struct CallHeader {
    action: String,
    method: String,
    tid: Value,
}

impl CallHeader {
    fn from_call(call: &Value) -> Self {
        let field = |name: &str| {
            call.get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Self {
            action: field("action"),
            method: field("method"),
            tid: call.get("tid").cloned().unwrap_or(Value::Null),
        }
    }

    fn empty() -> Self {
        Self {
            action: String::new(),
            method: String::new(),
            tid: Value::Null,
        }
    }

    fn validate(&self) -> Result<(), Error> {
        if self.action.is_empty() || self.method.is_empty() {
            return Err(Error::InvalidCall(
                "call must name an action and a method".to_string(),
            ));
        }
        Ok(())
    }
}

struct Inner {
    registry: MethodRegistry,
    config: Configuration,
    locks: Arc<SessionLocks>,
}

/// Ext Direct router.
///
/// Cloning is cheap; all clones share the registry, the configuration and
/// the session lock table.
///
/// # Example
///
/// ```
/// use ext_direct::{
///     CallKind, Configuration, Dispatcher, MethodDescriptor, MethodRegistry, ParameterSpec,
///     RequestContext, TypeDesc,
/// };
///
/// let mut registry = MethodRegistry::new();
/// registry.register(
///     MethodDescriptor::new("calc", "add", CallKind::SimplePositional)
///         .param(ParameterSpec::positional(TypeDesc::Int))
///         .param(ParameterSpec::positional(TypeDesc::Int)),
///     |args| async move { Ok(args.get::<i64>(0)? + args.get::<i64>(1)?) },
/// )?;
///
/// let dispatcher = Dispatcher::new(registry, Configuration::default());
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let body = r#"{"action":"calc","method":"add","type":"rpc","tid":1,"data":[3,4]}"#;
/// let response = dispatcher.call(body, &RequestContext::new()).await?;
/// assert_eq!(response, r#"[{"type":"rpc","tid":1,"action":"calc","method":"add","result":7}]"#);
/// # Ok::<(), ext_direct::Error>(())
/// # })?;
/// # Ok::<(), ext_direct::Error>(())
/// ```
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(registry: MethodRegistry, config: Configuration) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                config,
                locks: Arc::new(SessionLocks::new()),
            }),
        }
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &Configuration {
        &self.inner.config
    }

    /// Process a router envelope and return the encoded response array.
    ///
    /// Only a response that cannot be encoded is reported as an error; every
    /// other failure becomes an `exception` element of the array.
    pub async fn call(&self, body: &str, ctx: &RequestContext) -> Result<String, Error> {
        self.dispatch(body.as_bytes(), ctx).await.to_json()
    }

    /// Process a router envelope.
    ///
    /// A JSON object is a batch of one, a JSON array a batch of many. The
    /// result always holds one response per call, in envelope order.
    pub async fn dispatch(&self, body: &[u8], ctx: &RequestContext) -> BatchResponse {
        let calls = match serde_json::from_slice::<Value>(body) {
            Ok(Value::Array(calls)) => calls,
            Ok(call @ Value::Object(_)) => vec![call],
            Ok(_) => {
                let error = Error::InvalidCall("envelope must be an object or an array".into());
                return self.rejected(&error);
            }
            Err(e) => return self.rejected(&Error::ParseError(e)),
        };

        debug!("Processing {} call(s)", calls.len());

        let config = &self.inner.config;
        let outcomes: Vec<(CallResponse, bool)> = match config.batched_methods_execution_policy {
            BatchExecutionPolicy::Concurrent if calls.len() > 1 => {
                stream::iter(calls)
                    .map(|call| {
                        let this = self.clone();
                        let ctx = ctx.clone();
                        async move {
                            let header = CallHeader::from_call(&call);
                            let task = {
                                let this = this.clone();
                                tokio::spawn(async move { this.execute(call, &ctx).await })
                            };
                            match task.await {
                                Ok(outcome) => outcome,
                                Err(e) => {
                                    let error = Error::Panic(e.to_string());
                                    (this.failure(header, &error), false)
                                }
                            }
                        }
                    })
                    .buffered(config.batched_methods_max_concurrency.max(1))
                    .collect()
                    .await
            }
            _ => {
                let mut outcomes = Vec::with_capacity(calls.len());
                for call in calls {
                    outcomes.push(self.execute(call, ctx).await);
                }
                outcomes
            }
        };

        let stream_response =
            config.stream_response || outcomes.iter().any(|(_, streams)| *streams);
        BatchResponse {
            responses: outcomes.into_iter().map(|(response, _)| response).collect(),
            stream_response,
        }
    }

    /// Run one call of a router envelope. The flag reports whether the
    /// resolved method streams its response.
    async fn execute(&self, call: Value, ctx: &RequestContext) -> (CallResponse, bool) {
        let header = CallHeader::from_call(&call);
        let mut streams = false;

        match self.run(&header, &call, ctx, &mut streams).await {
            Ok(result) => (CallResponse::success(header, result), streams),
            Err(error) => (self.failure(header, &error), streams),
        }
    }

    async fn run(
        &self,
        header: &CallHeader,
        call: &Value,
        ctx: &RequestContext,
        streams: &mut bool,
    ) -> Result<Value, Error> {
        header.validate()?;
        let entry = self.resolve(&header.action, &header.method)?;
        let descriptor = &entry.descriptor;
        *streams = descriptor.streams_response;

        if matches!(
            descriptor.call_kind,
            CallKind::Poll | CallKind::FormPost | CallKind::PushStream
        ) {
            return Err(Error::UnsupportedCallKind {
                kind: descriptor.call_kind.to_string(),
            });
        }

        let data = call.get("data").filter(|data| !data.is_null());
        let args = bind(descriptor, data, ctx, None)?;
        let raw = invoke(entry, args, &self.inner.config, &self.inner.locks).await?;
        Ok(wrap(descriptor, raw, &self.inner.config))
    }

    /// Invoke a poll method and report its result as an event named `event`.
    pub async fn poll(
        &self,
        action: &str,
        method: &str,
        event: &str,
        ctx: &RequestContext,
    ) -> PollResponse {
        match self.run_poll(action, method, ctx).await {
            Ok(data) => PollResponse {
                kind: ResponseKind::Event,
                name: event.to_string(),
                data: Some(data),
                message: None,
                trace: None,
            },
            Err(error) => {
                let classified = self.classify_logged(action, method, &error);
                PollResponse {
                    kind: ResponseKind::Exception,
                    name: event.to_string(),
                    data: None,
                    message: Some(classified.message),
                    trace: classified.trace,
                }
            }
        }
    }

    async fn run_poll(
        &self,
        action: &str,
        method: &str,
        ctx: &RequestContext,
    ) -> Result<Value, Error> {
        let entry = self.resolve_kind(action, method, CallKind::Poll)?;
        let args = bind(&entry.descriptor, None, ctx, None)?;
        invoke(entry, args, &self.inner.config, &self.inner.locks).await
    }

    /// Handle a form submission.
    ///
    /// The target method and transaction id are read from the `extAction`,
    /// `extMethod` and `extTID` request parameters; the remaining parameters
    /// are the form fields. Failures carry `{"success": false}` as result.
    pub async fn form_post(&self, ctx: &RequestContext) -> FormPostOutcome {
        let param = |name: &str| match ctx.param(name) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let tid = match ctx.param("extTID") {
            Some(Value::String(s)) => s
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(s.clone())),
            Some(other) => other.clone(),
            None => Value::Null,
        };
        let header = CallHeader {
            action: param("extAction"),
            method: param("extMethod"),
            tid,
        };
        debug!(
            "Form post to {}.{} (extType {})",
            header.action,
            header.method,
            param("extType")
        );

        match self.run_form_post(&header, ctx).await {
            Ok(FormPostOutcome::Forward(target)) => {
                debug!("Forwarding form post to {}", target);
                FormPostOutcome::Forward(target)
            }
            Ok(response) => response,
            Err(error) => {
                let mut response = self.failure(header, &error);
                response.result = Some(form_post_failure());
                FormPostOutcome::Response(response)
            }
        }
    }

    async fn run_form_post(
        &self,
        header: &CallHeader,
        ctx: &RequestContext,
    ) -> Result<FormPostOutcome, Error> {
        header.validate()?;
        let entry = self.resolve_kind(&header.action, &header.method, CallKind::FormPost)?;
        if let Some(target) = &entry.descriptor.forward_target {
            return Ok(FormPostOutcome::Forward(target.clone()));
        }

        let args = bind(&entry.descriptor, None, ctx, None)?;
        let raw = invoke(entry, args, &self.inner.config, &self.inner.locks).await?;
        let result = wrap(&entry.descriptor, raw, &self.inner.config);
        Ok(FormPostOutcome::Response(CallResponse::success(
            header.clone(),
            result,
        )))
    }

    /// Invoke a push stream method, writing its events to `sink`.
    ///
    /// A non-null return value is written as the final event. A failure is
    /// written as an `error` event. Returns an error only when the sink stops
    /// accepting events.
    pub async fn stream(
        &self,
        action: &str,
        method: &str,
        ctx: &RequestContext,
        sink: Arc<dyn EventSink>,
    ) -> Result<(), Error> {
        let writer = PushWriter::new(sink);

        match self.run_stream(action, method, ctx, &writer).await {
            Ok(value) => match PushEvent::from_result(value) {
                Some(event) => writer.write(event),
                None => Ok(()),
            },
            Err(error) => {
                let classified = self.classify_logged(action, method, &error);
                let mut event = PushEvent::data(classified.message).with_event("error");
                if let Some(trace) = classified.trace {
                    event = event.with_comment(trace);
                }
                writer.write(event)
            }
        }
    }

    async fn run_stream(
        &self,
        action: &str,
        method: &str,
        ctx: &RequestContext,
        writer: &PushWriter,
    ) -> Result<Value, Error> {
        let entry = self.resolve_kind(action, method, CallKind::PushStream)?;
        let args = bind(&entry.descriptor, None, ctx, Some(writer))?;
        invoke(entry, args, &self.inner.config, &self.inner.locks).await
    }

    fn resolve(&self, action: &str, method: &str) -> Result<&MethodEntry, Error> {
        self.inner
            .registry
            .resolve(action, method)
            .ok_or_else(|| Error::MethodNotFound {
                action: action.to_string(),
                method: method.to_string(),
            })
    }

    fn resolve_kind(
        &self,
        action: &str,
        method: &str,
        kind: CallKind,
    ) -> Result<&MethodEntry, Error> {
        let entry = self.resolve(action, method)?;
        if entry.descriptor.call_kind != kind {
            return Err(Error::UnsupportedCallKind {
                kind: entry.descriptor.call_kind.to_string(),
            });
        }
        Ok(entry)
    }

    fn failure(&self, header: CallHeader, error: &Error) -> CallResponse {
        let classified = self.classify_logged(&header.action, &header.method, error);
        CallResponse::failure(header, classified)
    }

    fn classify_logged(&self, action: &str, method: &str, error: &Error) -> Classified {
        error!("Error calling method: {}.{}: {}", action, method, error);
        classify(error, &self.inner.config)
    }

    /// Response for an envelope that is not a call or a list of calls.
    fn rejected(&self, error: &Error) -> BatchResponse {
        BatchResponse {
            responses: vec![self.failure(CallHeader::empty(), error)],
            stream_response: self.inner.config.stream_response,
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.inner.registry)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
