//! Error types for the Ext Direct router.
//!
//! This module defines every failure the dispatch engine can observe, from a
//! missing method to a handler that raised its own error. Every variant except
//! [`Error::Serialization`] is converted into a per-call `exception` response
//! and never aborts a batch.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::sync::Arc;

/// Errors produced while resolving, binding, invoking or encoding a call.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No handler is registered under `action.method`.
    #[error("Bean or Method '{action}.{method}' not found")]
    MethodNotFound { action: String, method: String },

    /// A batch element is structurally invalid (missing action or method).
    #[error("Invalid call: {0}")]
    InvalidCall(String),

    /// The method exists but cannot be called through this entry point.
    #[error("this router does not handle {kind} calls")]
    UnsupportedCallKind { kind: String },

    /// A required parameter was absent from the call data.
    #[error("Missing {origin} '{name}' of type [{declared}]")]
    MissingParameter {
        origin: &'static str,
        name: String,
        declared: String,
    },

    /// A positional parameter had no data left to consume.
    #[error(
        "Error, parameter mismatch for '{name}'. Please check your remoting method signature"
    )]
    ParameterMismatch { name: String },

    /// A supplied value could not be coerced to the declared type.
    #[error("Cannot convert {value} to [{target}]")]
    Conversion { target: String, value: String },

    /// Raised by handler code.
    #[error("{0}")]
    Handler(HandlerError),

    /// A handler panicked while running.
    #[error("Handler panicked: {0}")]
    Panic(String),

    /// Inbound JSON could not be parsed.
    #[error("JSON parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    /// A response could not be encoded. Fatal for the whole exchange.
    #[error("Serialization error: {0}")]
    Serialization(serde_json::Error),

    /// A descriptor violates a registration invariant.
    #[error("Registration error: {0}")]
    Registration(String),

    /// The push-stream sink is no longer accepting events.
    #[error("Push stream closed")]
    StreamClosed,
}

impl Error {
    /// Create a handler error with the given kind and message.
    ///
    /// The kind plays the role of an exception type: it is the key looked up
    /// in [`Configuration::exception_to_message`](crate::Configuration).
    pub fn handler(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler(HandlerError::new(kind, message))
    }

    /// Create a registration error.
    pub fn registration(message: impl Into<String>) -> Self {
        Self::Registration(message.into())
    }

    pub(crate) fn conversion(target: impl fmt::Display, value: &serde_json::Value) -> Self {
        Self::Conversion {
            target: target.to_string(),
            value: value.to_string(),
        }
    }

    /// Name used to match this error against the exception-to-message table.
    pub fn kind_name(&self) -> &str {
        match self {
            Error::MethodNotFound { .. } => "MethodNotFound",
            Error::InvalidCall(_) => "InvalidCall",
            Error::UnsupportedCallKind { .. } => "UnsupportedCallKind",
            Error::MissingParameter { .. } => "MissingParameter",
            Error::ParameterMismatch { .. } => "ParameterMismatch",
            Error::Conversion { .. } => "Conversion",
            Error::Handler(handler) => handler.root_cause().kind(),
            Error::Panic(_) => "Panic",
            Error::ParseError(_) => "ParseError",
            Error::Serialization(_) => "Serialization",
            Error::Registration(_) => "Registration",
            Error::StreamClosed => "StreamClosed",
        }
    }

    /// Message of the root cause. Handler errors collapse their cause chain.
    pub fn root_message(&self) -> String {
        match self {
            Error::Handler(handler) => handler.root_cause().message().to_string(),
            other => other.to_string(),
        }
    }

    /// Formatted trace of the root cause, used for the `where` field.
    pub fn root_trace(&self) -> String {
        match self {
            Error::Handler(handler) => handler.root_cause().trace(),
            other => format!("{}: {}", other.kind_name(), other),
        }
    }
}

impl From<HandlerError> for Error {
    fn from(error: HandlerError) -> Self {
        Self::Handler(error)
    }
}

/// An error raised by handler code, optionally wrapping the error that caused it.
#[derive(Debug, Clone)]
pub struct HandlerError {
    kind: String,
    message: String,
    cause: Option<Box<HandlerError>>,
    backtrace: Arc<Backtrace>,
}

impl HandlerError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            cause: None,
            backtrace: Arc::new(Backtrace::capture()),
        }
    }

    /// Attach the error that caused this one.
    pub fn caused_by(mut self, cause: HandlerError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&HandlerError> {
        self.cause.as_deref()
    }

    /// Innermost error of the cause chain.
    pub fn root_cause(&self) -> &HandlerError {
        let mut current = self;
        while let Some(cause) = current.cause.as_deref() {
            current = cause;
        }
        current
    }

    /// `kind: message`, followed by the captured backtrace when one exists.
    pub fn trace(&self) -> String {
        let mut trace = format!("{}: {}", self.kind, self.message);
        if self.backtrace.status() == BacktraceStatus::Captured {
            trace.push('\n');
            trace.push_str(&self.backtrace.to_string());
        }
        trace
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}
