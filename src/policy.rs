//! Mapping of errors to client-visible messages.

use crate::config::Configuration;
use crate::error::Error;

/// Client-visible message and optional trace for a failed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub message: String,
    pub trace: Option<String>,
}

/// Decide what the client is told about `error`.
///
/// Message precedence, first match wins:
///
/// 1. a non-blank entry for the error's kind in `exception_to_message`;
/// 2. the error's own message, if the kind is present in the table at all;
/// 3. the error's own message, if `send_exception_message` is set;
/// 4. `default_exception_message`.
///
/// The trace of the root cause is attached only when `send_stacktrace` is set.
/// A missing method always reports the default message.
pub fn classify(error: &Error, config: &Configuration) -> Classified {
    if let Error::MethodNotFound { .. } = error {
        return Classified {
            message: config.default_exception_message.clone(),
            trace: config.send_stacktrace.then(|| error.to_string()),
        };
    }

    let message = match config.exception_to_message.get(error.kind_name()) {
        Some(Some(mapped)) if !mapped.trim().is_empty() => mapped.clone(),
        Some(_) => error.root_message(),
        None if config.send_exception_message => error.root_message(),
        None => config.default_exception_message.clone(),
    };

    Classified {
        message,
        trace: config.send_stacktrace.then(|| error.root_trace()),
    }
}
