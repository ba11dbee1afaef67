//! Router configuration.
//!
//! `Configuration` is an immutable snapshot read on every call. It can be built
//! in code with the `with_*` methods or deserialized from the host
//! application's own configuration file.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How the calls of one batch envelope are executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchExecutionPolicy {
    /// One call after another, in envelope order.
    #[default]
    Sequential,
    /// Calls fan out to a bounded set of tasks; responses keep envelope order.
    Concurrent,
}

/// Configuration of the dispatch engine.
///
/// # Example
///
/// ```
/// use ext_direct::Configuration;
///
/// let config = Configuration::new()
///     .with_send_exception_message(true)
///     .with_exception_message("IllegalArgumentException", Some("Bad input"));
///
/// assert_eq!(config.default_exception_message, "Server Error");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Configuration {
    pub default_exception_message: String,
    pub send_exception_message: bool,
    pub send_stacktrace: bool,
    /// Error kind to message. A `None` value means "send the real message".
    pub exception_to_message: HashMap<String, Option<String>>,
    pub always_wrap_store_response: bool,
    pub synchronize_on_session: bool,
    pub stream_response: bool,
    pub batched_methods_execution_policy: BatchExecutionPolicy,
    pub batched_methods_max_concurrency: usize,

    // Client provider settings, published with the API description only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_buffer: Option<serde_json::Value>,
}

impl Configuration {
    pub fn new() -> Self {
        Self {
            default_exception_message: "Server Error".to_string(),
            send_exception_message: false,
            send_stacktrace: false,
            exception_to_message: HashMap::new(),
            always_wrap_store_response: false,
            synchronize_on_session: false,
            stream_response: false,
            batched_methods_execution_policy: BatchExecutionPolicy::Sequential,
            batched_methods_max_concurrency: 5,
            timeout: None,
            max_retries: None,
            enable_buffer: None,
        }
    }

    pub fn with_default_exception_message(mut self, message: impl Into<String>) -> Self {
        self.default_exception_message = message.into();
        self
    }

    pub fn with_send_exception_message(mut self, enabled: bool) -> Self {
        self.send_exception_message = enabled;
        self
    }

    pub fn with_send_stacktrace(mut self, enabled: bool) -> Self {
        self.send_stacktrace = enabled;
        self
    }

    /// Map an error kind to a message. `None` sends the error's own message.
    pub fn with_exception_message(
        mut self,
        kind: impl Into<String>,
        message: Option<&str>,
    ) -> Self {
        self.exception_to_message
            .insert(kind.into(), message.map(str::to_string));
        self
    }

    pub fn with_always_wrap_store_response(mut self, enabled: bool) -> Self {
        self.always_wrap_store_response = enabled;
        self
    }

    pub fn with_synchronize_on_session(mut self, enabled: bool) -> Self {
        self.synchronize_on_session = enabled;
        self
    }

    pub fn with_stream_response(mut self, enabled: bool) -> Self {
        self.stream_response = enabled;
        self
    }

    /// Execute batched calls concurrently with at most `max_concurrency` in flight.
    ///
    /// Panics if `max_concurrency` is zero.
    pub fn with_concurrent_batches(mut self, max_concurrency: usize) -> Self {
        assert!(max_concurrency > 0, "Batch concurrency must be greater than 0");
        self.batched_methods_execution_policy = BatchExecutionPolicy::Concurrent;
        self.batched_methods_max_concurrency = max_concurrency;
        self
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}
