//! Result envelopes.
//!
//! Store and form components on the client expect particular response shapes.
//! Handlers may return these shapes themselves through the helper types below,
//! or return plain values and let [`wrap`] add the envelope.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::config::Configuration;
use crate::registry::MethodDescriptor;

/// Store read/write response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreResult<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    pub records: Vec<T>,
}

impl<T> StoreResult<T> {
    pub fn new(records: Vec<T>) -> Self {
        Self {
            meta_data: None,
            success: None,
            total: None,
            records,
        }
    }

    /// Total number of rows available, for paging toolbars.
    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn with_meta_data(mut self, meta_data: Value) -> Self {
        self.meta_data = Some(meta_data);
        self
    }
}

/// Form load response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormLoadResult<T> {
    pub success: bool,
    pub data: T,
}

impl<T> FormLoadResult<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }

    pub fn failure(data: T) -> Self {
        Self {
            success: false,
            data,
        }
    }
}

/// Form submit response with per-field error messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormPostResult {
    pub success: bool,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub errors: HashMap<String, Vec<String>>,
}

impl FormPostResult {
    pub fn success() -> Self {
        Self {
            success: true,
            errors: HashMap::new(),
        }
    }

    pub fn failure() -> Self {
        Self::default()
    }

    /// Record a validation error for `field`. Marks the result as failed.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.success = false;
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
    }
}

/// Result sent for a failed form post.
pub(crate) fn form_post_failure() -> Value {
    json!({ "success": false })
}

/// Turn a handler's raw return value into the value sent as `result`.
pub fn wrap(descriptor: &MethodDescriptor, raw: Value, config: &Configuration) -> Value {
    let kind = descriptor.call_kind;

    if kind.is_load() {
        if raw.is_null() || is_load_envelope(&raw) {
            return raw;
        }
        debug!("Wrapping {} result in load envelope", descriptor.full_name());
        return json!({ "success": true, "data": raw });
    }

    if kind.is_store() {
        if raw.is_null() {
            return Value::Array(Vec::new());
        }
        if !config.always_wrap_store_response || is_store_envelope(&raw) {
            return raw;
        }
        debug!("Wrapping {} result in store envelope", descriptor.full_name());
        let records = match raw {
            Value::Array(items) => items,
            single => vec![single],
        };
        let mut envelope = Map::new();
        envelope.insert("records".to_string(), Value::Array(records));
        return Value::Object(envelope);
    }

    raw
}

fn is_load_envelope(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|o| o.get("success").is_some_and(Value::is_boolean) && o.contains_key("data"))
}

fn is_store_envelope(value: &Value) -> bool {
    value.as_object().is_some_and(|o| o.contains_key("records"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CallKind;

    fn descriptor(kind: CallKind) -> MethodDescriptor {
        MethodDescriptor::new("a", "m", kind)
    }

    #[test]
    fn load_results_get_envelope_once() {
        let load = descriptor(CallKind::FormLoad);
        let config = Configuration::default();

        let wrapped = wrap(&load, json!({"name": "x"}), &config);
        assert_eq!(wrapped, json!({"success": true, "data": {"name": "x"}}));
        assert_eq!(wrap(&load, wrapped.clone(), &config), wrapped);

        let tree = descriptor(CallKind::TreeLoad);
        assert_eq!(
            wrap(&tree, json!([1]), &config),
            json!({"success": true, "data": [1]})
        );
    }

    #[test]
    fn null_load_result_is_not_wrapped() {
        let config = Configuration::default();
        assert_eq!(wrap(&descriptor(CallKind::FormLoad), Value::Null, &config), Value::Null);
        assert_eq!(wrap(&descriptor(CallKind::TreeLoad), Value::Null, &config), Value::Null);
    }

    #[test]
    fn store_results_wrap_only_when_enabled() {
        let read = descriptor(CallKind::QueryRead);

        let plain = Configuration::default();
        assert_eq!(wrap(&read, json!([1, 2]), &plain), json!([1, 2]));
        assert_eq!(wrap(&read, Value::Null, &plain), json!([]));

        let always = Configuration::new().with_always_wrap_store_response(true);
        let wrapped = wrap(&read, json!([1, 2]), &always);
        assert_eq!(wrapped, json!({"records": [1, 2]}));
        assert_eq!(wrap(&read, wrapped.clone(), &always), wrapped);
        assert_eq!(wrap(&read, json!({"id": 1}), &always), json!({"records": [{"id": 1}]}));
        assert_eq!(wrap(&read, Value::Null, &always), json!([]));
    }

    #[test]
    fn other_kinds_pass_through() {
        let config = Configuration::new().with_always_wrap_store_response(true);
        let simple = descriptor(CallKind::SimplePositional);
        assert_eq!(wrap(&simple, Value::Null, &config), Value::Null);
        assert_eq!(wrap(&simple, json!([1]), &config), json!([1]));
    }

    #[test]
    fn helper_types_match_recognised_envelopes() {
        let store = serde_json::to_value(StoreResult::new(vec![1, 2]).with_total(40)).unwrap();
        assert_eq!(store, json!({"total": 40, "records": [1, 2]}));
        assert!(is_store_envelope(&store));

        let load = serde_json::to_value(FormLoadResult::new(json!({"id": 3}))).unwrap();
        assert!(is_load_envelope(&load));

        let mut post = FormPostResult::success();
        post.add_error("email", "already taken");
        assert_eq!(
            serde_json::to_value(&post).unwrap(),
            json!({"success": false, "errors": {"email": ["already taken"]}})
        );
    }
}
