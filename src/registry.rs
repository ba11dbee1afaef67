//! Method descriptors and the registry they are looked up in.
//!
//! Every remotely callable method is described once at startup by a
//! [`MethodDescriptor`] and registered together with its handler. During
//! dispatch the registry is only read, so one instance can be shared by any
//! number of concurrent dispatches.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::binder::Args;
use crate::convert::TypeDesc;
use crate::error::Error;

/// Type-erased async handler.
pub(crate) type BoxedHandler = Arc<
    dyn Fn(Args) -> Pin<Box<dyn Future<Output = Result<Value, Error>> + Send>> + Send + Sync,
>;

/// Calling convention of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallKind {
    SimplePositional,
    SimpleNamed,
    QueryRead,
    BatchCreateUpdateDestroy,
    FormLoad,
    FormPost,
    TreeLoad,
    Poll,
    PushStream,
}

impl CallKind {
    /// Store-style calls get the store envelope treatment.
    pub fn is_store(self) -> bool {
        matches!(self, CallKind::QueryRead | CallKind::BatchCreateUpdateDestroy)
    }

    /// Load-style calls get the load envelope treatment.
    pub fn is_load(self) -> bool {
        matches!(self, CallKind::FormLoad | CallKind::TreeLoad)
    }

    fn accepts_query_request(self) -> bool {
        matches!(self, CallKind::QueryRead | CallKind::FormLoad | CallKind::TreeLoad)
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallKind::SimplePositional => "SIMPLE_POSITIONAL",
            CallKind::SimpleNamed => "SIMPLE_NAMED",
            CallKind::QueryRead => "QUERY_READ",
            CallKind::BatchCreateUpdateDestroy => "BATCH_CREATE_UPDATE_DESTROY",
            CallKind::FormLoad => "FORM_LOAD",
            CallKind::FormPost => "FORM_POST",
            CallKind::TreeLoad => "TREE_LOAD",
            CallKind::Poll => "POLL",
            CallKind::PushStream => "PUSH_STREAM",
        };
        f.write_str(name)
    }
}

/// Values the framework supplies without looking at call data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameworkParam {
    /// The whole [`RequestContext`](crate::RequestContext).
    Request,
    Locale,
    Session,
    /// The push-stream writer; only bound for push-stream calls.
    PushWriter,
}

/// Where the value of a parameter comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamOrigin {
    FrameworkSupplied(FrameworkParam),
    NamedQueryParam,
    Header,
    QueryRequestObject,
    RecordCollection,
    PositionalOrNamedBody,
}

/// One formal parameter of a method.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: Option<String>,
    pub declared_type: TypeDesc,
    pub origin: ParamOrigin,
    pub required: bool,
    pub default_value: Option<Value>,
}

impl ParameterSpec {
    fn new(name: Option<String>, declared_type: TypeDesc, origin: ParamOrigin) -> Self {
        Self {
            name,
            declared_type,
            origin,
            required: !matches!(origin, ParamOrigin::FrameworkSupplied(_)),
            default_value: None,
        }
    }

    /// Anonymous body parameter, bound from the next positional element.
    pub fn positional(declared_type: TypeDesc) -> Self {
        Self::new(None, declared_type, ParamOrigin::PositionalOrNamedBody)
    }

    /// Body parameter bound by name from named data, or positionally otherwise.
    pub fn body(name: impl Into<String>, declared_type: TypeDesc) -> Self {
        Self::new(
            Some(name.into()),
            declared_type,
            ParamOrigin::PositionalOrNamedBody,
        )
    }

    pub fn request_param(name: impl Into<String>, declared_type: TypeDesc) -> Self {
        Self::new(Some(name.into()), declared_type, ParamOrigin::NamedQueryParam)
    }

    pub fn header(name: impl Into<String>, declared_type: TypeDesc) -> Self {
        Self::new(Some(name.into()), declared_type, ParamOrigin::Header)
    }

    pub fn query_request() -> Self {
        Self::new(None, TypeDesc::Any, ParamOrigin::QueryRequestObject)
    }

    pub fn records() -> Self {
        Self::new(None, TypeDesc::Any, ParamOrigin::RecordCollection)
    }

    pub fn framework(param: FrameworkParam) -> Self {
        Self::new(None, TypeDesc::Any, ParamOrigin::FrameworkSupplied(param))
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Literal used when the value is absent. Implies the parameter is optional.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self.required = false;
        self
    }

    pub(crate) fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<positional>")
    }
}

/// Immutable description of one callable method.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDescriptor {
    pub handler_name: String,
    pub method_name: String,
    pub call_kind: CallKind,
    pub parameters: Vec<ParameterSpec>,
    pub entry_type: Option<TypeDesc>,
    pub requires_session_lock: bool,
    pub streams_response: bool,
    pub forward_target: Option<String>,
    /// Event name published by a poll method.
    pub event: Option<String>,
}

impl MethodDescriptor {
    pub fn new(
        handler_name: impl Into<String>,
        method_name: impl Into<String>,
        call_kind: CallKind,
    ) -> Self {
        Self {
            handler_name: handler_name.into(),
            method_name: method_name.into(),
            call_kind,
            parameters: Vec::new(),
            entry_type: None,
            requires_session_lock: false,
            streams_response: false,
            forward_target: None,
            event: None,
        }
    }

    pub fn param(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn entry_type(mut self, entry_type: TypeDesc) -> Self {
        self.entry_type = Some(entry_type);
        self
    }

    pub fn session_lock(mut self) -> Self {
        self.requires_session_lock = true;
        self
    }

    pub fn stream_response(mut self) -> Self {
        self.streams_response = true;
        self
    }

    pub fn forward_to(mut self, target: impl Into<String>) -> Self {
        self.forward_target = Some(target.into());
        self
    }

    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// `action.method`, as used in log lines and messages.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.handler_name, self.method_name)
    }

    fn validate(&self) -> Result<(), Error> {
        let name = self.full_name();
        let count = |origin: ParamOrigin| {
            self.parameters
                .iter()
                .filter(|p| p.origin == origin)
                .count()
        };

        let query_objects = count(ParamOrigin::QueryRequestObject);
        if query_objects > 1 {
            return Err(Error::registration(format!(
                "{name} declares {query_objects} query request parameters, at most one is allowed"
            )));
        }
        if query_objects == 1 && !self.call_kind.accepts_query_request() {
            return Err(Error::registration(format!(
                "{} method {name} cannot take a query request parameter",
                self.call_kind
            )));
        }
        if count(ParamOrigin::RecordCollection) > 0 && self.entry_type.is_none() {
            return Err(Error::registration(format!(
                "{name} takes a record collection but has no entry type"
            )));
        }
        if self.call_kind == CallKind::SimplePositional && count(ParamOrigin::NamedQueryParam) > 0
        {
            return Err(Error::registration(format!(
                "SIMPLE_POSITIONAL method {name} cannot take named request parameters"
            )));
        }
        if self.forward_target.is_some() && self.call_kind != CallKind::FormPost {
            return Err(Error::registration(format!(
                "{name} has a forward target but is not a FORM_POST method"
            )));
        }
        if let Some(parameter) = self.parameters.iter().find(|p| {
            p.name.is_none()
                && matches!(p.origin, ParamOrigin::NamedQueryParam | ParamOrigin::Header)
        }) {
            return Err(Error::registration(format!(
                "{name} has an unnamed {:?} parameter",
                parameter.origin
            )));
        }
        Ok(())
    }
}

/// A registered method: its descriptor and its handler.
#[derive(Clone)]
pub struct MethodEntry {
    pub(crate) descriptor: Arc<MethodDescriptor>,
    pub(crate) handler: BoxedHandler,
}

impl MethodEntry {
    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }
}

impl fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodEntry")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Lookup table from `(action, method)` to registered methods.
///
/// # Example
///
/// ```
/// use ext_direct::{CallKind, MethodDescriptor, MethodRegistry, ParameterSpec, TypeDesc};
///
/// let mut registry = MethodRegistry::new();
/// registry.register(
///     MethodDescriptor::new("calc", "add", CallKind::SimplePositional)
///         .param(ParameterSpec::positional(TypeDesc::Int))
///         .param(ParameterSpec::positional(TypeDesc::Int)),
///     |args| async move {
///         let a: i64 = args.get(0)?;
///         let b: i64 = args.get(1)?;
///         Ok(a + b)
///     },
/// )?;
///
/// assert!(registry.resolve("calc", "add").is_some());
/// # Ok::<(), ext_direct::Error>(())
/// ```
#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<(String, String), MethodEntry>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    /// Register a handler under the descriptor's `(action, method)` key.
    ///
    /// Fails if the key is taken or the descriptor is inconsistent.
    pub fn register<F, R, Fut>(
        &mut self,
        descriptor: MethodDescriptor,
        handler: F,
    ) -> Result<(), Error>
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        descriptor.validate()?;

        let key = (
            descriptor.handler_name.clone(),
            descriptor.method_name.clone(),
        );
        if self.methods.contains_key(&key) {
            return Err(Error::registration(format!(
                "{} is already registered",
                descriptor.full_name()
            )));
        }

        let handler = Arc::new(handler);
        let boxed: BoxedHandler = Arc::new(move |args: Args| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let result = handler(args).await?;
                serde_json::to_value(result).map_err(Error::Serialization)
            })
        });

        debug!(
            "Registered {} method {}",
            descriptor.call_kind,
            descriptor.full_name()
        );
        self.methods.insert(
            key,
            MethodEntry {
                descriptor: Arc::new(descriptor),
                handler: boxed,
            },
        );
        Ok(())
    }

    /// Look up a method. `None` is the method-not-found outcome.
    pub fn resolve(&self, action: &str, method: &str) -> Option<&MethodEntry> {
        self.methods.get(&(action.to_string(), method.to_string()))
    }

    /// All registered descriptors, for generating an API description.
    pub fn descriptors(&self) -> impl Iterator<Item = &MethodDescriptor> {
        self.methods.values().map(|entry| entry.descriptor.as_ref())
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.methods.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn noop(_args: Args) -> Result<(), Error> {
        Ok(())
    }

    #[test]
    fn resolution_is_idempotent_and_absent_is_none() {
        let mut registry = MethodRegistry::new();
        registry
            .register(
                MethodDescriptor::new("calc", "add", CallKind::SimplePositional)
                    .param(ParameterSpec::positional(TypeDesc::Int)),
                noop,
            )
            .unwrap();

        let first = registry.resolve("calc", "add").unwrap().descriptor().clone();
        let second = registry.resolve("calc", "add").unwrap().descriptor().clone();
        assert_eq!(first, second);
        assert!(registry.resolve("ghost", "add").is_none());
        assert!(registry.resolve("calc", "sub").is_none());
        assert_eq!(registry.descriptors().count(), 1);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = MethodRegistry::new();
        let descriptor = MethodDescriptor::new("a", "b", CallKind::SimpleNamed);
        registry.register(descriptor.clone(), noop).unwrap();
        assert!(matches!(
            registry.register(descriptor, noop),
            Err(Error::Registration(_))
        ));
    }

    #[test]
    fn descriptor_invariants_are_checked() {
        let mut registry = MethodRegistry::new();

        let two_queries = MethodDescriptor::new("s", "read", CallKind::QueryRead)
            .param(ParameterSpec::query_request())
            .param(ParameterSpec::query_request());
        assert!(registry.register(two_queries, noop).is_err());

        let query_on_simple = MethodDescriptor::new("s", "simple", CallKind::SimplePositional)
            .param(ParameterSpec::query_request());
        assert!(registry.register(query_on_simple, noop).is_err());

        let records_without_entry = MethodDescriptor::new("s", "update", CallKind::BatchCreateUpdateDestroy)
            .param(ParameterSpec::records());
        assert!(registry.register(records_without_entry, noop).is_err());

        let named_on_positional = MethodDescriptor::new("s", "p", CallKind::SimplePositional)
            .param(ParameterSpec::request_param("id", TypeDesc::Int));
        assert!(registry.register(named_on_positional, noop).is_err());

        let forward_on_simple =
            MethodDescriptor::new("s", "f", CallKind::SimpleNamed).forward_to("/page");
        assert!(registry.register(forward_on_simple, noop).is_err());

        assert!(registry.is_empty());
    }

    #[test]
    fn parameter_defaults() {
        let body = ParameterSpec::body("name", TypeDesc::String);
        assert!(body.required);

        let defaulted = ParameterSpec::request_param("page", TypeDesc::Int).with_default(1);
        assert!(!defaulted.required);
        assert_eq!(defaulted.default_value, Some(Value::from(1)));

        assert!(!ParameterSpec::framework(FrameworkParam::Locale).required);
    }
}
