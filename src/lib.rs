//! An Ext Direct router for async Rust.
//!
//! This library implements the server side of the Ext Direct remoting
//! protocol. It accepts one or many remote calls in a single envelope, resolves
//! each to a registered handler, builds typed arguments from loosely typed
//! JSON, invokes the handler and turns the result into the response shape the
//! client-side component expects. A failure in one call never affects the
//! other calls of the same batch.
//!
//! # Design Goals
//!
//! The library is a dispatch engine, not a web server. It works on raw
//! envelope bytes and a [`RequestContext`] describing the inbound request, so
//! any HTTP stack can host it. An adapter for axum ships behind the `axum`
//! feature.
//!
//! # Architecture
//!
//! [`registry`] holds the [`MethodDescriptor`] of every callable method and
//! its async handler. Descriptors are validated on registration.
//!
//! [`binder`] assembles handler arguments according to the method's
//! [`CallKind`], using [`query`] to normalize paging, sorting, grouping and
//! filtering input and [`convert`] to coerce values to declared types.
//!
//! [`dispatcher`] drives a batch: it parses the envelope, runs every call
//! (in order, or concurrently if configured), wraps results with [`result`]
//! and maps failures to client messages with [`policy`].
//!
//! [`config`] holds the [`Configuration`] read on every call and [`error`]
//! defines the [`Error`] type.
//!
//! # Quick Start
//!
//! ```
//! use ext_direct::{
//!     CallKind, Configuration, Dispatcher, MethodDescriptor, MethodRegistry, ParameterSpec,
//!     RequestContext, TypeDesc,
//! };
//!
//! let mut registry = MethodRegistry::new();
//! registry.register(
//!     MethodDescriptor::new("calc", "add", CallKind::SimplePositional)
//!         .param(ParameterSpec::positional(TypeDesc::Int))
//!         .param(ParameterSpec::positional(TypeDesc::Int)),
//!     |args| async move {
//!         let a: i64 = args.get(0)?;
//!         let b: i64 = args.get(1)?;
//!         Ok(a + b)
//!     },
//! )?;
//!
//! let dispatcher = Dispatcher::new(registry, Configuration::default());
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let batch = dispatcher
//!     .dispatch(
//!         br#"[{"action":"calc","method":"add","type":"rpc","tid":1,"data":[3,4]},
//!             {"action":"ghost","method":"boo","type":"rpc","tid":2}]"#,
//!         &RequestContext::new(),
//!     )
//!     .await;
//!
//! assert_eq!(batch.responses[0].result, Some(serde_json::json!(7)));
//! assert_eq!(batch.responses[1].message.as_deref(), Some("Server Error"));
//! # });
//! # Ok::<(), ext_direct::Error>(())
//! ```
//!
//! # Store Reads
//!
//! A `QUERY_READ` method receives the normalized [`QueryRequest`]:
//!
//! ```
//! use ext_direct::{CallKind, MethodDescriptor, MethodRegistry, ParameterSpec, StoreResult};
//!
//! let mut registry = MethodRegistry::new();
//! registry.register(
//!     MethodDescriptor::new("users", "read", CallKind::QueryRead)
//!         .param(ParameterSpec::query_request()),
//!     |args| async move {
//!         let query = args.query(0)?;
//!         let rows: Vec<u32> = (0..100).collect();
//!         let (from, to) = query.page_bounds(rows.len());
//!         Ok(StoreResult::new(rows[from..to].to_vec()).with_total(rows.len() as u64))
//!     },
//! )?;
//! # Ok::<(), ext_direct::Error>(())
//! ```
//!
//! # Error Handling
//!
//! Handlers raise errors with [`Error::handler`]. The kind is matched against
//! [`Configuration::exception_to_message`]; unless configured otherwise the
//! client only sees the default message:
//!
//! ```
//! use ext_direct::{CallKind, Error, MethodDescriptor, MethodRegistry};
//!
//! let mut registry = MethodRegistry::new();
//! registry.register(
//!     MethodDescriptor::new("account", "close", CallKind::SimpleNamed),
//!     |_args| async move {
//!         Err::<(), _>(Error::handler("IllegalStateException", "account is locked"))
//!     },
//! )?;
//! # Ok::<(), ext_direct::Error>(())
//! ```

pub use binder::{Arg, Args};
pub use config::{BatchExecutionPolicy, Configuration};
pub use context::{EventSink, PushEvent, PushWriter, RequestContext};
pub use convert::{RecordSchema, TypeDesc};
pub use dispatcher::{
    BatchResponse, CallResponse, Dispatcher, FormPostOutcome, PollResponse, ResponseKind,
};
pub use error::{Error, HandlerError};
pub use query::{
    Comparison, Filter, FilterValue, GroupInfo, QueryRequest, SortDirection, SortInfo,
};
pub use registry::{
    CallKind, FrameworkParam, MethodDescriptor, MethodEntry, MethodRegistry, ParamOrigin,
    ParameterSpec,
};
pub use result::{FormLoadResult, FormPostResult, StoreResult};

pub mod binder;
pub mod config;
pub mod context;
pub mod convert;
pub mod dispatcher;
pub mod error;
mod invoker;
pub mod policy;
pub mod query;
pub mod registry;
pub mod result;

#[cfg(feature = "axum")]
pub mod axum;
