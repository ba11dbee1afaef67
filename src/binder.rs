//! Argument binding.
//!
//! [`bind`] turns the loosely typed data of one call into the ordered argument
//! list of the target method. Which part of the call data feeds which
//! parameter depends on the method's [`CallKind`] and on each parameter's
//! [`ParamOrigin`]; values are coerced to the declared type on the way.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::context::{PushWriter, RequestContext};
use crate::convert::{TypeDesc, convert};
use crate::error::Error;
use crate::query::{QueryRequest, normalize};
use crate::registry::{CallKind, FrameworkParam, MethodDescriptor, ParamOrigin, ParameterSpec};

/// One bound argument.
#[derive(Debug, Clone)]
pub enum Arg {
    Value(Value),
    Query(QueryRequest),
    Records(Vec<Value>),
    Request(RequestContext),
    Locale(Option<String>),
    Session(Option<String>),
    PushWriter(Option<PushWriter>),
}

/// Bound arguments handed to a handler, in declaration order.
#[derive(Debug, Clone)]
pub struct Args {
    values: Vec<Arg>,
    context: RequestContext,
}

impl Args {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn arg(&self, index: usize) -> Option<&Arg> {
        self.values.get(index)
    }

    /// Deserialize argument `index` into `T`.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, Error> {
        let value = match self.expect(index)? {
            Arg::Value(value) => value.clone(),
            Arg::Records(records) => Value::Array(records.clone()),
            Arg::Locale(locale) => locale.clone().map(Value::String).unwrap_or(Value::Null),
            Arg::Session(session) => session.clone().map(Value::String).unwrap_or(Value::Null),
            Arg::Query(query) => serde_json::to_value(query).map_err(Error::Serialization)?,
            Arg::Request(_) | Arg::PushWriter(_) => {
                return Err(Error::Conversion {
                    target: std::any::type_name::<T>().to_string(),
                    value: format!("argument #{index}"),
                });
            }
        };

        serde_json::from_value(value.clone())
            .map_err(|_| Error::conversion(std::any::type_name::<T>(), &value))
    }

    /// The normalized read request bound at `index`.
    pub fn query(&self, index: usize) -> Result<&QueryRequest, Error> {
        match self.expect(index)? {
            Arg::Query(query) => Ok(query),
            _ => Err(self.mismatch(index)),
        }
    }

    /// The record collection bound at `index`, each record deserialized into `T`.
    pub fn records<T: DeserializeOwned>(&self, index: usize) -> Result<Vec<T>, Error> {
        match self.expect(index)? {
            Arg::Records(records) => records
                .iter()
                .map(|record| {
                    serde_json::from_value(record.clone())
                        .map_err(|_| Error::conversion(std::any::type_name::<T>(), record))
                })
                .collect(),
            _ => Err(self.mismatch(index)),
        }
    }

    /// The push-stream writer bound at `index`.
    pub fn push_writer(&self, index: usize) -> Result<&PushWriter, Error> {
        match self.expect(index)? {
            Arg::PushWriter(Some(writer)) => Ok(writer),
            _ => Err(self.mismatch(index)),
        }
    }

    /// Request the call arrived with.
    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    fn expect(&self, index: usize) -> Result<&Arg, Error> {
        self.values.get(index).ok_or_else(|| self.mismatch(index))
    }

    fn mismatch(&self, index: usize) -> Error {
        Error::ParameterMismatch {
            name: format!("#{index}"),
        }
    }
}

/// State carried from the per-kind preparation into parameter binding.
#[derive(Default)]
struct Prepared {
    /// Named values available to named and body parameters.
    named: Option<Map<String, Value>>,
    query: Option<QueryRequest>,
    load_data: Option<Value>,
    records: Option<Vec<Value>>,
    /// Index of the next unconsumed positional element.
    cursor: usize,
}

/// Bind the call data of one call to the parameters of `descriptor`.
pub fn bind(
    descriptor: &MethodDescriptor,
    data: Option<&Value>,
    ctx: &RequestContext,
    push: Option<&PushWriter>,
) -> Result<Args, Error> {
    let positional: &[Value] = match data {
        Some(Value::Array(items)) => items,
        _ => &[],
    };
    let mut prepared = prepare(descriptor, data, ctx)?;

    let mut values = Vec::with_capacity(descriptor.parameters.len());
    for parameter in &descriptor.parameters {
        let arg = match parameter.origin {
            ParamOrigin::FrameworkSupplied(param) => match param {
                FrameworkParam::Request => Arg::Request(ctx.clone()),
                FrameworkParam::Locale => Arg::Locale(ctx.locale().map(str::to_string)),
                FrameworkParam::Session => Arg::Session(ctx.session().map(str::to_string)),
                FrameworkParam::PushWriter => Arg::PushWriter(push.cloned()),
            },
            ParamOrigin::QueryRequestObject => match descriptor.call_kind {
                CallKind::QueryRead => Arg::Query(prepared.query.clone().unwrap_or_default()),
                _ => {
                    let data = prepared.load_data.clone().unwrap_or(Value::Null);
                    Arg::Value(convert(&data, &parameter.declared_type)?)
                }
            },
            ParamOrigin::RecordCollection => {
                Arg::Records(prepared.records.clone().unwrap_or_default())
            }
            ParamOrigin::Header => {
                let value = parameter
                    .name
                    .as_deref()
                    .and_then(|name| ctx.header(name))
                    .map(|s| Value::String(s.to_string()));
                Arg::Value(resolve_named(parameter, value, "header")?)
            }
            ParamOrigin::NamedQueryParam => {
                let value = parameter.name.as_deref().and_then(|name| {
                    prepared
                        .named
                        .as_ref()
                        .and_then(|named| named.get(name))
                        .or_else(|| ctx.param(name))
                        .cloned()
                });
                Arg::Value(resolve_named(parameter, value, "parameter")?)
            }
            ParamOrigin::PositionalOrNamedBody => {
                Arg::Value(resolve_body(parameter, &mut prepared, positional)?)
            }
        };
        values.push(arg);
    }

    debug!(
        "Bound {} arguments for {}",
        values.len(),
        descriptor.full_name()
    );

    Ok(Args {
        values,
        context: ctx.clone(),
    })
}

/// Split the call data according to the calling convention.
fn prepare(
    descriptor: &MethodDescriptor,
    data: Option<&Value>,
    ctx: &RequestContext,
) -> Result<Prepared, Error> {
    let first = match data {
        Some(Value::Array(items)) => items.first(),
        Some(value @ Value::Object(_)) => Some(value),
        _ => None,
    };
    let mut prepared = Prepared::default();

    match descriptor.call_kind {
        CallKind::QueryRead => {
            if let Some(first) = first {
                let empty = Map::new();
                let raw = first.as_object().unwrap_or(&empty);
                let (query, extra) = normalize(raw);
                prepared.query = Some(query);
                prepared.named = Some(extra);
                prepared.cursor = 1;
            }
        }
        CallKind::FormLoad | CallKind::TreeLoad => {
            if let Some(first) = first {
                prepared.named = first.as_object().cloned();
                prepared.load_data = Some(first.clone());
                prepared.cursor = 1;
            }
        }
        CallKind::BatchCreateUpdateDestroy => {
            if let Some(first) = first {
                match &descriptor.entry_type {
                    Some(entry_type) => {
                        let (records, siblings) = extract_records(first, entry_type)?;
                        prepared.records = Some(records);
                        prepared.named = siblings;
                        prepared.cursor = 1;
                    }
                    None => {
                        if let Value::Object(object) = first {
                            let mut named = object.clone();
                            named.remove("records");
                            prepared.named = Some(named);
                        }
                    }
                }
            }
        }
        CallKind::SimpleNamed => {
            if let Some(Value::Object(object)) = data {
                prepared.named = Some(object.clone());
            }
        }
        CallKind::Poll | CallKind::FormPost | CallKind::PushStream => {
            prepared.named = Some(ctx.params().clone());
        }
        CallKind::SimplePositional => {}
    }

    Ok(prepared)
}

/// Records of a create/update/destroy call, plus the sibling keys of a
/// `{records: ...}` wrapper object.
fn extract_records(
    first: &Value,
    entry_type: &TypeDesc,
) -> Result<(Vec<Value>, Option<Map<String, Value>>), Error> {
    let convert_all = |items: &[Value]| -> Result<Vec<Value>, Error> {
        items.iter().map(|item| convert(item, entry_type)).collect()
    };

    match first {
        Value::Array(items) => Ok((convert_all(items)?, None)),
        Value::Object(object) if object.get("records").is_some_and(|r| !r.is_null()) => {
            let records = match &object["records"] {
                Value::Array(items) => convert_all(items)?,
                single => vec![convert(single, entry_type)?],
            };
            let mut siblings = object.clone();
            siblings.remove("records");
            Ok((records, Some(siblings)))
        }
        single => Ok((vec![convert(single, entry_type)?], None)),
    }
}

fn resolve_named(
    parameter: &ParameterSpec,
    value: Option<Value>,
    origin: &'static str,
) -> Result<Value, Error> {
    let value = value
        .filter(|v| !v.is_null())
        .or_else(|| parameter.default_value.clone());

    match value {
        Some(value) => convert(&value, &parameter.declared_type),
        None if parameter.required => Err(Error::MissingParameter {
            origin,
            name: parameter.display_name().to_string(),
            declared: parameter.declared_type.to_string(),
        }),
        None => Ok(parameter.declared_type.zero_value()),
    }
}

fn resolve_body(
    parameter: &ParameterSpec,
    prepared: &mut Prepared,
    positional: &[Value],
) -> Result<Value, Error> {
    let named = parameter
        .name
        .as_deref()
        .and_then(|name| prepared.named.as_ref()?.get(name));

    if let Some(value) = named {
        return convert(value, &parameter.declared_type);
    }

    if let Some(value) = positional.get(prepared.cursor) {
        prepared.cursor += 1;
        return convert(value, &parameter.declared_type);
    }

    match &parameter.default_value {
        Some(default) => convert(default, &parameter.declared_type),
        None if parameter.required => Err(Error::ParameterMismatch {
            name: parameter.display_name().to_string(),
        }),
        None => Ok(parameter.declared_type.zero_value()),
    }
}
