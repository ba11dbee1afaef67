//! Declared parameter types and value coercion.
//!
//! Call data arrives loosely typed. Before a value is handed to a handler it is
//! coerced to the parameter's [`TypeDesc`]: first by the scalar conversion
//! rules (strings to numbers, booleans, dates, enums, numeric widening), then,
//! if those do not apply, by structured mapping of JSON objects onto a
//! [`RecordSchema`].

use std::fmt;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::{Map, Number, Value};

use crate::error::Error;

/// Semantic type of a handler parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDesc {
    /// Accepts any JSON value unchanged.
    Any,
    Bool,
    Int,
    Float,
    String,
    /// RFC 3339 timestamp or ISO `YYYY-MM-DD` date, kept as a string.
    Date,
    /// One of the listed variant names.
    Enum(Vec<String>),
    List(Box<TypeDesc>),
    Record(RecordSchema),
}

impl TypeDesc {
    pub fn list_of(inner: TypeDesc) -> Self {
        Self::List(Box::new(inner))
    }

    pub fn enumeration<I, S>(variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Enum(variants.into_iter().map(Into::into).collect())
    }

    /// Value bound to an absent, optional parameter.
    pub fn zero_value(&self) -> Value {
        match self {
            TypeDesc::Bool => Value::Bool(false),
            TypeDesc::Int => Value::from(0),
            TypeDesc::Float => Value::from(0.0),
            _ => Value::Null,
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (TypeDesc::Any, _) => true,
            (TypeDesc::Bool, Value::Bool(_)) => true,
            (TypeDesc::Int, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (TypeDesc::Float, Value::Number(n)) => n.is_f64(),
            (TypeDesc::String, Value::String(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::Any => write!(f, "Any"),
            TypeDesc::Bool => write!(f, "Bool"),
            TypeDesc::Int => write!(f, "Int"),
            TypeDesc::Float => write!(f, "Float"),
            TypeDesc::String => write!(f, "String"),
            TypeDesc::Date => write!(f, "Date"),
            TypeDesc::Enum(variants) => write!(f, "Enum({})", variants.join("|")),
            TypeDesc::List(inner) => write!(f, "List<{}>", inner),
            TypeDesc::Record(schema) => write!(f, "{}", schema.name),
        }
    }
}

/// Field layout of a record type.
///
/// A schema without fields accepts any JSON object as is.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSchema {
    pub name: String,
    pub fields: Vec<(String, TypeDesc)>,
}

impl RecordSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, ty: TypeDesc) -> Self {
        self.fields.push((name.into(), ty));
        self
    }
}

/// Coerce `value` to the declared type.
///
/// `null` converts to `null` for every type.
pub fn convert(value: &Value, ty: &TypeDesc) -> Result<Value, Error> {
    if value.is_null() || ty.matches(value) {
        return Ok(value.clone());
    }

    if let Some(converted) = convert_scalar(value, ty)? {
        return Ok(converted);
    }

    map_structured(value, ty)
}

/// Scalar conversion rules. `Ok(None)` means "not a scalar conversion".
fn convert_scalar(value: &Value, ty: &TypeDesc) -> Result<Option<Value>, Error> {
    let converted = match (ty, value) {
        (TypeDesc::Bool, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "" => Value::Null,
            "true" | "on" | "yes" | "1" => Value::Bool(true),
            "false" | "off" | "no" | "0" => Value::Bool(false),
            _ => return Err(Error::conversion(ty, value)),
        },
        (TypeDesc::Bool, Value::Number(n)) => match n.as_i64() {
            Some(0) => Value::Bool(false),
            Some(1) => Value::Bool(true),
            _ => return Err(Error::conversion(ty, value)),
        },
        (TypeDesc::Int, Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Value::Null
            } else {
                trimmed
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| Error::conversion(ty, value))?
            }
        }
        (TypeDesc::Int, Value::Number(n)) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                Value::from(f as i64)
            }
            _ => return Err(Error::conversion(ty, value)),
        },
        (TypeDesc::Float, Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Value::Null
            } else {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| Error::conversion(ty, value))?
            }
        }
        (TypeDesc::Float, Value::Number(n)) => n
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| Error::conversion(ty, value))?,
        (TypeDesc::String, Value::Number(n)) => Value::String(n.to_string()),
        (TypeDesc::String, Value::Bool(b)) => Value::String(b.to_string()),
        (TypeDesc::Date, Value::String(s)) => {
            Value::String(parse_date(s).ok_or_else(|| Error::conversion(ty, value))?)
        }
        (TypeDesc::Date, Value::Number(n)) => {
            let millis = n.as_i64().ok_or_else(|| Error::conversion(ty, value))?;
            let date = DateTime::<Utc>::from_timestamp_millis(millis)
                .ok_or_else(|| Error::conversion(ty, value))?;
            Value::String(date.to_rfc3339_opts(SecondsFormat::Millis, true))
        }
        (TypeDesc::Enum(variants), Value::String(s)) => {
            let trimmed = s.trim();
            if variants.iter().any(|v| v == trimmed) {
                Value::String(trimmed.to_string())
            } else {
                return Err(Error::conversion(ty, value));
            }
        }
        (TypeDesc::List(inner), Value::String(s)) => {
            let items: Result<Vec<Value>, Error> = s
                .split(',')
                .map(|item| convert(&Value::String(item.trim().to_string()), inner))
                .collect();
            Value::Array(items?)
        }
        _ => return Ok(None),
    };

    Ok(Some(converted))
}

/// Structured mapping of arrays and objects.
fn map_structured(value: &Value, ty: &TypeDesc) -> Result<Value, Error> {
    match (ty, value) {
        (TypeDesc::List(inner), Value::Array(items)) => {
            let items: Result<Vec<Value>, Error> =
                items.iter().map(|item| convert(item, inner)).collect();
            Ok(Value::Array(items?))
        }
        (TypeDesc::List(inner), single) => Ok(Value::Array(vec![convert(single, inner)?])),
        (TypeDesc::Record(schema), Value::Object(object)) => map_record(object, schema),
        _ => Err(Error::conversion(ty, value)),
    }
}

fn map_record(object: &Map<String, Value>, schema: &RecordSchema) -> Result<Value, Error> {
    if schema.fields.is_empty() {
        return Ok(Value::Object(object.clone()));
    }

    let mut record = Map::new();
    for (name, field_type) in &schema.fields {
        if let Some(field_value) = object.get(name) {
            record.insert(name.clone(), convert(field_value, field_type)?);
        }
    }
    Ok(Value::Object(record))
}

fn parse_date(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(date.to_rfc3339_opts(SecondsFormat::AutoSi, true));
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .map(|date| date.format("%Y-%m-%d").to_string())
}
