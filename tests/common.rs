//! Common fixtures for integration tests.
//!
//! This module provides the method registry shared by the dispatch and HTTP
//! adapter tests, plus tracing setup so failing tests can be run with
//! `RUST_LOG=debug` for detail.

use std::time::Duration;

use ext_direct::{
    Args, CallKind, Error, FormPostResult, FrameworkParam, MethodDescriptor, MethodRegistry,
    ParameterSpec, PushEvent, RecordSchema, SortDirection, StoreResult, TypeDesc,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Row of the in-memory user table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

pub fn row_type() -> TypeDesc {
    TypeDesc::Record(
        RecordSchema::new("Row")
            .field("id", TypeDesc::Int)
            .field("name", TypeDesc::String),
    )
}

/// One hundred rows with ids 0 to 99.
pub fn rows() -> Vec<Row> {
    (0..100)
        .map(|id| Row {
            id,
            name: format!("user{id:02}"),
        })
        .collect()
}

/// Install a tracing subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn read_users(args: Args) -> Result<StoreResult<Row>, Error> {
    let query = args.query(0)?;
    let mut rows = rows();

    if let Some(sorter) = query.first_sorter() {
        match sorter.property.as_str() {
            "name" => rows.sort_by(|a, b| a.name.cmp(&b.name)),
            _ => rows.sort_by_key(|row| row.id),
        }
        if sorter.direction == SortDirection::Descending {
            rows.reverse();
        }
    }

    let total = rows.len();
    let (from, to) = query.page_bounds(total);
    Ok(StoreResult::new(rows[from..to].to_vec()).with_total(total as u64))
}

async fn divide(args: Args) -> Result<f64, Error> {
    let a: f64 = args.get(0)?;
    let b: f64 = args.get(1)?;
    if b == 0.0 {
        return Err(Error::handler("ArithmeticException", "Division by zero"));
    }
    Ok(a / b)
}

async fn explode(_args: Args) -> Result<(), Error> {
    panic!("kaboom")
}

async fn save_profile(args: Args) -> Result<FormPostResult, Error> {
    let email: Option<String> = args.get(1)?;

    let mut result = FormPostResult::success();
    match email {
        Some(email) if email.contains('@') => {}
        _ => result.add_error("email", "Invalid email address"),
    }
    Ok(result)
}

async fn feed(args: Args) -> Result<&'static str, Error> {
    let writer = args.push_writer(0)?;
    let count: i64 = args.get(1)?;

    for i in 0..count {
        writer.write(PushEvent::data(format!("tick {i}")).with_id(i.to_string()))?;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok("done")
}

/// Registry with one method of every calling convention.
pub fn registry() -> MethodRegistry {
    let mut registry = MethodRegistry::new();

    registry
        .register(
            MethodDescriptor::new("calc", "add", CallKind::SimplePositional)
                .param(ParameterSpec::positional(TypeDesc::Int))
                .param(ParameterSpec::positional(TypeDesc::Int)),
            |args| async move {
                let a: i64 = args.get(0)?;
                let b: i64 = args.get(1)?;
                Ok(a + b)
            },
        )
        .unwrap();

    registry
        .register(
            MethodDescriptor::new("calc", "divide", CallKind::SimplePositional)
                .param(ParameterSpec::positional(TypeDesc::Float))
                .param(ParameterSpec::positional(TypeDesc::Float)),
            divide,
        )
        .unwrap();

    registry
        .register(
            MethodDescriptor::new("calc", "explode", CallKind::SimplePositional),
            explode,
        )
        .unwrap();

    registry
        .register(
            MethodDescriptor::new("calc", "tenant", CallKind::SimplePositional)
                .param(ParameterSpec::header("X-Tenant", TypeDesc::String).with_default("main"))
                .param(ParameterSpec::framework(FrameworkParam::Session)),
            |args| async move {
                let tenant: String = args.get(0)?;
                let session: Option<String> = args.get(1)?;
                Ok(json!({"tenant": tenant, "session": session}))
            },
        )
        .unwrap();

    registry
        .register(
            MethodDescriptor::new("user", "create", CallKind::SimpleNamed)
                .param(ParameterSpec::body("name", TypeDesc::String))
                .param(ParameterSpec::body("age", TypeDesc::Int).optional()),
            |args| async move {
                let name: String = args.get(0)?;
                let age: i64 = args.get(1)?;
                Ok(json!({"name": name, "age": age}))
            },
        )
        .unwrap();

    registry
        .register(
            MethodDescriptor::new("users", "read", CallKind::QueryRead)
                .param(ParameterSpec::query_request()),
            read_users,
        )
        .unwrap();

    registry
        .register(
            MethodDescriptor::new("users", "inspect", CallKind::QueryRead)
                .param(ParameterSpec::query_request()),
            |args| async move { Ok(args.query(0)?.clone()) },
        )
        .unwrap();

    registry
        .register(
            MethodDescriptor::new("users", "update", CallKind::BatchCreateUpdateDestroy)
                .entry_type(row_type())
                .param(ParameterSpec::records()),
            |args| async move { args.records::<Row>(0) },
        )
        .unwrap();

    registry
        .register(
            MethodDescriptor::new("profile", "load", CallKind::FormLoad)
                .param(ParameterSpec::request_param("id", TypeDesc::Int)),
            |args| async move {
                let id: i64 = args.get(0)?;
                Ok(json!({"id": id, "name": "Ann"}))
            },
        )
        .unwrap();

    registry
        .register(
            MethodDescriptor::new("profile", "save", CallKind::FormPost)
                .param(ParameterSpec::body("name", TypeDesc::String))
                .param(ParameterSpec::body("email", TypeDesc::String).optional()),
            save_profile,
        )
        .unwrap();

    registry
        .register(
            MethodDescriptor::new("profile", "legacySave", CallKind::FormPost)
                .forward_to("/legacy/profile"),
            |_args| async move { Ok(Value::Null) },
        )
        .unwrap();

    registry
        .register(
            MethodDescriptor::new("ticker", "price", CallKind::Poll)
                .event("price")
                .param(ParameterSpec::request_param("symbol", TypeDesc::String))
                .param(ParameterSpec::framework(FrameworkParam::Locale)),
            |args| async move {
                let symbol: String = args.get(0)?;
                let locale: Option<String> = args.get(1)?;
                Ok(json!({"symbol": symbol, "price": 42.5, "locale": locale}))
            },
        )
        .unwrap();

    registry
        .register(
            MethodDescriptor::new("feed", "ticks", CallKind::PushStream)
                .param(ParameterSpec::framework(FrameworkParam::PushWriter))
                .param(ParameterSpec::request_param("count", TypeDesc::Int).with_default(3)),
            feed,
        )
        .unwrap();

    registry
}
