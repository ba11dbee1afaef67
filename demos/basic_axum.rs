//! A basic Ext Direct server using axum.
//!
//! This example registers a handful of remote methods (a calculator, a paged
//! store read, a form submit and a poll provider) and serves them with the
//! axum adapter of the ext-direct-rs library.
//!
//! Usage:
//!
//! ```bash
//! cargo run --example basic_axum --features axum
//! ```
//!
//! Then send requests:
//!
//! ```bash
//! curl -X POST http://localhost:3001/router \
//!   -H "Content-Type: application/json" \
//!   -d '{"action":"calc","method":"add","type":"rpc","tid":1,"data":[3,4]}'
//! ```
//!
//! Expected response:
//!
//! ```json
//! [{"type":"rpc","tid":1,"action":"calc","method":"add","result":7}]
//! ```
//!
//! This example requires the "axum" feature to be enabled.

use anyhow::Result;
use ext_direct::{
    Args, CallKind, Configuration, Dispatcher, Error, FormPostResult, MethodDescriptor,
    MethodRegistry, ParameterSpec, SortDirection, StoreResult, TypeDesc,
};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

#[derive(Debug, Clone, Serialize)]
struct Company {
    id: i64,
    name: String,
    revenue: f64,
}

fn companies() -> Vec<Company> {
    (1..=250)
        .map(|id| Company {
            id,
            name: format!("Company {id:03}"),
            revenue: (id * 1_000) as f64 / 3.0,
        })
        .collect()
}

/// Store read with paging and single-column sorting.
async fn read_companies(args: Args) -> Result<StoreResult<Company>, Error> {
    let query = args.query(0)?;
    info!("Reading companies: {:?}", query);

    let mut rows = companies();
    if let Some(sorter) = query.first_sorter() {
        match sorter.property.as_str() {
            "revenue" => rows.sort_by(|a, b| a.revenue.total_cmp(&b.revenue)),
            "name" => rows.sort_by(|a, b| a.name.cmp(&b.name)),
            _ => rows.sort_by_key(|c| c.id),
        }
        if sorter.direction == SortDirection::Descending {
            rows.reverse();
        }
    }

    let total = rows.len();
    let (from, to) = query.page_bounds(total);
    Ok(StoreResult::new(rows[from..to].to_vec()).with_total(total as u64))
}

/// Form submit validating a single field.
async fn save_contact(args: Args) -> Result<FormPostResult, Error> {
    let email: String = args.get(0)?;

    let mut result = FormPostResult::success();
    if !email.contains('@') {
        result.add_error("email", "Please enter a valid email address");
    }
    Ok(result)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(std::io::stderr)
        .init();

    info!("Initializing basic Ext Direct server");

    let mut registry = MethodRegistry::new();
    registry.register(
        MethodDescriptor::new("calc", "add", CallKind::SimplePositional)
            .param(ParameterSpec::positional(TypeDesc::Int))
            .param(ParameterSpec::positional(TypeDesc::Int)),
        |args| async move {
            let a: i64 = args.get(0)?;
            let b: i64 = args.get(1)?;
            Ok(a + b)
        },
    )?;
    registry.register(
        MethodDescriptor::new("calc", "divide", CallKind::SimplePositional)
            .param(ParameterSpec::positional(TypeDesc::Float))
            .param(ParameterSpec::positional(TypeDesc::Float)),
        |args| async move {
            let a: f64 = args.get(0)?;
            let b: f64 = args.get(1)?;
            if b == 0.0 {
                return Err(Error::handler("ArithmeticException", "Division by zero"));
            }
            Ok(a / b)
        },
    )?;
    registry.register(
        MethodDescriptor::new("company", "read", CallKind::QueryRead)
            .param(ParameterSpec::query_request()),
        read_companies,
    )?;
    registry.register(
        MethodDescriptor::new("contact", "save", CallKind::FormPost)
            .param(ParameterSpec::body("email", TypeDesc::String).with_default("")),
        save_contact,
    )?;
    registry.register(
        MethodDescriptor::new("clock", "now", CallKind::Poll).event("tick"),
        |_args| async move {
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default();
            Ok::<Value, Error>(json!({ "millis": now }))
        },
    )?;

    let config = Configuration::new()
        .with_send_exception_message(true)
        .with_exception_message("ArithmeticException", Some("Cannot divide by zero"));
    let app = ext_direct::axum::router(Dispatcher::new(registry, config));

    let addr: std::net::SocketAddr = "127.0.0.1:3001".parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;

    info!("Server started on http://{}", local_addr);
    info!("Router endpoint: http://{}/router", local_addr);
    info!("Available methods:");
    info!("  - calc.add: Sum of two integers");
    info!("  - calc.divide: Quotient, fails on division by zero");
    info!("  - company.read: Paged and sorted store read");
    info!("  - contact.save: Form submit (POST /form)");
    info!("  - clock.now: Poll provider (GET /poll/clock/now/tick)");
    info!("");
    info!("Example request:");
    info!(
        "  curl -X POST http://{}/router -H \"Content-Type: application/json\" -d '{{\"action\":\"company\",\"method\":\"read\",\"type\":\"rpc\",\"tid\":1,\"data\":[{{\"page\":2,\"limit\":5,\"sort\":\"revenue\",\"dir\":\"DESC\"}}]}}'",
        local_addr
    );

    axum::serve(listener, app).await?;

    Ok(())
}
