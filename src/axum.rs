//! Axum integration for the Ext Direct router.
//!
//! This module provides an optional integration between the [`Dispatcher`] and
//! the axum web framework. Enable the `axum` feature in Cargo.toml to use it.
//!
//! Axum handles the HTTP transport; the dispatcher handles the Ext Direct
//! protocol. The handlers here only translate between the two: request
//! headers, query parameters, locale and session identity become a
//! [`RequestContext`], and dispatcher results become HTTP responses.
//!
//! ```toml
//! [dependencies]
//! ext-direct-rs = { version = "0.1", features = ["axum"] }
//! ```
//!
//! | Route                            | Purpose                           |
//! |----------------------------------|-----------------------------------|
//! | `POST /router`                   | router envelope (single or batch) |
//! | `POST /form`                     | form submission                   |
//! | `GET /poll/{action}/{method}/{event}` | poll provider                |
//! | `GET /sse/{action}/{method}`     | push stream as server-sent events |
//!
//! # Example
//!
//! ```no_run
//! use ext_direct::{Configuration, Dispatcher, MethodRegistry};
//!
//! # async fn run() -> std::io::Result<()> {
//! let dispatcher = Dispatcher::new(MethodRegistry::new(), Configuration::default());
//! let app = ext_direct::axum::router(dispatcher);
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! axum::serve(listener, app).await
//! # }
//! ```

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::extract::{Path, Query, Request, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use futures::stream::{self, Stream};
use http::request::Parts;
use http::{HeaderMap, StatusCode, header};
use tracing::{debug, error};

use crate::context::{PushEvent, RequestContext};
use crate::dispatcher::{Dispatcher, FormPostOutcome};

/// Request bodies larger than this are rejected.
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Header carrying the client session identity.
pub const SESSION_HEADER: &str = "x-session-id";

/// Cookie consulted when [`SESSION_HEADER`] is absent.
pub const SESSION_COOKIE: &str = "session_id";

/// Build an axum router serving all Ext Direct endpoints of `dispatcher`.
pub fn router(dispatcher: Dispatcher) -> Router {
    Router::new()
        .route("/router", post(router_handler))
        .route("/form", post(form_handler))
        .route("/poll/{action}/{method}/{event}", get(poll_handler))
        .route("/sse/{action}/{method}", get(sse_handler))
        .with_state(dispatcher)
}

/// Axum handler for router envelopes.
///
/// The response is buffered unless the configuration or one of the invoked
/// methods asks for streaming, in which case every call response is sent as
/// its own chunk.
pub async fn router_handler(State(dispatcher): State<Dispatcher>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let ctx = context_from_parts(&parts);

    let bytes = match to_bytes(body, MAX_BODY_SIZE).await {
        Ok(b) => b,
        Err(e) => {
            error!("Failed to read request body: {}", e);
            return (StatusCode::BAD_REQUEST, "Failed to read request body").into_response();
        }
    };

    debug!("Processing router request of {} bytes", bytes.len());

    let batch = dispatcher.dispatch(&bytes, &ctx).await;
    if batch.stream_response {
        return match chunked(&batch.responses) {
            Ok(chunks) => {
                let body = Body::from_stream(stream::iter(
                    chunks.into_iter().map(Ok::<_, Infallible>),
                ));
                json_response(body)
            }
            Err(e) => serialization_failure(e),
        };
    }

    match batch.to_json() {
        Ok(json) => {
            debug!("Sending router response: {}", json);
            json_response(Body::from(json))
        }
        Err(e) => serialization_failure(e),
    }
}

/// Axum handler for form submissions. Form fields and query parameters are
/// both visible to the handler as request parameters.
pub async fn form_handler(
    State(dispatcher): State<Dispatcher>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Form(fields): Form<HashMap<String, String>>,
) -> Response {
    let mut ctx = context_from_headers(&headers);
    for (name, value) in query.into_iter().chain(fields) {
        ctx = ctx.with_param(name, value);
    }

    match dispatcher.form_post(&ctx).await {
        FormPostOutcome::Forward(target) => Redirect::temporary(&target).into_response(),
        FormPostOutcome::Response(response) => Json(response).into_response(),
    }
}

/// Axum handler for poll providers.
pub async fn poll_handler(
    State(dispatcher): State<Dispatcher>,
    Path((action, method, event)): Path<(String, String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let mut ctx = context_from_headers(&headers);
    for (name, value) in query {
        ctx = ctx.with_param(name, value);
    }

    Json(dispatcher.poll(&action, &method, &event, &ctx).await).into_response()
}

/// Axum handler rendering a push stream as server-sent events.
pub async fn sse_handler(
    State(dispatcher): State<Dispatcher>,
    Path((action, method)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut ctx = context_from_headers(&headers);
    for (name, value) in query {
        ctx = ctx.with_param(name, value);
    }

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<PushEvent>();
    tokio::spawn(async move {
        if let Err(e) = dispatcher.stream(&action, &method, &ctx, Arc::new(tx)).await {
            debug!("Push stream {}.{} ended early: {}", action, method, e);
        }
    });

    let events = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok::<_, Infallible>(sse_event(event)), rx))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

fn sse_event(event: PushEvent) -> Event {
    let mut sse = Event::default();
    if let Some(id) = event.id {
        sse = sse.id(id);
    }
    if let Some(name) = event.event {
        sse = sse.event(name);
    }
    if let Some(data) = event.data {
        sse = sse.data(data);
    }
    if let Some(retry) = event.retry {
        sse = sse.retry(Duration::from_millis(retry));
    }
    if let Some(comment) = event.comment {
        sse = sse.comment(comment);
    }
    sse
}

fn context_from_parts(parts: &Parts) -> RequestContext {
    let mut ctx = context_from_headers(&parts.headers);
    if let Ok(Query(query)) = Query::<HashMap<String, String>>::try_from_uri(&parts.uri) {
        for (name, value) in query {
            ctx = ctx.with_param(name, value);
        }
    }
    ctx
}

fn context_from_headers(headers: &HeaderMap) -> RequestContext {
    let mut ctx = RequestContext::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            ctx = ctx.with_header(name.as_str(), value);
        }
    }

    if let Some(locale) = header_str(headers, header::ACCEPT_LANGUAGE.as_str()).and_then(locale) {
        ctx = ctx.with_locale(locale);
    }
    if let Some(session) = session_id(headers) {
        ctx = ctx.with_session(session);
    }
    ctx
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Preferred language tag of an `Accept-Language` header.
fn locale(accept_language: &str) -> Option<String> {
    accept_language
        .split(',')
        .next()
        .and_then(|tag| tag.split(';').next())
        .map(str::trim)
        .filter(|tag| !tag.is_empty() && *tag != "*")
        .map(str::to_string)
}

fn session_id(headers: &HeaderMap) -> Option<String> {
    if let Some(session) = header_str(headers, SESSION_HEADER) {
        return Some(session.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

/// Encode each call response separately so they can be flushed one by one.
fn chunked(responses: &[crate::CallResponse]) -> Result<Vec<String>, serde_json::Error> {
    let mut chunks = Vec::with_capacity(responses.len() + 2);
    chunks.push("[".to_string());
    for (i, response) in responses.iter().enumerate() {
        let json = serde_json::to_string(response)?;
        chunks.push(if i == 0 { json } else { format!(",{json}") });
    }
    chunks.push("]".to_string());
    Ok(chunks)
}

fn json_response(body: Body) -> Response {
    (StatusCode::OK, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

fn serialization_failure(e: impl std::fmt::Display) -> Response {
    error!("Failed to serialize router response: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, "Failed to serialize response").into_response()
}
