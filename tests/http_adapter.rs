//! Integration tests for the axum adapter.
//!
//! This test suite starts the adapter on an ephemeral local port and talks to
//! it over real HTTP with reqwest, covering the router, form, poll and
//! server-sent event endpoints.
//!
//! Run test:
//!
//! ```shell
//! cargo test --test http_adapter --features axum
//! ```

pub mod common;

#[cfg(test)]
mod tests {
    use reqwest::{Client, StatusCode, header};
    use serde_json::{Value, json};
    use tokio::net::TcpListener;
    use tokio::time::Duration;

    use ext_direct::{Configuration, Dispatcher};

    use super::common;

    /// Serve the shared registry on 127.0.0.1 and return the base URL.
    async fn start_server(config: Configuration) -> String {
        common::init_tracing();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = ext_direct::axum::router(Dispatcher::new(common::registry(), config));

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{addr}")
    }

    fn client() -> Client {
        Client::builder()
            .timeout(Duration::from_secs(5))
            .connect_timeout(Duration::from_secs(5))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn router_call_is_buffered_json() {
        let base = start_server(Configuration::default()).await;

        let response = client()
            .post(format!("{base}/router"))
            .json(&json!({"action": "calc", "method": "add", "type": "rpc", "tid": 1, "data": [3, 4]}))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        assert!(response.content_length().is_some());

        let body: Value = response.json().await.unwrap();
        assert_eq!(
            body,
            json!([{"type": "rpc", "tid": 1, "action": "calc", "method": "add", "result": 7}])
        );
    }

    #[tokio::test]
    async fn streamed_router_response_is_same_document() {
        let base = start_server(Configuration::new().with_stream_response(true)).await;

        let response = client()
            .post(format!("{base}/router"))
            .json(&json!([
                {"action": "calc", "method": "add", "type": "rpc", "tid": 1, "data": [1, 1]},
                {"action": "ghost", "method": "boo", "type": "rpc", "tid": 2},
            ]))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.content_length().is_none());

        let body: Vec<Value> = response.json().await.unwrap();
        assert_eq!(body.len(), 2);
        assert_eq!(body[0]["result"], 2);
        assert_eq!(body[1]["type"], "exception");
    }

    #[tokio::test]
    async fn malformed_body_still_gets_exception_array() {
        let base = start_server(Configuration::default()).await;

        let response = client()
            .post(format!("{base}/router"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(r#"{"action":"calc","method":"add""#)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: Vec<Value> = response.json().await.unwrap();
        assert_eq!(body.len(), 1);
        assert_eq!(body[0]["type"], "exception");
        assert_eq!(body[0]["tid"], Value::Null);
    }

    #[tokio::test]
    async fn headers_and_session_reach_handlers() {
        let base = start_server(Configuration::default()).await;
        let call = json!({"action": "calc", "method": "tenant", "type": "rpc", "tid": 1, "data": []});

        let defaulted: Value = client()
            .post(format!("{base}/router"))
            .json(&call)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(
            defaulted[0]["result"],
            json!({"tenant": "main", "session": null})
        );

        let explicit: Value = client()
            .post(format!("{base}/router"))
            .header("X-Tenant", "north")
            .header(header::COOKIE, "session_id=abc")
            .json(&call)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(
            explicit[0]["result"],
            json!({"tenant": "north", "session": "abc"})
        );
    }

    #[tokio::test]
    async fn poll_endpoint_returns_event() {
        let base = start_server(Configuration::default()).await;

        let body: Value = client()
            .get(format!("{base}/poll/ticker/price/price?symbol=ACME"))
            .header(header::ACCEPT_LANGUAGE, "de-CH,de;q=0.9")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(
            body,
            json!({
                "type": "event",
                "name": "price",
                "data": {"symbol": "ACME", "price": 42.5, "locale": "de-CH"}
            })
        );
    }

    #[tokio::test]
    async fn form_post_responds_or_redirects() {
        let base = start_server(Configuration::default()).await;

        let response = client()
            .post(format!("{base}/form"))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("extAction=profile&extMethod=save&extTID=3&extType=rpc&name=Ann&email=ann%40example.com")
            .send()
            .await
            .unwrap();
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["type"], "rpc");
        assert_eq!(body["tid"], 3);
        assert_eq!(body["result"], json!({"success": true}));

        let response = client()
            .post(format!("{base}/form"))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("extAction=profile&extMethod=legacySave&extTID=4&extType=rpc")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()[header::LOCATION], "/legacy/profile");
    }

    #[tokio::test]
    async fn push_stream_is_server_sent_events() {
        let base = start_server(Configuration::default()).await;

        let response = client()
            .get(format!("{base}/sse/feed/ticks?count=2"))
            .send()
            .await
            .unwrap();
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );

        let text = response.text().await.unwrap();
        for line in ["id: 0", "data: tick 0", "id: 1", "data: tick 1", "data: done"] {
            assert!(text.lines().any(|l| l == line), "missing {line:?} in {text:?}");
        }
    }
}
