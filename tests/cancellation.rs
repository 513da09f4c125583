//! Integration tests for client disconnects during a stream
//!
//! Dropping the response body must stop the upstream read and give the
//! credential back to the pool without counting it as a credential failure.
//! The request itself is counted as unsuccessful.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use futures::StreamExt;
use serde_json::json;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tower::ServiceExt;
use zrelay::config::Config;
use zrelay::handlers::{self, AppState};
use zrelay::metrics::{Metrics, ResponseMode};
use zrelay::pool::{CredentialStatus, ReleaseOutcome};

/// Upstream that streams one event, then keeps the connection open
async fn stalling_upstream() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 8192];
                let mut received = Vec::new();
                // Headers and body arrive quickly; the body is a single JSON object
                while !received.ends_with(b"}") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => received.extend_from_slice(&buf[..n]),
                    }
                }

                let event = format!(
                    "data: {}\n\n",
                    json!({"choices": [{"delta": {"content": "first"}}]})
                );
                let response = format!(
                    "HTTP/1.1 200 OK\r\n\
                    content-type: text/event-stream\r\n\
                    transfer-encoding: chunked\r\n\r\n\
                    {:x}\r\n{}\r\n",
                    event.len(),
                    event
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.flush().await;
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        }
    });

    format!("http://{}", addr)
}

fn create_state(base_url: &str) -> AppState {
    let config: Config = format!(
        r#"
[server]
host = "127.0.0.1"
port = 8080

[auth]
api_keys = ["sk-test"]

[upstream]
protocol = "openai"
base_url = "{}"
request_timeout_seconds = 60
max_retries = 1

[[models]]
id = "gpt-4"
upstream_id = "glm-4.5"

[pool]
credentials = ["tok-a"]
"#,
        base_url
    )
    .parse()
    .expect("test config should be valid");
    AppState::new(config).unwrap()
}

fn stream_request() -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .header("authorization", "Bearer sk-test")
        .body(Body::from(
            json!({
                "model": "gpt-4",
                "messages": [{"role": "user", "content": "Hello"}],
                "stream": true
            })
            .to_string(),
        ))
        .unwrap()
}

async fn wait_for_release(state: &AppState) {
    let pool = state.runtime().pool().clone();
    for _ in 0..100 {
        if pool.in_flight() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("lease was not released after the client disconnected");
}

fn cancelled(metrics: &Metrics) -> u64 {
    metrics.release_count(ReleaseOutcome::Cancelled)
}

#[tokio::test]
async fn test_client_disconnect_releases_lease_as_cancelled() {
    let base_url = stalling_upstream().await;
    let state = create_state(&base_url);

    let response = handlers::router(state.clone())
        .oneshot(stream_request())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body().into_data_stream();
    let first = body.next().await.unwrap().unwrap();
    assert!(String::from_utf8_lossy(&first).contains("\"role\":\"assistant\""));
    assert_eq!(state.runtime().pool().in_flight(), 1);

    drop(body);
    wait_for_release(&state).await;

    let pool = state.runtime().pool().clone();
    let credential = &pool.snapshot()[0];
    assert_eq!(credential.status, CredentialStatus::Fresh);
    assert_eq!(credential.failure_count, 0);
    assert_eq!(cancelled(state.metrics()), 1);
    assert_eq!(state.metrics().mid_stream_failures_count(), 0);
    assert_eq!(
        state.metrics().request_count(ResponseMode::Streaming, false),
        1
    );
    assert_eq!(
        state.metrics().request_count(ResponseMode::Streaming, true),
        0
    );
}

#[tokio::test]
async fn test_credential_reusable_after_disconnect() {
    let base_url = stalling_upstream().await;
    let state = create_state(&base_url);

    for _ in 0..3 {
        let response = handlers::router(state.clone())
            .oneshot(stream_request())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        drop(response);
        wait_for_release(&state).await;
    }
    assert_eq!(cancelled(state.metrics()), 3);
}
