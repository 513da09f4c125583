//! Integration tests for Prometheus instrumentation of real requests
//!
//! Drives requests through the router and checks the counters an operator
//! would alert on.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{header, method};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zrelay::config::Config;
use zrelay::handlers::{self, AppState};
use zrelay::metrics::{AlertReason, LeaseResult, UpstreamOutcome};
use zrelay::pool::ReleaseOutcome;

fn create_state(base_url: &str, credentials: &str) -> AppState {
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
max_retries = 2
retry_backoff_ms = 1

[[models]]
id = "gpt-4"
upstream_id = "glm-4.5"

[pool]
credentials = [{}]
"#,
        base_url, credentials
    )
    .parse()
    .expect("test config should be valid");
    AppState::new(config).unwrap()
}

fn completion_request(stream: bool) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .header("authorization", "Bearer sk-test")
        .body(Body::from(
            json!({
                "model": "gpt-4",
                "messages": [{"role": "user", "content": "Hello"}],
                "stream": stream
            })
            .to_string(),
        ))
        .unwrap()
}

fn ok_stream() -> ResponseTemplate {
    let body = format!(
        "data: {}\n\ndata: {}\n\ndata: [DONE]\n\n",
        json!({"choices": [{"delta": {"content": "Hi"}}]}),
        json!({"choices": [{"delta": {}, "finish_reason": "stop"}]})
    );
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

async fn scrape(state: &AppState) -> String {
    let response = handlers::router(state.clone())
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_successful_requests_are_counted_per_mode() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ok_stream())
        .mount(&server)
        .await;
    let state = create_state(&server.uri(), r#""tok-a""#);

    for stream in [false, true] {
        let response = handlers::router(state.clone())
            .oneshot(completion_request(stream))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        // Drain the body so the stream pump finishes
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
    }

    let body = scrape(&state).await;
    assert!(body.contains("zrelay_requests_total{mode=\"buffered\",outcome=\"success\"} 1"));
    assert!(body.contains("zrelay_requests_total{mode=\"streaming\",outcome=\"success\"} 1"));

    let metrics = state.metrics();
    assert_eq!(metrics.lease_count(LeaseResult::Granted), 2);
    assert_eq!(metrics.release_count(ReleaseOutcome::Success), 2);
    assert_eq!(metrics.upstream_attempt_count(UpstreamOutcome::Success), 2);
    assert_eq!(metrics.active_leases(), 0);
}

#[tokio::test]
async fn test_failures_are_counted_by_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer tok-a"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer tok-b"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let state = create_state(&server.uri(), r#""tok-a", "tok-b""#);

    let response = handlers::router(state.clone())
        .oneshot(completion_request(false))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let metrics = state.metrics();
    assert_eq!(metrics.upstream_attempt_count(UpstreamOutcome::Unauthorized), 1);
    assert_eq!(metrics.upstream_attempt_count(UpstreamOutcome::Retryable), 2);
    assert_eq!(metrics.release_count(ReleaseOutcome::Unauthorized), 1);
    assert_eq!(metrics.release_count(ReleaseOutcome::Failure), 1);
    assert_eq!(metrics.alert_count(AlertReason::Revoked), 1);

    let body = scrape(&state).await;
    assert!(body.contains("zrelay_requests_total{mode=\"buffered\",outcome=\"error\"} 1"));
}
