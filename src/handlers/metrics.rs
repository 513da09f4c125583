//! Prometheus scrape endpoint

use axum::{
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::handlers::AppState;

/// Serve the registry in the Prometheus text exposition format
///
/// ```bash
/// curl http://localhost:8080/metrics
/// # HELP zrelay_requests_total Total chat completion requests by response mode and outcome
/// # TYPE zrelay_requests_total counter
/// zrelay_requests_total{mode="streaming",outcome="success"} 42
/// ```
///
/// An encoding failure answers 500 with a fixed body; the cause is logged.
pub async fn handler(State(state): State<AppState>) -> Response {
    match state.metrics().gather() {
        Ok(output) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], output).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics for scraping");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::metrics::{LeaseResult, ResponseMode};

    fn create_test_state() -> AppState {
        let config: Config = r#"
            [server]
            host = "127.0.0.1"
            port = 3000

            [[models]]
            id = "GLM-4.5"
            upstream_id = "0727-360B-API"
        "#
        .parse()
        .unwrap();
        AppState::new(config).unwrap()
    }

    async fn scrape(state: AppState) -> (StatusCode, String) {
        let response = handler(State(state)).await;
        let status = response.status();
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            prometheus::TEXT_FORMAT
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_metrics_handler_returns_prometheus_format() {
        let state = create_test_state();
        state
            .metrics()
            .record_request(ResponseMode::Streaming, true);

        let (status, body) = scrape(state).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("# TYPE zrelay_requests_total counter"));
        assert!(body.contains("zrelay_requests_total{mode=\"streaming\",outcome=\"success\"} 1"));
    }

    #[tokio::test]
    async fn test_metrics_output_valid_prometheus_format() {
        let state = create_test_state();
        let metrics = state.metrics();
        metrics.record_request(ResponseMode::Buffered, false);
        metrics.record_lease(LeaseResult::TimedOut);
        metrics.observe_first_byte(12.5);

        let (status, body) = scrape(state).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("# TYPE zrelay_upstream_first_byte_ms histogram"));

        let metric_lines: Vec<&str> = body
            .lines()
            .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
            .collect();
        assert!(!metric_lines.is_empty());

        let mut seen = std::collections::HashSet::new();
        for line in metric_lines {
            assert!(line.starts_with("zrelay_"), "unexpected metric line: {}", line);
            let last_token = line.split_whitespace().last().unwrap();
            assert!(
                last_token.parse::<f64>().is_ok() || last_token == "+Inf",
                "Should end with numeric value: {}",
                line
            );
            let name = line.split_whitespace().next().unwrap();
            assert!(seen.insert(name), "Duplicate metric line: {}", name);
        }
    }

    #[tokio::test]
    async fn test_concurrent_metrics_scraping() {
        let state = create_test_state();
        for i in 0..50 {
            state
                .metrics()
                .record_request(ResponseMode::Buffered, i % 2 == 0);
        }

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let state = state.clone();
                tokio::spawn(async move { scrape(state).await })
            })
            .collect();
        let results = futures::future::join_all(handles).await;

        let first = &results[0].as_ref().unwrap().1;
        for result in &results {
            let (status, body) = result.as_ref().unwrap();
            assert_eq!(*status, StatusCode::OK);
            assert_eq!(body, first);
        }
    }
}
