//! Health check endpoint
//!
//! Liveness plus a credential pool summary for monitoring and load balancers.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::handlers::AppState;
use crate::pool::PoolSummary;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok" while at least one credential can serve, otherwise "degraded"
    pub status: &'static str,
    pub pool: PoolSummary,
}

/// Health check handler
///
/// Always answers 200 while the process is up; a pool with no usable
/// credential is reported as "degraded" rather than failing the check.
pub async fn handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let pool = state.runtime().pool().summary();
    let status = if pool.is_serving() { "ok" } else { "degraded" };

    (StatusCode::OK, Json(HealthResponse { status, pool }))
}
