//! Admin JSON API
//!
//! Authenticated with `auth.admin_key`. Drives credential refresh and hot
//! reload; never returns a token or password in clear.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;

use crate::error::AppResult;
use crate::gateway::CredentialCheck;
use crate::handlers::AppState;
use crate::pool::{CredentialId, CredentialSnapshot, PoolSummary, RefreshSummary};

#[derive(Debug, Serialize)]
pub struct CredentialsResponse {
    pub summary: PoolSummary,
    pub credentials: Vec<CredentialSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub status: &'static str,
    pub models: usize,
    pub credentials: usize,
}

/// GET /admin/credentials
pub async fn credentials(State(state): State<AppState>) -> Json<CredentialsResponse> {
    let runtime = state.runtime();
    let pool = runtime.pool();
    Json(CredentialsResponse {
        summary: pool.summary(),
        credentials: pool.snapshot(),
    })
}

/// POST /admin/credentials/refresh
pub async fn refresh(State(state): State<AppState>) -> Json<RefreshSummary> {
    let runtime = state.runtime();
    let summary = runtime.pool().refresh_all().await;
    tracing::info!(
        refreshed = summary.refreshed,
        failed = summary.failed,
        skipped = summary.skipped,
        "Admin-triggered credential refresh finished"
    );
    Json(summary)
}

/// POST /admin/credentials/{id}/test
///
/// Sends a one-message completion with that credential's current token.
/// Pool state is left as it was, whatever the outcome.
pub async fn test_credential(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> AppResult<Json<CredentialCheck>> {
    let runtime = state.runtime();
    let check = runtime.check_credential(CredentialId::new(id)).await?;
    Ok(Json(check))
}

/// POST /admin/reload
pub async fn reload(State(state): State<AppState>) -> AppResult<Json<ReloadResponse>> {
    state.reload_from_disk().await?;
    let runtime = state.runtime();
    Ok(Json(ReloadResponse {
        status: "reloaded",
        models: runtime.config().models.len(),
        credentials: runtime.pool().len(),
    }))
}

/// GET /admin/config
pub async fn config(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.runtime().config().redacted())
}
