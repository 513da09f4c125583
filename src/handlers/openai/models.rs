//! OpenAI-compatible models list handler
//!
//! Handles GET /v1/models requests.

use crate::handlers::AppState;
use axum::{Json, extract::State};

use super::types::{ModelObject, ModelsListResponse};

/// GET /v1/models handler
///
/// Lists the public model ids from the `[[models]]` table, in configured
/// order. Upstream ids stay internal.
pub async fn handler(State(state): State<AppState>) -> Json<ModelsListResponse> {
    let runtime = state.runtime();
    let models = runtime
        .config()
        .models
        .iter()
        .map(|model| ModelObject::new(model.id(), model.owned_by()))
        .collect();

    Json(ModelsListResponse::new(models))
}
