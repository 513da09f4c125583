//! OpenAI-compatible chat completions handler
//!
//! Handles POST /v1/chat/completions requests (both streaming and non-streaming).

use crate::error::AppError;
use crate::gateway::GatewayResponse;
use crate::handlers::AppState;
use crate::middleware::RequestId;
use axum::{
    Extension, Json,
    extract::State,
    response::{IntoResponse, Response},
};
use std::time::Duration;

use super::extractor::OpenAiJson;
use super::streaming::sse_response;
use super::types::ChatCompletionRequest;

/// POST /v1/chat/completions handler
///
/// The request body is validated during extraction; invalid bodies never
/// reach this function. `stream` selects SSE or a single JSON completion,
/// falling back to `relay.default_stream` when omitted.
///
/// Failures before any output (unknown model, unsupported field, no
/// credential, upstream error) are returned as OpenAI error JSON. Once a
/// stream has begun, failures end it with `data: [DONE]`.
pub async fn handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    OpenAiJson(request): OpenAiJson<ChatCompletionRequest>,
) -> Result<Response, AppError> {
    tracing::debug!(
        request_id = %request_id,
        model = %request.model(),
        messages_count = request.messages().len(),
        stream = ?request.stream(),
        "Received chat completions request"
    );

    let runtime = state.runtime();
    match runtime.complete(&request, request_id).await? {
        GatewayResponse::Buffered(completion) => Ok(Json(completion).into_response()),
        GatewayResponse::Streaming { first, rx } => {
            let keepalive = Duration::from_secs(runtime.config().relay.keepalive_seconds);
            Ok(sse_response(first, rx, keepalive, request_id))
        }
    }
}
