//! Bearer-token client authentication
//!
//! Keys are read from the current runtime snapshot on every request, so a
//! hot reload that rotates keys takes effect immediately. Both checks fail
//! closed: no configured keys means every request is rejected.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::AppError;
use crate::handlers::AppState;

/// Extract the token from an `Authorization: Bearer <token>` header
fn bearer_token(request: &Request) -> Option<&str> {
    let value = request.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Guard for the OpenAI-compatible routes
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let runtime = state.runtime();
    let authorized = bearer_token(&request)
        .is_some_and(|token| runtime.config().auth.api_keys.iter().any(|k| k == token));

    if !authorized {
        tracing::debug!(uri = %request.uri(), "Rejected request with missing or invalid API key");
        return AppError::Unauthenticated.into_response();
    }

    next.run(request).await
}

/// Guard for the admin routes
pub async fn require_admin_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let runtime = state.runtime();
    let authorized = match (&runtime.config().auth.admin_key, bearer_token(&request)) {
        (Some(expected), Some(token)) => expected == token,
        _ => false,
    };

    if !authorized {
        tracing::warn!(uri = %request.uri(), "Rejected admin request");
        return AppError::Unauthenticated.into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with(header: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/v1/models");
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&request_with(Some("Bearer sk-1"))), Some("sk-1"));
        assert_eq!(bearer_token(&request_with(Some("bearer  sk-1 "))), Some("sk-1"));
        assert_eq!(bearer_token(&request_with(Some("Basic abc"))), None);
        assert_eq!(bearer_token(&request_with(Some("Bearer "))), None);
        assert_eq!(bearer_token(&request_with(None)), None);
    }
}
