//! Error types for zrelay
//!
//! All errors implement `IntoResponse` for Axum handlers and render as the
//! OpenAI error envelope, so OpenAI SDKs can parse every failure the gateway
//! returns.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::handlers::openai::extractor::OpenAiError;
use crate::pool::CredentialId;

/// Failure talking to the upstream chat provider
///
/// Bodies are kept for logs only. `AppError`'s response rendering never
/// copies them into the client-visible message.
#[derive(Error, Debug, Clone)]
pub enum UpstreamError {
    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("network error talking to upstream: {0}")]
    Network(String),

    #[error("upstream request timed out after {timeout_seconds} seconds")]
    Timeout { timeout_seconds: u64 },

    #[error("upstream stream interrupted: {reason}")]
    StreamInterrupted { reason: String },

    #[error("upstream reported an error: {message}")]
    Reported { message: String },

    #[error("malformed upstream event: {0}")]
    Protocol(String),
}

impl UpstreamError {
    /// Transient failures worth another attempt against the same credential
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// 401/403 means the credential itself was rejected
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status == 401 || *status == 403)
    }

    /// 4xx other than auth failures: the request itself is the problem
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Status { status, .. } if (400..500).contains(status))
            && !self.is_unauthorized()
    }
}

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file '{path}': {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration in '{path}': {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Missing or invalid API key")]
    Unauthenticated,

    #[error("The model '{0}' does not exist")]
    UnknownModel(String),

    #[error("'{feature}' is not supported by the upstream provider")]
    UnsupportedFeature { feature: String },

    #[error("No upstream credential available")]
    NoCredentialAvailable,

    #[error("Credential {0} does not exist")]
    CredentialNotFound(CredentialId),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status this error maps to at the gateway boundary
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::UnknownModel(_) | Self::UnsupportedFeature { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::CredentialNotFound(_) => StatusCode::NOT_FOUND,
            Self::NoCredentialAvailable => StatusCode::SERVICE_UNAVAILABLE,
            // Upstream 401/403 is the gateway's credential problem, not the client's
            Self::Upstream(err) => match err {
                UpstreamError::Status { status, .. } if err.is_client_error() => {
                    StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
                }
                UpstreamError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::BAD_GATEWAY,
            },
            Self::Config(_)
            | Self::ConfigFileRead { .. }
            | Self::ConfigParseFailed { .. }
            | Self::ConfigValidationFailed { .. }
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// OpenAI `error.type` classification
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Validation(_)
            | Self::UnknownModel(_)
            | Self::UnsupportedFeature { .. }
            | Self::CredentialNotFound(_) => "invalid_request_error",
            Self::Unauthenticated => "authentication_error",
            Self::NoCredentialAvailable => "service_unavailable",
            Self::Upstream(_) => "upstream_error",
            _ => "server_error",
        }
    }

    /// OpenAI `error.code`, when there is a stable one
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::UnknownModel(_) => Some("model_not_found"),
            Self::UnsupportedFeature { .. } => Some("unsupported_feature"),
            Self::Unauthenticated => Some("invalid_api_key"),
            Self::NoCredentialAvailable => Some("no_credential_available"),
            Self::CredentialNotFound(_) => Some("credential_not_found"),
            Self::Upstream(UpstreamError::Timeout { .. }) => Some("upstream_timeout"),
            Self::Upstream(UpstreamError::StreamInterrupted { .. }) => Some("stream_interrupted"),
            _ => None,
        }
    }

    /// Message safe to show a client
    ///
    /// Upstream bodies, tokens and config paths stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            Self::Upstream(err) => match err {
                UpstreamError::Status { status, .. } => {
                    format!("Upstream provider rejected the request (HTTP {})", status)
                }
                UpstreamError::Timeout { .. } => "Upstream provider timed out".to_string(),
                UpstreamError::StreamInterrupted { .. } => {
                    "Upstream stream ended before a response was produced".to_string()
                }
                UpstreamError::Network(_)
                | UpstreamError::Reported { .. }
                | UpstreamError::Protocol(_) => "Upstream provider request failed".to_string(),
            },
            Self::Config(_)
            | Self::ConfigFileRead { .. }
            | Self::ConfigParseFailed { .. }
            | Self::ConfigValidationFailed { .. } => "Server configuration error".to_string(),
            Self::Internal(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "Request failed");
        } else {
            tracing::debug!(status = %status, error = %self, "Request rejected");
        }

        let body = OpenAiError::new(self.client_message(), self.error_type(), self.code());
        (status, Json(body)).into_response()
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_response_status() {
        let response = AppError::Validation("test".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_unknown_model_and_unsupported_feature_are_bad_requests() {
        assert_eq!(
            AppError::UnknownModel("gpt-9".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        let err = AppError::UnsupportedFeature {
            feature: "tools".into(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), Some("unsupported_feature"));
    }

    #[test]
    fn test_unknown_credential_is_not_found() {
        let err = AppError::CredentialNotFound(CredentialId::new(7));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.code(), Some("credential_not_found"));
        assert_eq!(err.client_message(), "Credential cred-7 does not exist");
    }

    #[test]
    fn test_no_credential_is_service_unavailable() {
        assert_eq!(
            AppError::NoCredentialAvailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_upstream_status_mapping() {
        let client = AppError::from(UpstreamError::Status {
            status: 429,
            body: "slow down".into(),
        });
        assert_eq!(client.status_code(), StatusCode::TOO_MANY_REQUESTS);

        let server = AppError::from(UpstreamError::Status {
            status: 503,
            body: "down".into(),
        });
        assert_eq!(server.status_code(), StatusCode::BAD_GATEWAY);

        let timeout = AppError::from(UpstreamError::Timeout { timeout_seconds: 5 });
        assert_eq!(timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);

        let interrupted = AppError::from(UpstreamError::StreamInterrupted {
            reason: "reset".into(),
        });
        assert_eq!(interrupted.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_client_message_hides_upstream_body() {
        let err = AppError::from(UpstreamError::Status {
            status: 400,
            body: "secret-token-abc leaked".into(),
        });
        let message = err.client_message();
        assert!(!message.contains("secret-token-abc"));
        assert!(message.contains("400"));
    }

    #[test]
    fn test_upstream_error_classification() {
        let unauthorized = UpstreamError::Status {
            status: 403,
            body: String::new(),
        };
        assert!(unauthorized.is_unauthorized());
        assert!(!unauthorized.is_client_error());
        assert!(!unauthorized.is_retryable());

        let bad_request = UpstreamError::Status {
            status: 400,
            body: String::new(),
        };
        assert!(bad_request.is_client_error());
        assert!(!bad_request.is_retryable());

        assert!(UpstreamError::Network("reset".into()).is_retryable());
        assert!(
            UpstreamError::Status {
                status: 502,
                body: String::new()
            }
            .is_retryable()
        );
    }
}
