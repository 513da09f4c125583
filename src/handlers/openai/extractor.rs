//! Request body extraction with OpenAI-style rejections
//!
//! Clients of `/v1/chat/completions` are OpenAI SDKs, which only understand
//! the `{"error": {...}}` envelope. Every way a body can fail to decode is
//! answered in that envelope, with `param` naming the offending field when
//! serde reports a path.

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

const DESERIALIZE_PREFIX: &str = "Failed to deserialize the JSON body into the target type: ";
const PARSE_PREFIX: &str = "Failed to parse the request body as JSON: ";

/// The OpenAI error envelope
///
/// ```json
/// {"error": {"message": "...", "type": "invalid_request_error", "param": null, "code": null}}
/// ```
#[derive(Debug, Serialize, Deserialize)]
pub struct OpenAiError {
    pub error: OpenAiErrorBody,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OpenAiErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    pub param: Option<String>,
    pub code: Option<String>,
}

impl OpenAiError {
    pub fn new(message: impl Into<String>, error_type: &str, code: Option<&str>) -> Self {
        Self {
            error: OpenAiErrorBody {
                message: message.into(),
                error_type: error_type.to_string(),
                param: None,
                code: code.map(str::to_string),
            },
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(message, "invalid_request_error", None)
    }

    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.error.param = Some(param.into());
        self
    }
}

/// A body that could not become the handler's request type
///
/// Status is 415 for a missing JSON content type, 413 for a body over the
/// router's limit, and 400 for everything else. Axum's 422 for data errors
/// is folded into 400, which is what OpenAI returns.
#[derive(Debug)]
pub struct OpenAiJsonRejection(JsonRejection);

impl OpenAiJsonRejection {
    fn status(&self) -> StatusCode {
        match self.0.status() {
            StatusCode::UNSUPPORTED_MEDIA_TYPE => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn to_error(&self) -> OpenAiError {
        match self.status() {
            StatusCode::UNSUPPORTED_MEDIA_TYPE => {
                OpenAiError::invalid_request("Content-Type must be application/json")
            }
            StatusCode::PAYLOAD_TOO_LARGE => {
                OpenAiError::invalid_request("Request body is too large")
            }
            _ => {
                let detail = strip_axum_prefix(self.0.body_text());
                match field_path(&detail) {
                    Some(param) => {
                        let param = param.to_string();
                        OpenAiError::invalid_request(detail).with_param(param)
                    }
                    None => OpenAiError::invalid_request(detail),
                }
            }
        }
    }
}

impl IntoResponse for OpenAiJsonRejection {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = self.to_error();
        tracing::debug!(
            status = %status,
            param = ?error.error.param,
            error = %error.error.message,
            "Rejected request body"
        );
        (status, Json(error)).into_response()
    }
}

fn strip_axum_prefix(text: String) -> String {
    for prefix in [DESERIALIZE_PREFIX, PARSE_PREFIX] {
        if let Some(rest) = text.strip_prefix(prefix) {
            return rest.to_string();
        }
    }
    text
}

/// Leading `a.b[0].c: ` path in a serde error message, if any
fn field_path(detail: &str) -> Option<&str> {
    let (path, _) = detail.split_once(": ")?;
    let is_path = !path.is_empty()
        && path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '[' | ']'));
    is_path.then_some(path)
}

/// `Json<T>` whose rejection is an [`OpenAiJsonRejection`]
///
/// ```ignore
/// pub async fn handler(OpenAiJson(request): OpenAiJson<ChatCompletionRequest>) { ... }
/// ```
pub struct OpenAiJson<T>(pub T);

impl<S, T> FromRequest<S> for OpenAiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = OpenAiJsonRejection;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        Json::<T>::from_request(req, state)
            .await
            .map(|Json(value)| OpenAiJson(value))
            .map_err(OpenAiJsonRejection)
    }
}
