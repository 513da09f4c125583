//! HTTP middleware: request correlation and client authentication

pub mod auth;
pub mod request_id;

pub use auth::{require_admin_key, require_api_key};
pub use request_id::{REQUEST_ID_HEADER, RequestId, request_id_middleware};
