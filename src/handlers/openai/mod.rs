//! OpenAI-compatible API handlers
//!
//! - `POST /v1/chat/completions` - Chat completions, buffered or SSE streamed
//! - `GET /v1/models` - List the configured public model ids

pub mod completions;
pub mod extractor;
pub mod models;
pub mod streaming;
pub mod types;
