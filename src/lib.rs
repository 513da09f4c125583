//! zrelay - OpenAI-compatible gateway for the Z.AI chat upstream
//!
//! Exposes `/v1/chat/completions` and `/v1/models` to OpenAI clients and
//! translates each request into the upstream provider's protocol, rotating
//! upstream session credentials and relaying streamed responses as OpenAI
//! chunks.

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod pool;
pub mod relay;
pub mod telemetry;
pub mod translator;
pub mod upstream;
