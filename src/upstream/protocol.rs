//! Pluggable upstream wire protocol
//!
//! A protocol knows how to encode a prepared prompt into the upstream's JSON
//! body and HTTP headers, and how to decode the upstream's SSE `data:` payloads
//! into provider-neutral [`StreamChunk`]s.

use crate::config::{UpstreamConfig, UpstreamKind};
use crate::error::UpstreamError;
use crate::handlers::openai::types::{FinishReason, Usage};
use crate::pool::Authenticator;
use crate::translator::UpstreamPrompt;
use std::fmt;
use std::sync::Arc;

/// One decoded unit of upstream output
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Text(String),
    Reasoning(String),
    ToolCall(ToolCallFragment),
    Usage(Usage),
    Finish(FinishReason),
    /// The upstream reported a failure inside the stream
    Error(String),
}

/// Incremental piece of one tool call, addressed by a stable index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// What a protocol can carry beyond plain chat messages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Messages may use the `tool` role and carry `tool_calls`
    pub tool_role: bool,
    pub tools: bool,
    pub tool_choice: bool,
    pub stop: bool,
    pub penalties: bool,
}

/// Stateful decoder for one upstream response
pub trait EventDecoder: Send {
    /// Decode one SSE `data:` payload
    ///
    /// # Errors
    /// Returns [`UpstreamError::Protocol`] for payloads that are not valid
    /// events; callers log and skip them.
    fn decode(&mut self, data: &str) -> Result<Vec<StreamChunk>, UpstreamError>;
}

pub trait UpstreamProtocol: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    fn completions_url(&self, base_url: &str) -> String;

    /// Encode the upstream body; always requests a streamed response
    fn build_body(&self, prompt: &UpstreamPrompt) -> serde_json::Value;

    /// Add authentication and provider-specific headers
    fn apply_headers(
        &self,
        request: reqwest::RequestBuilder,
        token: &str,
        config: &UpstreamConfig,
    ) -> reqwest::RequestBuilder;

    fn decoder(&self) -> Box<dyn EventDecoder>;

    /// Sign-in support for refreshing credentials, when the upstream has one
    fn authenticator(
        &self,
        http: reqwest::Client,
        config: &UpstreamConfig,
    ) -> Option<Arc<dyn Authenticator>>;
}

/// Protocol implementation for the configured upstream kind
pub fn protocol_for(kind: UpstreamKind) -> Arc<dyn UpstreamProtocol> {
    match kind {
        UpstreamKind::Zai => Arc::new(super::zai::ZaiProtocol),
        UpstreamKind::Openai => Arc::new(super::openai::OpenAiProtocol),
    }
}
