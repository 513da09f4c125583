//! OpenAI-compatible upstream protocol
//!
//! Lets the gateway front any `/v1/chat/completions` endpoint, which is also
//! what the integration tests stand up with wiremock.

use super::protocol::{
    Capabilities, EventDecoder, StreamChunk, ToolCallFragment, UpstreamProtocol,
};
use crate::config::UpstreamConfig;
use crate::error::UpstreamError;
use crate::handlers::openai::types::{FinishReason, Usage};
use crate::pool::Authenticator;
use crate::translator::UpstreamPrompt;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiProtocol;

impl UpstreamProtocol for OpenAiProtocol {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            tool_role: true,
            tools: true,
            tool_choice: true,
            stop: true,
            penalties: true,
        }
    }

    fn completions_url(&self, base_url: &str) -> String {
        format!("{}/v1/chat/completions", base_url)
    }

    fn build_body(&self, prompt: &UpstreamPrompt) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("model".into(), json!(prompt.model.upstream_id()));
        map.insert("messages".into(), json!(prompt.messages));
        map.insert("stream".into(), json!(true));
        map.insert("stream_options".into(), json!({ "include_usage": true }));

        let sampling = &prompt.sampling;
        let fields = [
            ("temperature", sampling.temperature.map(|v| json!(v))),
            ("top_p", sampling.top_p.map(|v| json!(v))),
            ("max_tokens", sampling.max_tokens.map(|v| json!(v))),
            ("presence_penalty", sampling.presence_penalty.map(|v| json!(v))),
            ("frequency_penalty", sampling.frequency_penalty.map(|v| json!(v))),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                map.insert(key.to_string(), value);
            }
        }
        if !prompt.stop.is_empty() {
            map.insert("stop".into(), json!(prompt.stop));
        }
        if !prompt.tools.is_empty() {
            map.insert("tools".into(), json!(prompt.tools));
        }
        if let Some(choice) = &prompt.tool_choice {
            map.insert("tool_choice".into(), choice.clone());
        }
        serde_json::Value::Object(map)
    }

    fn apply_headers(
        &self,
        request: reqwest::RequestBuilder,
        token: &str,
        config: &UpstreamConfig,
    ) -> reqwest::RequestBuilder {
        request
            .bearer_auth(token)
            .header(reqwest::header::USER_AGENT, &config.user_agent)
            .header(reqwest::header::ACCEPT, "text/event-stream")
    }

    fn decoder(&self) -> Box<dyn EventDecoder> {
        Box::new(OpenAiDecoder)
    }

    fn authenticator(
        &self,
        _http: reqwest::Client,
        _config: &UpstreamConfig,
    ) -> Option<Arc<dyn Authenticator>> {
        None
    }
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default)]
    choices: Vec<EventChoice>,
    usage: Option<EventUsage>,
    error: Option<EventError>,
}

#[derive(Debug, Deserialize)]
struct EventChoice {
    #[serde(default)]
    delta: EventDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EventDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<EventToolCall>>,
}

#[derive(Debug, Deserialize)]
struct EventToolCall {
    #[serde(default)]
    index: u32,
    id: Option<String>,
    function: Option<EventFunction>,
}

#[derive(Debug, Deserialize)]
struct EventFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct EventError {
    message: String,
}

#[derive(Debug)]
struct OpenAiDecoder;

impl EventDecoder for OpenAiDecoder {
    fn decode(&mut self, data: &str) -> Result<Vec<StreamChunk>, UpstreamError> {
        let event: StreamEvent = serde_json::from_str(data)
            .map_err(|e| UpstreamError::Protocol(format!("invalid chunk: {}", e)))?;

        if let Some(error) = event.error {
            return Ok(vec![StreamChunk::Error(error.message)]);
        }

        let mut chunks = Vec::new();
        if let Some(choice) = event.choices.into_iter().next() {
            let delta = choice.delta;
            if let Some(reasoning) = delta.reasoning_content
                && !reasoning.is_empty()
            {
                chunks.push(StreamChunk::Reasoning(reasoning));
            }
            if let Some(content) = delta.content
                && !content.is_empty()
            {
                chunks.push(StreamChunk::Text(content));
            }
            for call in delta.tool_calls.unwrap_or_default() {
                let (name, arguments) = match call.function {
                    Some(f) => (f.name, f.arguments),
                    None => (None, None),
                };
                chunks.push(StreamChunk::ToolCall(ToolCallFragment {
                    index: call.index,
                    id: call.id,
                    name,
                    arguments,
                }));
            }
            if let Some(reason) = choice.finish_reason {
                chunks.push(StreamChunk::Finish(FinishReason::from_upstream(&reason)));
            }
        }
        if let Some(usage) = event.usage {
            chunks.push(StreamChunk::Usage(Usage::new(
                usage.prompt_tokens,
                usage.completion_tokens,
            )));
        }
        Ok(chunks)
    }
}
