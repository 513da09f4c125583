//! Z.AI web chat protocol
//!
//! Requests go to `POST {base}/api/chat/completions` with a browser-shaped
//! body and headers. Responses are SSE events of the form
//! `{"type":"chat:completion","data":{"phase":..,"delta_content":..,"done":..}}`.
//! Reasoning arrives in the `thinking` phase wrapped in `<details>` markup;
//! when the answer starts, Z.AI may resend the whole reasoning block in
//! `edit_content` followed by the first answer text.

use super::protocol::{
    Capabilities, EventDecoder, StreamChunk, ToolCallFragment, UpstreamProtocol,
};
use crate::config::UpstreamConfig;
use crate::error::UpstreamError;
use crate::handlers::openai::types::{FinishReason, Usage};
use crate::pool::{AuthError, Authenticator, Secrets};
use crate::translator::UpstreamPrompt;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

const SEC_CH_UA: &str = r#""Not)A;Brand";v="8", "Chromium";v="138", "Google Chrome";v="138""#;

#[derive(Debug, Clone, Copy, Default)]
pub struct ZaiProtocol;

impl UpstreamProtocol for ZaiProtocol {
    fn name(&self) -> &'static str {
        "zai"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn completions_url(&self, base_url: &str) -> String {
        format!("{}/api/chat/completions", base_url)
    }

    fn build_body(&self, prompt: &UpstreamPrompt) -> serde_json::Value {
        let chat_id = Uuid::new_v5(&prompt.fingerprint, b"chat");
        let message_id = Uuid::new_v5(&chat_id, b"message");
        let model = &prompt.model;

        let mut params = serde_json::Map::new();
        if let Some(t) = prompt.sampling.temperature {
            params.insert("temperature".into(), json!(t));
        }
        if let Some(p) = prompt.sampling.top_p {
            params.insert("top_p".into(), json!(p));
        }
        if let Some(m) = prompt.sampling.max_tokens {
            params.insert("max_tokens".into(), json!(m));
        }

        json!({
            "stream": true,
            "model": model.upstream_id(),
            "messages": prompt.messages,
            "params": params,
            "features": {
                "image_generation": false,
                "code_interpreter": false,
                "web_search": false,
                "auto_web_search": false
            },
            "background_tasks": {
                "title_generation": false,
                "tags_generation": false
            },
            "chat_id": chat_id.to_string(),
            "id": message_id.to_string(),
            "model_item": {
                "id": model.upstream_id(),
                "name": model.name(),
                "owned_by": model.owned_by()
            },
            "mcp_servers": [],
            "tool_servers": [],
            "variables": {
                "{{USER_NAME}}": "User",
                "{{USER_LOCATION}}": "Unknown"
            }
        })
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
            .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header("sec-ch-ua", SEC_CH_UA)
            .header("sec-ch-ua-mobile", "?0")
            .header("sec-ch-ua-platform", "\"Windows\"")
            .header("x-fe-version", &config.fe_version)
            .header(reqwest::header::ORIGIN, config.base_url())
            .header(reqwest::header::REFERER, format!("{}/", config.base_url()))
    }

    fn decoder(&self) -> Box<dyn EventDecoder> {
        Box::new(ZaiDecoder::default())
    }

    fn authenticator(
        &self,
        http: reqwest::Client,
        config: &UpstreamConfig,
    ) -> Option<Arc<dyn Authenticator>> {
        Some(Arc::new(ZaiSignIn {
            http,
            url: format!("{}/api/v1/auths/signin", config.base_url()),
            user_agent: config.user_agent.clone(),
        }))
    }
}

// =============================================================================
// Event decoding
// =============================================================================

#[derive(Debug, Deserialize)]
struct ZaiEvent {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    data: Option<ZaiData>,
    #[serde(default)]
    error: Option<ZaiErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
struct ZaiData {
    phase: Option<String>,
    delta_content: Option<String>,
    edit_content: Option<String>,
    #[serde(default)]
    done: bool,
    usage: Option<ZaiUsage>,
    finish_reason: Option<String>,
    tool_calls: Option<Vec<ZaiToolCall>>,
    error: Option<ZaiErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
struct ZaiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ZaiToolCall {
    index: Option<u32>,
    id: Option<String>,
    function: Option<ZaiFunction>,
}

#[derive(Debug, Deserialize)]
struct ZaiFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ZaiErrorBody {
    message: Option<String>,
    detail: Option<String>,
}

impl ZaiErrorBody {
    fn into_message(self) -> String {
        self.message
            .or(self.detail)
            .unwrap_or_else(|| "upstream reported an error".to_string())
    }
}

#[derive(Debug, Default)]
struct ZaiDecoder {
    saw_tool_calls: bool,
    finished: bool,
}

impl EventDecoder for ZaiDecoder {
    fn decode(&mut self, data: &str) -> Result<Vec<StreamChunk>, UpstreamError> {
        let event: ZaiEvent = serde_json::from_str(data)
            .map_err(|e| UpstreamError::Protocol(format!("invalid Z.AI event: {}", e)))?;

        if let Some(error) = event.error {
            return Ok(vec![StreamChunk::Error(error.into_message())]);
        }
        if !event.kind.is_empty() && event.kind != "chat:completion" {
            return Ok(Vec::new());
        }
        let Some(mut data) = event.data else {
            return Ok(Vec::new());
        };
        if let Some(error) = data.error.take() {
            return Ok(vec![StreamChunk::Error(error.into_message())]);
        }

        let mut chunks = Vec::new();
        match data.phase.as_deref() {
            Some("thinking") => {
                if let Some(delta) = data.delta_content.as_deref() {
                    let text = strip_reasoning_markup(delta);
                    if !text.is_empty() {
                        chunks.push(StreamChunk::Reasoning(text));
                    }
                }
            }
            Some("tool_call") => {
                for (position, call) in data.tool_calls.take().unwrap_or_default().into_iter().enumerate() {
                    self.saw_tool_calls = true;
                    let (name, arguments) = match call.function {
                        Some(f) => (f.name, f.arguments),
                        None => (None, None),
                    };
                    chunks.push(StreamChunk::ToolCall(ToolCallFragment {
                        index: call.index.unwrap_or(position as u32),
                        id: call.id,
                        name,
                        arguments,
                    }));
                }
            }
            _ => {
                // Answer phase; the first answer event may carry the closed
                // reasoning block plus the start of the answer
                let text = match data.edit_content.as_deref() {
                    Some(edit) if edit.contains("</details>") => edit
                        .rsplit_once("</details>")
                        .map(|(_, after)| after.trim_start_matches('\n').to_string()),
                    _ => data.delta_content.clone(),
                };
                if let Some(text) = text
                    && !text.is_empty()
                {
                    chunks.push(StreamChunk::Text(text));
                }
            }
        }

        if let Some(usage) = data.usage {
            chunks.push(StreamChunk::Usage(Usage::new(
                usage.prompt_tokens,
                usage.completion_tokens,
            )));
        }

        if (data.done || data.finish_reason.is_some()) && !self.finished {
            self.finished = true;
            let reason = match data.finish_reason.as_deref() {
                Some(reason) => FinishReason::from_upstream(reason),
                None if self.saw_tool_calls => FinishReason::ToolCalls,
                None => FinishReason::Stop,
            };
            chunks.push(StreamChunk::Finish(reason));
        }

        Ok(chunks)
    }
}

/// Remove the `<details>`/`<summary>` wrapper and quote markers Z.AI puts
/// around reasoning text
fn strip_reasoning_markup(text: &str) -> String {
    let mut out = text.to_string();

    while let Some(start) = out.find("<summary>") {
        let end = out[start..]
            .find("</summary>")
            .map(|i| start + i + "</summary>".len())
            .unwrap_or(out.len());
        out.replace_range(start..end, "");
    }
    while let Some(start) = out.find("<details") {
        let end = out[start..]
            .find('>')
            .map(|i| start + i + 1)
            .unwrap_or(out.len());
        out.replace_range(start..end, "");
    }
    out = out.replace("</details>", "").replace("\n> ", "\n");
    out.strip_prefix("> ")
        .map(str::to_string)
        .unwrap_or(out)
}

// =============================================================================
// Sign-in
// =============================================================================

#[derive(Debug, Deserialize)]
struct SignInResponse {
    token: Option<String>,
}

/// Obtains a token from `POST /api/v1/auths/signin`
struct ZaiSignIn {
    http: reqwest::Client,
    url: String,
    user_agent: String,
}

#[async_trait]
impl Authenticator for ZaiSignIn {
    async fn sign_in(&self, secrets: &Secrets) -> Result<String, AuthError> {
        let response = self
            .http
            .post(&self.url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .json(&json!({
                "email": secrets.email(),
                "password": secrets.password(),
            }))
            .send()
            .await
            .map_err(|e| AuthError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Rejected {
                status: status.as_u16(),
            });
        }

        let body: SignInResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Http(e.to_string()))?;

        body.token
            .filter(|t| !t.trim().is_empty())
            .ok_or(AuthError::MissingToken)
    }
}
