//! Request translation
//!
//! Turns a validated OpenAI chat request into an upstream request in two
//! steps. [`Translator::prepare`] does everything that does not depend on the
//! credential (model mapping, feature policy, role folding) and is run once
//! per inbound request. [`Translator::bind`] attaches a leased credential and
//! encodes the wire body; it runs again when an auth retry switches
//! credentials. Both are pure: no clock, no randomness.

use crate::config::{Config, DroppableField, ModelMapping};
use crate::error::{AppError, AppResult};
use crate::handlers::openai::types::{
    ChatCompletionRequest, ChatMessage, MessageRole, SamplingParams, ToolCall,
};
use crate::pool::{Credential, CredentialId};
use crate::upstream::{Capabilities, UpstreamProtocol};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Namespace for prompt fingerprints
const FINGERPRINT_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_93d5_4b8e_a0f7_5e21_c3d9_8b14);

/// Message as sent upstream, after role folding and content flattening
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl PromptMessage {
    fn text(role: MessageRole, content: String) -> Self {
        Self {
            role,
            content,
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }
}

/// Credential-independent part of an upstream request
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamPrompt {
    pub model: ModelMapping,
    pub messages: Vec<PromptMessage>,
    pub sampling: SamplingParams,
    pub stop: Vec<String>,
    pub tools: Vec<serde_json::Value>,
    pub tool_choice: Option<serde_json::Value>,
    /// Digest of model and messages; seeds upstream chat/message ids
    pub fingerprint: Uuid,
}

impl UpstreamPrompt {
    /// Characters of prompt text, for usage estimation
    pub fn prompt_chars(&self) -> usize {
        self.messages
            .iter()
            .map(|m| {
                m.content.chars().count()
                    + m.tool_calls
                        .iter()
                        .map(|c| c.function.arguments.chars().count())
                        .sum::<usize>()
            })
            .sum()
    }
}

/// Fully translated request ready to send
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRequest {
    pub credential_id: CredentialId,
    pub token: String,
    /// Upstream model id
    pub model: String,
    pub body: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct Translator {
    models: Vec<ModelMapping>,
    droppable: HashSet<DroppableField>,
    protocol: Arc<dyn UpstreamProtocol>,
}

impl Translator {
    pub fn new(config: &Config, protocol: Arc<dyn UpstreamProtocol>) -> Self {
        Self {
            models: config.models.clone(),
            droppable: config.translation.droppable_fields.iter().copied().collect(),
            protocol,
        }
    }

    pub fn protocol(&self) -> &Arc<dyn UpstreamProtocol> {
        &self.protocol
    }

    /// Resolve the model and apply the feature policy
    ///
    /// # Errors
    /// - [`AppError::UnknownModel`] when the model id is not configured
    /// - [`AppError::UnsupportedFeature`] when a requested field has no
    ///   upstream equivalent and is not listed as droppable
    pub fn prepare(&self, request: &ChatCompletionRequest) -> AppResult<UpstreamPrompt> {
        let model = self
            .models
            .iter()
            .find(|m| m.id() == request.model())
            .cloned()
            .ok_or_else(|| AppError::UnknownModel(request.model().to_string()))?;

        let caps = self.protocol.capabilities();

        let keep_tools = self.check_feature(
            DroppableField::Tools,
            caps.tools,
            !request.tools().is_empty(),
        )?;
        let keep_tool_choice = self.check_feature(
            DroppableField::ToolChoice,
            caps.tool_choice,
            request.tool_choice().is_some(),
        )?;
        let keep_presence = self.check_feature(
            DroppableField::PresencePenalty,
            caps.penalties,
            request.sampling().presence_penalty.is_some(),
        )?;
        let keep_frequency = self.check_feature(
            DroppableField::FrequencyPenalty,
            caps.penalties,
            request.sampling().frequency_penalty.is_some(),
        )?;
        let keep_stop =
            self.check_feature(DroppableField::Stop, caps.stop, request.stop().is_some())?;
        // Only one choice is ever produced
        self.check_feature(DroppableField::N, false, request.n().is_some_and(|n| n > 1))?;
        self.check_feature(
            DroppableField::ImageContent,
            false,
            request.messages().iter().any(ChatMessage::has_non_text_parts),
        )?;

        let messages = fold_messages(request.messages(), caps);

        let sampling = SamplingParams {
            presence_penalty: request
                .sampling()
                .presence_penalty
                .filter(|_| keep_presence),
            frequency_penalty: request
                .sampling()
                .frequency_penalty
                .filter(|_| keep_frequency),
            ..request.sampling().clone()
        };

        let fingerprint = fingerprint(&model, &messages);

        Ok(UpstreamPrompt {
            model,
            messages,
            sampling,
            stop: request
                .stop()
                .filter(|_| keep_stop)
                .map(|s| s.to_vec())
                .unwrap_or_default(),
            tools: if keep_tools {
                request.tools().to_vec()
            } else {
                Vec::new()
            },
            tool_choice: request.tool_choice().filter(|_| keep_tool_choice).cloned(),
            fingerprint,
        })
    }

    /// Attach a credential and encode the wire body
    pub fn bind(&self, prompt: &UpstreamPrompt, credential: &Credential) -> UpstreamRequest {
        UpstreamRequest {
            credential_id: credential.id(),
            token: credential.token().to_string(),
            model: prompt.model.upstream_id().to_string(),
            body: self.protocol.build_body(prompt),
        }
    }

    /// `prepare` followed by `bind`
    pub fn translate(
        &self,
        request: &ChatCompletionRequest,
        credential: &Credential,
    ) -> AppResult<UpstreamRequest> {
        let prompt = self.prepare(request)?;
        Ok(self.bind(&prompt, credential))
    }

    /// Decide what to do with a requested field; `Ok(true)` means forward it
    fn check_feature(
        &self,
        field: DroppableField,
        supported: bool,
        requested: bool,
    ) -> AppResult<bool> {
        if !requested {
            return Ok(false);
        }
        if supported {
            return Ok(true);
        }
        if self.droppable.contains(&field) {
            tracing::debug!(
                feature = field.as_str(),
                protocol = self.protocol.name(),
                "Dropping field the upstream does not support"
            );
            return Ok(false);
        }
        Err(AppError::UnsupportedFeature {
            feature: field.as_str().to_string(),
        })
    }
}

/// Flatten content to text and, when the upstream has no tool role, fold tool
/// traffic into plain messages
fn fold_messages(messages: &[ChatMessage], caps: Capabilities) -> Vec<PromptMessage> {
    messages
        .iter()
        .map(|message| {
            let text = message.text().into_owned();
            if caps.tool_role {
                return PromptMessage {
                    role: message.role(),
                    content: text,
                    tool_call_id: message.tool_call_id().map(str::to_string),
                    tool_calls: message.tool_calls().to_vec(),
                };
            }

            match message.role() {
                MessageRole::Tool => PromptMessage::text(
                    MessageRole::User,
                    format!(
                        "[tool result {}]\n{}",
                        message.tool_call_id().unwrap_or_default(),
                        text
                    ),
                ),
                MessageRole::Assistant if !message.tool_calls().is_empty() => {
                    let mut lines = Vec::with_capacity(message.tool_calls().len() + 1);
                    if !text.is_empty() {
                        lines.push(text);
                    }
                    lines.extend(message.tool_calls().iter().map(|call| {
                        format!(
                            "[tool call {}] {}({})",
                            call.id, call.function.name, call.function.arguments
                        )
                    }));
                    PromptMessage::text(MessageRole::Assistant, lines.join("\n"))
                }
                role => PromptMessage::text(role, text),
            }
        })
        .collect()
}

fn fingerprint(model: &ModelMapping, messages: &[PromptMessage]) -> Uuid {
    let digest_input = serde_json::to_vec(&(model.upstream_id(), messages)).unwrap_or_default();
    Uuid::new_v5(&FINGERPRINT_NAMESPACE, &digest_input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpstreamKind;
    use crate::handlers::openai::types::{ContentPart, ImageUrl, StopSequences};
    use crate::upstream::protocol_for;
    use serde_json::json;

    const CONFIG: &str = r#"
[server]
host = "127.0.0.1"
port = 3000

[[models]]
id = "GLM-4.5"
upstream_id = "0727-360B-API"

[[models]]
id = "gpt-4"
upstream_id = "0727-360B-API"
name = "GLM-4.5"
"#;

    fn translator(kind: UpstreamKind, droppable: &[DroppableField]) -> Translator {
        let mut config: Config = CONFIG.parse().unwrap();
        config.translation.droppable_fields = droppable.to_vec();
        Translator::new(&config, protocol_for(kind))
    }

    fn credential(token: &str) -> Credential {
        Credential::new(CredentialId::new(0), token, None)
    }

    fn request() -> ChatCompletionRequest {
        ChatCompletionRequest::builder()
            .model("gpt-4")
            .system_message("Be brief")
            .user_message("Hi")
            .temperature(0.3)
            .build()
            .unwrap()
    }

    #[test]
    fn test_translate_is_pure() {
        let t = translator(UpstreamKind::Zai, &[]);
        let a = t.translate(&request(), &credential("tok-a")).unwrap();
        let b = t.translate(&request(), &credential("tok-a")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.model, "0727-360B-API");
        assert_eq!(a.token, "tok-a");
    }

    #[test]
    fn test_credential_only_changes_token() {
        let t = translator(UpstreamKind::Zai, &[]);
        let prompt = t.prepare(&request()).unwrap();
        let a = t.bind(&prompt, &credential("tok-a"));
        let b = t.bind(&prompt, &Credential::new(CredentialId::new(1), "tok-b", None));
        assert_eq!(a.body, b.body);
        assert_ne!(a.token, b.token);
        assert_eq!(b.credential_id, CredentialId::new(1));
    }

    #[test]
    fn test_unknown_model_rejected() {
        let t = translator(UpstreamKind::Zai, &[]);
        let req = ChatCompletionRequest::builder()
            .model("gpt-9")
            .user_message("Hi")
            .build()
            .unwrap();
        assert!(matches!(t.prepare(&req), Err(AppError::UnknownModel(m)) if m == "gpt-9"));
    }

    #[test]
    fn test_unsupported_tools_rejected_unless_droppable() {
        let req = ChatCompletionRequest::builder()
            .model("GLM-4.5")
            .user_message("Hi")
            .tool(json!({"type": "function", "function": {"name": "f"}}))
            .build()
            .unwrap();

        let strict = translator(UpstreamKind::Zai, &[]);
        match strict.prepare(&req) {
            Err(AppError::UnsupportedFeature { feature }) => assert_eq!(feature, "tools"),
            other => panic!("expected unsupported feature, got {:?}", other),
        }

        let lenient = translator(UpstreamKind::Zai, &[DroppableField::Tools]);
        let prompt = lenient.prepare(&req).unwrap();
        assert!(prompt.tools.is_empty());

        let openai = translator(UpstreamKind::Openai, &[]);
        assert_eq!(openai.prepare(&req).unwrap().tools.len(), 1);
    }

    #[test]
    fn test_penalties_stop_and_n_policy() {
        let req = ChatCompletionRequest::builder()
            .model("GLM-4.5")
            .user_message("Hi")
            .presence_penalty(0.5)
            .stop(StopSequences::One("END".into()))
            .build()
            .unwrap();
        // stop is not droppable here
        let partial = translator(UpstreamKind::Zai, &[DroppableField::PresencePenalty]);
        assert!(partial.prepare(&req).is_err());

        let lenient = translator(
            UpstreamKind::Zai,
            &[DroppableField::PresencePenalty, DroppableField::Stop],
        );
        let prompt = lenient.prepare(&req).unwrap();
        assert_eq!(prompt.sampling.presence_penalty, None);
        assert!(prompt.stop.is_empty());

        let many = ChatCompletionRequest::builder()
            .model("GLM-4.5")
            .user_message("Hi")
            .n(2)
            .build()
            .unwrap();
        assert!(translator(UpstreamKind::Openai, &[]).prepare(&many).is_err());
        assert!(translator(UpstreamKind::Openai, &[DroppableField::N]).prepare(&many).is_ok());
    }

    #[test]
    fn test_image_parts_are_unsupported() {
        let req = ChatCompletionRequest::builder()
            .model("GLM-4.5")
            .message(ChatMessage::with_parts(
                MessageRole::User,
                vec![
                    ContentPart::Text {
                        text: "What is this?".into(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: "https://x/y.png".into(),
                            detail: None,
                        },
                    },
                ],
            ))
            .build()
            .unwrap();
        assert!(translator(UpstreamKind::Zai, &[]).prepare(&req).is_err());

        let prompt = translator(UpstreamKind::Zai, &[DroppableField::ImageContent])
            .prepare(&req)
            .unwrap();
        assert_eq!(prompt.messages[0].content, "What is this?");
    }

    #[test]
    fn test_tool_messages_fold_for_zai() {
        let req = ChatCompletionRequest::builder()
            .model("GLM-4.5")
            .user_message("Weather?")
            .message(ChatMessage::assistant_tool_calls(
                Some("Checking.".into()),
                vec![ToolCall::function("call_1", "weather", r#"{"city":"Oslo"}"#)],
            ))
            .tool_message("call_1", "Sunny")
            .build()
            .unwrap();

        let prompt = translator(UpstreamKind::Zai, &[]).prepare(&req).unwrap();
        assert_eq!(prompt.messages[1].role, MessageRole::Assistant);
        assert_eq!(
            prompt.messages[1].content,
            "Checking.\n[tool call call_1] weather({\"city\":\"Oslo\"})"
        );
        assert_eq!(prompt.messages[2].role, MessageRole::User);
        assert_eq!(prompt.messages[2].content, "[tool result call_1]\nSunny");
        assert!(prompt.messages.iter().all(|m| m.tool_calls.is_empty()));
    }

    #[test]
    fn test_tool_messages_kept_for_openai() {
        let req = ChatCompletionRequest::builder()
            .model("GLM-4.5")
            .user_message("Weather?")
            .message(ChatMessage::assistant_tool_calls(
                None,
                vec![ToolCall::function("call_1", "weather", "{}")],
            ))
            .tool_message("call_1", "Sunny")
            .build()
            .unwrap();

        let prompt = translator(UpstreamKind::Openai, &[]).prepare(&req).unwrap();
        assert_eq!(prompt.messages[1].tool_calls.len(), 1);
        assert_eq!(prompt.messages[2].role, MessageRole::Tool);
        assert_eq!(prompt.messages[2].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_fingerprint_tracks_conversation() {
        let t = translator(UpstreamKind::Zai, &[]);
        let a = t.prepare(&request()).unwrap();
        let other = ChatCompletionRequest::builder()
            .model("gpt-4")
            .user_message("Something else")
            .build()
            .unwrap();
        let b = t.prepare(&other).unwrap();
        assert_ne!(a.fingerprint, b.fingerprint);
        assert_eq!(a.prompt_chars(), "Be brief".len() + "Hi".len());
    }
}
