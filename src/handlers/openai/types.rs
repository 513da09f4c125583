//! OpenAI-compatible request and response types
//!
//! These types follow the OpenAI Chat Completions API specification.
//! Validation is enforced during deserialization - invalid instances cannot exist.

use serde::{Deserialize, Deserializer, Serialize};
use std::borrow::Cow;

/// Maximum allowed total content length across all messages (1M chars)
const MAX_TOTAL_CONTENT_LENGTH: usize = 1_000_000;
/// Maximum number of messages allowed
const MAX_MESSAGES: usize = 1000;

// =============================================================================
// OpenAI API Object Type Constants
// =============================================================================

/// Object type for non-streaming chat completion responses
pub const OBJECT_CHAT_COMPLETION: &str = "chat.completion";
/// Object type for streaming chat completion chunks
pub const OBJECT_CHAT_COMPLETION_CHUNK: &str = "chat.completion.chunk";
/// Object type for list responses (e.g., model list)
pub const OBJECT_LIST: &str = "list";
/// Object type for individual model entries
pub const OBJECT_MODEL: &str = "model";
/// Tool call type; OpenAI only defines function tools
pub const TOOL_TYPE_FUNCTION: &str = "function";

// =============================================================================
// Shared Validation Logic
// =============================================================================

fn check_range(name: &str, value: Option<f64>, min: f64, max: f64) -> Result<(), String> {
    if let Some(v) = value {
        if !v.is_finite() {
            return Err(format!("{} must be a finite number", name));
        }
        if !(min..=max).contains(&v) {
            return Err(format!("{} must be between {} and {}", name, min, max));
        }
    }
    Ok(())
}

/// Validate ChatCompletionRequest fields
///
/// This is the single source of truth for request validation, used by both
/// the builder and serde deserializer to ensure consistent validation rules.
fn validate_request_fields(
    model: &str,
    messages: &[ChatMessage],
    sampling: &SamplingParams,
    n: Option<u32>,
) -> Result<(), String> {
    if model.trim().is_empty() {
        return Err("model cannot be empty".to_string());
    }

    if messages.is_empty() {
        return Err("messages array cannot be empty".to_string());
    }

    if messages.len() > MAX_MESSAGES {
        return Err(format!(
            "messages array cannot exceed {} messages (got {})",
            MAX_MESSAGES,
            messages.len()
        ));
    }

    let total_length: usize = messages.iter().map(|m| m.content_length()).sum();
    if total_length > MAX_TOTAL_CONTENT_LENGTH {
        return Err(format!(
            "total content length exceeds {} characters (got {})",
            MAX_TOTAL_CONTENT_LENGTH, total_length
        ));
    }

    check_range("temperature", sampling.temperature, 0.0, 2.0)?;

    // top_p range (0.0, 1.0]
    if let Some(top_p) = sampling.top_p {
        if !top_p.is_finite() {
            return Err("top_p must be a finite number".to_string());
        }
        if top_p <= 0.0 || top_p > 1.0 {
            return Err("top_p must be between 0.0 (exclusive) and 1.0 (inclusive)".to_string());
        }
    }

    check_range("presence_penalty", sampling.presence_penalty, -2.0, 2.0)?;
    check_range("frequency_penalty", sampling.frequency_penalty, -2.0, 2.0)?;

    if let Some(max) = sampling.max_tokens
        && max == 0
    {
        return Err("max_tokens must be greater than 0".to_string());
    }

    if let Some(n) = n
        && n == 0
    {
        return Err("n must be greater than 0".to_string());
    }

    Ok(())
}

// =============================================================================
// Message Types
// =============================================================================

/// Message role in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

/// Image reference inside a multi-part message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One part of a multi-part message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

/// Message content: a plain string or an ordered list of parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Text parts concatenated in order
    pub fn text(&self) -> Cow<'_, str> {
        match self {
            MessageContent::Text(text) => Cow::Borrowed(text),
            MessageContent::Parts(parts) => Cow::Owned(
                parts
                    .iter()
                    .filter_map(|part| match part {
                        ContentPart::Text { text } => Some(text.as_str()),
                        ContentPart::ImageUrl { .. } => None,
                    })
                    .collect(),
            ),
        }
    }

    pub fn has_non_text_parts(&self) -> bool {
        match self {
            MessageContent::Text(_) => false,
            MessageContent::Parts(parts) => parts
                .iter()
                .any(|part| !matches!(part, ContentPart::Text { .. })),
        }
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

/// Function name and JSON-encoded arguments of a tool call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// A complete tool call, as sent back by the client in assistant history
/// or returned in a buffered completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_tool_type")]
    pub kind: String,
    pub function: FunctionCall,
}

fn default_tool_type() -> String {
    TOOL_TYPE_FUNCTION.to_string()
}

impl ToolCall {
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: default_tool_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// A single message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    role: MessageRole,
    content: Option<MessageContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ToolCall>,
}

impl ChatMessage {
    /// Create a new message with validation
    ///
    /// # Errors
    /// Returns an error if:
    /// - Content is empty or whitespace-only for User or System roles
    /// - A Tool message is created this way (use [`ChatMessage::tool_result`])
    ///
    /// Assistant messages can have empty content (for tool calls, partial responses).
    pub fn try_new(role: MessageRole, content: impl Into<String>) -> Result<Self, &'static str> {
        if role == MessageRole::Tool {
            return Err("tool messages require a tool_call_id");
        }
        let content = content.into();
        if content.trim().is_empty() && role != MessageRole::Assistant {
            return Err("content cannot be empty for user/system messages");
        }
        Ok(Self {
            role,
            content: Some(MessageContent::Text(content)),
            name: None,
            tool_call_id: None,
            tool_calls: Vec::new(),
        })
    }

    /// Assistant turn that requested tool calls
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.map(MessageContent::Text),
            name: None,
            tool_call_id: None,
            tool_calls,
        }
    }

    /// Result of a tool call, addressed by the call's id
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(MessageContent::Text(content.into())),
            name: None,
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: Vec::new(),
        }
    }

    /// Build a message whose content is a list of parts
    pub fn with_parts(role: MessageRole, parts: Vec<ContentPart>) -> Self {
        Self {
            role,
            content: Some(MessageContent::Parts(parts)),
            name: None,
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn role(&self) -> MessageRole {
        self.role
    }

    pub fn content(&self) -> Option<&MessageContent> {
        self.content.as_ref()
    }

    /// Text content with parts concatenated; empty when content is null
    pub fn text(&self) -> Cow<'_, str> {
        self.content
            .as_ref()
            .map(MessageContent::text)
            .unwrap_or(Cow::Borrowed(""))
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn tool_call_id(&self) -> Option<&str> {
        self.tool_call_id.as_deref()
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    pub fn has_non_text_parts(&self) -> bool {
        self.content
            .as_ref()
            .is_some_and(MessageContent::has_non_text_parts)
    }

    /// Get content length in characters (Unicode-aware)
    pub fn content_length(&self) -> usize {
        let arguments: usize = self
            .tool_calls
            .iter()
            .map(|call| call.function.arguments.chars().count())
            .sum();
        self.text().chars().count() + arguments
    }
}

impl<'de> Deserialize<'de> for ChatMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawMessage {
            role: MessageRole,
            #[serde(default)]
            content: Option<MessageContent>,
            name: Option<String>,
            tool_call_id: Option<String>,
            tool_calls: Option<Vec<ToolCall>>,
        }

        let raw = RawMessage::deserialize(deserializer)?;
        let message = ChatMessage {
            role: raw.role,
            content: raw.content,
            name: raw.name,
            tool_call_id: raw.tool_call_id,
            tool_calls: raw.tool_calls.unwrap_or_default(),
        };

        match message.role {
            // Content can be empty for assistant messages (tool calls, partial
            // responses) but user/system messages should have content
            MessageRole::System | MessageRole::User => {
                if message.text().trim().is_empty() && !message.has_non_text_parts() {
                    return Err(serde::de::Error::custom(format!(
                        "{} message content cannot be empty",
                        message.role.as_str()
                    )));
                }
            }
            MessageRole::Tool => {
                if message.tool_call_id.as_deref().is_none_or(|id| id.trim().is_empty()) {
                    return Err(serde::de::Error::custom(
                        "tool message requires a non-empty tool_call_id",
                    ));
                }
            }
            MessageRole::Assistant => {}
        }

        Ok(message)
    }
}

// =============================================================================
// Chat Completion Request
// =============================================================================

/// Sampling parameters forwarded to the upstream when it supports them
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SamplingParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
}

/// `stop` accepts a single string or a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StopSequences {
    One(String),
    Many(Vec<String>),
}

impl StopSequences {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            StopSequences::One(s) => vec![s.clone()],
            StopSequences::Many(v) => v.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOptions {
    #[serde(default)]
    pub include_usage: bool,
}

/// OpenAI-compatible chat completion request
///
/// Validation is enforced during deserialization - invalid instances cannot exist.
/// Use [`ChatCompletionRequest::builder()`] for programmatic construction in tests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(flatten)]
    sampling: SamplingParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<StopSequences>,
    #[serde(skip_serializing_if = "Option::is_none")]
    n: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

/// Builder for ChatCompletionRequest (primarily for tests)
#[derive(Debug, Default)]
pub struct ChatCompletionRequestBuilder {
    model: String,
    messages: Vec<ChatMessage>,
    stream: Option<bool>,
    sampling: SamplingParams,
    stop: Option<StopSequences>,
    n: Option<u32>,
    tools: Vec<serde_json::Value>,
    tool_choice: Option<serde_json::Value>,
    user: Option<String>,
    stream_options: Option<StreamOptions>,
}

impl ChatCompletionRequestBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the public model id
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Add a message to the conversation
    pub fn message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    /// Set all messages at once
    pub fn messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    /// Add a system message (convenience method)
    ///
    /// # Panics
    /// Panics if content is empty (use `message()` with `ChatMessage::try_new()` for fallible construction)
    pub fn system_message(self, content: impl Into<String>) -> Self {
        self.message(
            ChatMessage::try_new(MessageRole::System, content)
                .expect("system_message content must not be empty"),
        )
    }

    /// Add a user message (convenience method)
    ///
    /// # Panics
    /// Panics if content is empty (use `message()` with `ChatMessage::try_new()` for fallible construction)
    pub fn user_message(self, content: impl Into<String>) -> Self {
        self.message(
            ChatMessage::try_new(MessageRole::User, content)
                .expect("user_message content must not be empty"),
        )
    }

    /// Add an assistant message (convenience method, never panics)
    pub fn assistant_message(self, content: impl Into<String>) -> Self {
        self.message(
            ChatMessage::try_new(MessageRole::Assistant, content)
                .expect("assistant messages accept any content"),
        )
    }

    /// Add a tool result message
    pub fn tool_message(self, tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        self.message(ChatMessage::tool_result(tool_call_id, content))
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.sampling.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.sampling.max_tokens = Some(max_tokens);
        self
    }

    pub fn top_p(mut self, top_p: f64) -> Self {
        self.sampling.top_p = Some(top_p);
        self
    }

    pub fn presence_penalty(mut self, presence_penalty: f64) -> Self {
        self.sampling.presence_penalty = Some(presence_penalty);
        self
    }

    pub fn frequency_penalty(mut self, frequency_penalty: f64) -> Self {
        self.sampling.frequency_penalty = Some(frequency_penalty);
        self
    }

    pub fn stop(mut self, stop: StopSequences) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn n(mut self, n: u32) -> Self {
        self.n = Some(n);
        self
    }

    pub fn tool(mut self, tool: serde_json::Value) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tool_choice(mut self, tool_choice: serde_json::Value) -> Self {
        self.tool_choice = Some(tool_choice);
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn include_usage(mut self, include_usage: bool) -> Self {
        self.stream_options = Some(StreamOptions { include_usage });
        self
    }

    /// Build the request, performing all validation
    ///
    /// # Errors
    /// Returns an error string if validation fails (same rules as JSON deserialization)
    pub fn build(self) -> Result<ChatCompletionRequest, String> {
        validate_request_fields(&self.model, &self.messages, &self.sampling, self.n)?;

        Ok(ChatCompletionRequest {
            model: self.model,
            messages: self.messages,
            stream: self.stream,
            sampling: self.sampling,
            stop: self.stop,
            n: self.n,
            tools: self.tools,
            tool_choice: self.tool_choice,
            user: self.user,
            stream_options: self.stream_options,
        })
    }
}

impl ChatCompletionRequest {
    /// Create a new builder for constructing a request programmatically
    ///
    /// Prefer JSON deserialization in production code; the builder applies the
    /// same validation rules.
    pub fn builder() -> ChatCompletionRequestBuilder {
        ChatCompletionRequestBuilder::new()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Explicit stream flag; `None` means the configured default applies
    pub fn stream(&self) -> Option<bool> {
        self.stream
    }

    pub fn sampling(&self) -> &SamplingParams {
        &self.sampling
    }

    pub fn stop(&self) -> Option<&StopSequences> {
        self.stop.as_ref()
    }

    pub fn n(&self) -> Option<u32> {
        self.n
    }

    pub fn tools(&self) -> &[serde_json::Value] {
        &self.tools
    }

    pub fn tool_choice(&self) -> Option<&serde_json::Value> {
        self.tool_choice.as_ref()
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Whether a trailing usage chunk was requested
    pub fn include_usage(&self) -> bool {
        self.stream_options.is_some_and(|o| o.include_usage)
    }
}

impl<'de> Deserialize<'de> for ChatCompletionRequest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawRequest {
            model: String,
            messages: Vec<ChatMessage>,
            stream: Option<bool>,
            temperature: Option<f64>,
            max_tokens: Option<u32>,
            top_p: Option<f64>,
            presence_penalty: Option<f64>,
            frequency_penalty: Option<f64>,
            stop: Option<StopSequences>,
            n: Option<u32>,
            tools: Option<Vec<serde_json::Value>>,
            tool_choice: Option<serde_json::Value>,
            user: Option<String>,
            stream_options: Option<StreamOptions>,
        }

        let raw = RawRequest::deserialize(deserializer)?;
        let sampling = SamplingParams {
            temperature: raw.temperature,
            top_p: raw.top_p,
            max_tokens: raw.max_tokens,
            presence_penalty: raw.presence_penalty,
            frequency_penalty: raw.frequency_penalty,
        };

        // Use shared validation logic, converting String error to serde error
        validate_request_fields(&raw.model, &raw.messages, &sampling, raw.n)
            .map_err(serde::de::Error::custom)?;

        Ok(ChatCompletionRequest {
            model: raw.model,
            messages: raw.messages,
            stream: raw.stream,
            sampling,
            stop: raw.stop,
            n: raw.n,
            tools: raw.tools.unwrap_or_default(),
            tool_choice: raw.tool_choice,
            user: raw.user,
            stream_options: raw.stream_options,
        })
    }
}

// =============================================================================
// Chat Completion Response (Non-Streaming)
// =============================================================================

/// Finish reason for a completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

impl FinishReason {
    /// Map an upstream finish reason; anything unrecognised is treated as `stop`
    pub fn from_upstream(reason: &str) -> Self {
        match reason.trim().to_ascii_lowercase().as_str() {
            "length" | "max_tokens" => FinishReason::Length,
            "tool_calls" | "function_call" | "tool_call" => FinishReason::ToolCalls,
            "content_filter" | "sensitive" => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        }
    }
}

/// Usage statistics for a chat completion response.
///
/// Fields are private to enforce the invariant that `total_tokens` always
/// equals `prompt_tokens + completion_tokens`. Use `new()` or `estimate()`
/// constructors, which guarantee this invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl Usage {
    /// Create usage stats from token counts.
    ///
    /// Automatically calculates `total_tokens` as `prompt_tokens + completion_tokens`.
    #[inline]
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }

    /// Returns the number of tokens in the prompt.
    #[inline]
    pub fn prompt_tokens(&self) -> u32 {
        self.prompt_tokens
    }

    /// Returns the number of tokens in the completion.
    #[inline]
    pub fn completion_tokens(&self) -> u32 {
        self.completion_tokens
    }

    /// Returns the total number of tokens (prompt + completion).
    #[inline]
    pub fn total_tokens(&self) -> u32 {
        self.total_tokens
    }
}

/// ⌈chars / 4⌉, saturating at `u32::MAX`
pub fn estimate_tokens(chars: usize) -> u32 {
    u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
}

/// Assistant message in response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub role: MessageRole,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    /// Content is null when the reply is only tool calls
    pub fn with_tool_calls(content: String, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: (!content.is_empty() || tool_calls.is_empty()).then_some(content),
            tool_calls,
        }
    }
}

/// A single choice in the response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: FinishReason,
}

/// OpenAI-compatible chat completion response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

impl ChatCompletion {
    /// Create a new chat completion response
    ///
    /// # Arguments
    /// * `id` - Completion id shared with the request's correlation id
    /// * `model` - Public model id the client asked for
    /// * `created` - Unix timestamp when the completion was created (use `current_timestamp()` helper)
    pub fn new(
        id: impl Into<String>,
        model: impl Into<String>,
        created: i64,
        message: AssistantMessage,
        finish_reason: FinishReason,
        usage: Usage,
    ) -> Self {
        Self {
            id: id.into(),
            object: OBJECT_CHAT_COMPLETION.to_string(),
            created,
            model: model.into(),
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason,
            }],
            usage,
        }
    }
}

/// Get the current Unix timestamp for response creation.
///
/// Returns the current time as seconds since UNIX epoch. If the system clock
/// is misconfigured (before UNIX epoch), returns 0 and logs a warning.
pub fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_else(|e| {
            tracing::warn!(
                error = %e,
                "System clock appears to be before UNIX epoch - using 0 as timestamp"
            );
            0
        })
}

// =============================================================================
// Chat Completion Chunk (Streaming)
// =============================================================================

/// Incremental function call data in a streaming chunk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCallDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Tool call fragment addressed by its stable index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionCallDelta>,
}

/// Delta content in a streaming chunk
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// A single choice in a streaming chunk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: Delta,
    /// Serialized as `null` until the terminal chunk
    pub finish_reason: Option<FinishReason>,
}

/// OpenAI-compatible streaming chunk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatCompletionChunk {
    fn with_choice(
        id: &str,
        model: &str,
        created: i64,
        delta: Delta,
        finish_reason: Option<FinishReason>,
    ) -> Self {
        Self {
            id: id.to_string(),
            object: OBJECT_CHAT_COMPLETION_CHUNK.to_string(),
            created,
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage: None,
        }
    }

    /// Create an initial chunk with role announcement and empty content
    pub fn initial(id: &str, model: &str, created: i64) -> Self {
        Self::with_choice(
            id,
            model,
            created,
            Delta {
                role: Some(MessageRole::Assistant.as_str().to_string()),
                content: Some(String::new()),
                tool_calls: None,
            },
            None,
        )
    }

    /// Create a content chunk
    pub fn content(id: &str, model: &str, created: i64, content: &str) -> Self {
        Self::with_choice(
            id,
            model,
            created,
            Delta {
                content: Some(content.to_string()),
                ..Delta::default()
            },
            None,
        )
    }

    /// Create a tool call fragment chunk
    pub fn tool_calls(id: &str, model: &str, created: i64, calls: Vec<ToolCallDelta>) -> Self {
        Self::with_choice(
            id,
            model,
            created,
            Delta {
                tool_calls: Some(calls),
                ..Delta::default()
            },
            None,
        )
    }

    /// Create the terminal chunk carrying the finish reason
    pub fn finish(id: &str, model: &str, created: i64, reason: FinishReason) -> Self {
        Self::with_choice(id, model, created, Delta::default(), Some(reason))
    }

    /// Create the trailing usage chunk (empty choices)
    pub fn usage(id: &str, model: &str, created: i64, usage: Usage) -> Self {
        Self {
            id: id.to_string(),
            object: OBJECT_CHAT_COMPLETION_CHUNK.to_string(),
            created,
            model: model.to_string(),
            choices: Vec::new(),
            usage: Some(usage),
        }
    }

    /// Finish reason of the first choice, if this is the terminal chunk
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.choices.first().and_then(|c| c.finish_reason)
    }

    /// Content delta of the first choice
    pub fn content_delta(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.delta.content.as_deref())
    }
}

// =============================================================================
// Models List Response
// =============================================================================

/// A model object for the models list endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelObject {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

impl ModelObject {
    /// Create a new model object
    pub fn new(id: impl Into<String>, owned_by: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object: OBJECT_MODEL.to_string(),
            created: 0, // OpenAI uses 0 for many models
            owned_by: owned_by.into(),
        }
    }
}

/// Response for GET /v1/models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsListResponse {
    pub object: String,
    pub data: Vec<ModelObject>,
}

impl ModelsListResponse {
    /// Create a models list response
    pub fn new(models: Vec<ModelObject>) -> Self {
        Self {
            object: OBJECT_LIST.to_string(),
            data: models,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
