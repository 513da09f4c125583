//! Response translation: upstream [`StreamChunk`]s to OpenAI chunks
//!
//! One [`Relay`] per request runs the state machine
//! `Idle → Streaming → Finalizing → Done`, with `Failed` reachable from any
//! non-terminal state. Streaming and buffered responses share the machine, so
//! the concatenated `delta.content` of a stream always equals the `content`
//! of the equivalent buffered completion.

pub mod stream;
pub mod usage;

pub use stream::{RelayFrame, buffer, spawn_pump};
pub use usage::{CharRatioCounter, TokenCounter};

use crate::error::{AppError, UpstreamError};
use crate::handlers::openai::types::{
    AssistantMessage, ChatCompletion, ChatCompletionChunk, FinishReason, FunctionCallDelta,
    TOOL_TYPE_FUNCTION, ToolCall, ToolCallDelta, Usage,
};
use crate::upstream::{StreamChunk, ToolCallFragment};
use std::collections::BTreeMap;
use std::sync::Arc;

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// No upstream chunk seen yet
    Idle,
    Streaming,
    /// Terminal chunk emitted; only trailing usage may still arrive
    Finalizing,
    Done,
    Failed,
}

/// Per-response identity and presentation choices
#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub completion_id: String,
    /// Public model id echoed back to the client
    pub model: String,
    pub created: i64,
    pub show_think_tags: bool,
    /// Emit a trailing usage chunk (streaming only)
    pub include_usage: bool,
}

#[derive(Debug, Default)]
struct PendingToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

pub struct Relay {
    options: RelayOptions,
    state: RelayState,
    counter: Arc<dyn TokenCounter>,
    prompt_tokens: u32,
    content: String,
    thinking: bool,
    tool_calls: BTreeMap<u32, PendingToolCall>,
    upstream_usage: Option<Usage>,
    finish_reason: Option<FinishReason>,
    emitted: bool,
}

impl Relay {
    pub fn new(options: RelayOptions, prompt_tokens: u32, counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            options,
            state: RelayState::Idle,
            counter,
            prompt_tokens,
            content: String::new(),
            thinking: false,
            tool_calls: BTreeMap::new(),
            upstream_usage: None,
            finish_reason: None,
            emitted: false,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == RelayState::Done
    }

    /// Whether any chunk has been handed out
    pub fn has_output(&self) -> bool {
        self.emitted
    }

    pub fn completion_id(&self) -> &str {
        &self.options.completion_id
    }

    /// Feed one upstream chunk, returning the OpenAI chunks it produces
    ///
    /// # Errors
    /// An upstream error chunk moves the relay to `Failed`.
    pub fn push(&mut self, chunk: StreamChunk) -> Result<Vec<ChatCompletionChunk>, AppError> {
        match self.state {
            RelayState::Done | RelayState::Failed => return Ok(Vec::new()),
            RelayState::Finalizing => {
                if let StreamChunk::Usage(usage) = chunk {
                    self.upstream_usage = Some(usage);
                }
                return Ok(Vec::new());
            }
            RelayState::Idle | RelayState::Streaming => {}
        }

        if let StreamChunk::Error(message) = chunk {
            return Err(self.fail(UpstreamError::Reported { message }));
        }

        let mut out = Vec::new();
        if self.state == RelayState::Idle {
            self.state = RelayState::Streaming;
            out.push(ChatCompletionChunk::initial(
                &self.options.completion_id,
                &self.options.model,
                self.options.created,
            ));
        }

        match chunk {
            StreamChunk::Text(text) => {
                let text = self.close_thinking(text);
                if !text.is_empty() {
                    out.push(self.content_chunk(text));
                }
            }
            StreamChunk::Reasoning(text) => {
                if self.options.show_think_tags && !text.is_empty() {
                    let text = if self.thinking {
                        text
                    } else {
                        self.thinking = true;
                        format!("{}{}", THINK_OPEN, text)
                    };
                    out.push(self.content_chunk(text));
                }
            }
            StreamChunk::ToolCall(fragment) => {
                let closing = self.close_thinking(String::new());
                if !closing.is_empty() {
                    out.push(self.content_chunk(closing));
                }
                out.push(self.tool_call_chunk(fragment));
            }
            StreamChunk::Usage(usage) => self.upstream_usage = Some(usage),
            StreamChunk::Finish(reason) => out.extend(self.finalize(reason)),
            StreamChunk::Error(_) => {}
        }

        self.emitted |= !out.is_empty();
        Ok(out)
    }

    /// Upstream ended the stream
    ///
    /// Without a finish signal the response finishes with `stop`, or
    /// `tool_calls` when tool fragments were relayed.
    ///
    /// # Errors
    /// Fails when the upstream closed the stream before sending anything.
    pub fn finish_eof(&mut self) -> Result<Vec<ChatCompletionChunk>, AppError> {
        let mut out = Vec::new();
        match self.state {
            RelayState::Idle => {
                return Err(self.fail(UpstreamError::StreamInterrupted {
                    reason: "upstream closed the stream without output".to_string(),
                }));
            }
            RelayState::Streaming => {
                let reason = if self.tool_calls.is_empty() {
                    FinishReason::Stop
                } else {
                    FinishReason::ToolCalls
                };
                out.extend(self.finalize(reason));
            }
            RelayState::Finalizing => {}
            RelayState::Done | RelayState::Failed => return Ok(out),
        }

        if self.options.include_usage {
            out.push(ChatCompletionChunk::usage(
                &self.options.completion_id,
                &self.options.model,
                self.options.created,
                self.usage(),
            ));
        }
        self.state = RelayState::Done;
        self.emitted |= !out.is_empty();
        Ok(out)
    }

    /// Move to `Failed`, wrapping the cause for the client
    pub fn fail(&mut self, err: UpstreamError) -> AppError {
        self.state = RelayState::Failed;
        AppError::Upstream(err)
    }

    /// Upstream-reported usage, else the counter's estimate
    pub fn usage(&self) -> Usage {
        self.upstream_usage.unwrap_or_else(|| {
            let tool_chars: usize = self
                .tool_calls
                .values()
                .map(|c| c.name.chars().count() + c.arguments.chars().count())
                .sum();
            let completion_chars = self.content.chars().count() + tool_chars;
            Usage::new(self.prompt_tokens, self.counter.count_chars(completion_chars))
        })
    }

    /// Collapse everything relayed so far into one buffered completion
    pub fn into_completion(self) -> ChatCompletion {
        let usage = self.usage();
        let finish_reason = self.finish_reason.unwrap_or(FinishReason::Stop);
        let tool_calls = self
            .tool_calls
            .into_iter()
            .map(|(index, call)| {
                let id = call.id.unwrap_or_else(|| format!("call_{}", index));
                ToolCall::function(id, call.name, call.arguments)
            })
            .collect();
        ChatCompletion::new(
            self.options.completion_id,
            self.options.model,
            self.options.created,
            AssistantMessage::with_tool_calls(self.content, tool_calls),
            finish_reason,
            usage,
        )
    }

    fn finalize(&mut self, reason: FinishReason) -> Vec<ChatCompletionChunk> {
        let mut out = Vec::new();
        let closing = self.close_thinking(String::new());
        if !closing.is_empty() {
            out.push(self.content_chunk(closing));
        }
        self.finish_reason = Some(reason);
        self.state = RelayState::Finalizing;
        out.push(ChatCompletionChunk::finish(
            &self.options.completion_id,
            &self.options.model,
            self.options.created,
            reason,
        ));
        out
    }

    /// Prefix `text` with the closing think tag when reasoning was open
    fn close_thinking(&mut self, text: String) -> String {
        if self.thinking {
            self.thinking = false;
            format!("{}{}", THINK_CLOSE, text)
        } else {
            text
        }
    }

    fn content_chunk(&mut self, text: String) -> ChatCompletionChunk {
        self.content.push_str(&text);
        ChatCompletionChunk::content(
            &self.options.completion_id,
            &self.options.model,
            self.options.created,
            &text,
        )
    }

    fn tool_call_chunk(&mut self, fragment: ToolCallFragment) -> ChatCompletionChunk {
        let entry = self.tool_calls.entry(fragment.index).or_default();
        let first = entry.id.is_none() && entry.name.is_empty() && entry.arguments.is_empty();
        let id = match fragment.id {
            Some(id) => Some(id),
            None if first => Some(format!("call_{}", fragment.index)),
            None => None,
        };
        if entry.id.is_none() {
            entry.id = id.clone();
        }
        if let Some(name) = &fragment.name {
            entry.name.push_str(name);
        }
        if let Some(arguments) = &fragment.arguments {
            entry.arguments.push_str(arguments);
        }

        let delta = ToolCallDelta {
            index: fragment.index,
            id,
            kind: first.then(|| TOOL_TYPE_FUNCTION.to_string()),
            function: Some(FunctionCallDelta {
                name: fragment.name,
                arguments: fragment.arguments,
            }),
        };
        ChatCompletionChunk::tool_calls(
            &self.options.completion_id,
            &self.options.model,
            self.options.created,
            vec![delta],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn relay(show_think_tags: bool, include_usage: bool) -> Relay {
        Relay::new(
            RelayOptions {
                completion_id: "chatcmpl-test".into(),
                model: "gpt-4".into(),
                created: 1_700_000_000,
                show_think_tags,
                include_usage,
            },
            10,
            Arc::new(CharRatioCounter),
        )
    }

    fn run(relay: &mut Relay, chunks: Vec<StreamChunk>) -> Vec<ChatCompletionChunk> {
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend(relay.push(chunk).unwrap());
        }
        out.extend(relay.finish_eof().unwrap());
        out
    }

    fn text(s: &str) -> StreamChunk {
        StreamChunk::Text(s.to_string())
    }

    fn content_of(chunks: &[ChatCompletionChunk]) -> String {
        chunks.iter().filter_map(|c| c.content_delta()).collect()
    }

    #[test]
    fn test_hi_there_scenario() {
        let mut relay = relay(false, false);
        let out = run(
            &mut relay,
            vec![text("H"), text("i"), text(" there"), StreamChunk::Finish(FinishReason::Stop)],
        );

        assert_eq!(out.len(), 5);
        assert_eq!(out[0].choices[0].delta.role.as_deref(), Some("assistant"));
        assert_eq!(out[0].content_delta(), Some(""));
        assert_eq!(out[1].content_delta(), Some("H"));
        assert_eq!(out[2].content_delta(), Some("i"));
        assert_eq!(out[3].content_delta(), Some(" there"));
        assert_eq!(out[4].finish_reason(), Some(FinishReason::Stop));
        assert!(out.iter().all(|c| c.id == "chatcmpl-test" && c.created == 1_700_000_000));
        assert!(relay.is_done());
    }

    #[test]
    fn test_eof_without_finish_stops() {
        let mut relay = relay(false, false);
        let out = run(&mut relay, vec![text("partial")]);
        assert_eq!(out.last().unwrap().finish_reason(), Some(FinishReason::Stop));
    }

    #[test]
    fn test_eof_before_output_fails() {
        let mut relay = relay(false, false);
        let err = relay.finish_eof().unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_GATEWAY);
        assert_eq!(relay.state(), RelayState::Failed);
        assert!(!relay.has_output());
    }

    #[test]
    fn test_error_chunk_fails() {
        let mut relay = relay(false, false);
        relay.push(text("a")).unwrap();
        assert!(relay.push(StreamChunk::Error("boom".into())).is_err());
        assert_eq!(relay.state(), RelayState::Failed);
        assert!(relay.has_output());
        assert!(relay.push(text("late")).unwrap().is_empty());
    }

    #[test]
    fn test_reasoning_dropped_by_default() {
        let mut relay = relay(false, false);
        let out = run(
            &mut relay,
            vec![StreamChunk::Reasoning("hmm".into()), text("Answer")],
        );
        assert_eq!(content_of(&out), "Answer");
    }

    #[test]
    fn test_reasoning_wrapped_in_think_tags() {
        let mut relay = relay(true, false);
        let out = run(
            &mut relay,
            vec![
                StreamChunk::Reasoning("hm".into()),
                StreamChunk::Reasoning("m".into()),
                text("Answer"),
            ],
        );
        assert_eq!(content_of(&out), "<think>hmm</think>Answer");
    }

    #[test]
    fn test_think_closed_at_finish() {
        let mut relay = relay(true, false);
        let out = run(
            &mut relay,
            vec![
                StreamChunk::Reasoning("only thoughts".into()),
                StreamChunk::Finish(FinishReason::Length),
            ],
        );
        assert_eq!(content_of(&out), "<think>only thoughts</think>");
        assert_eq!(out.last().unwrap().finish_reason(), Some(FinishReason::Length));
    }

    #[test]
    fn test_tool_calls_assembled_by_index() {
        let mut relay = relay(false, false);
        let out = run(
            &mut relay,
            vec![
                StreamChunk::ToolCall(ToolCallFragment {
                    index: 0,
                    id: Some("call_a".into()),
                    name: Some("weather".into()),
                    arguments: Some("{\"city\":".into()),
                }),
                StreamChunk::ToolCall(ToolCallFragment {
                    index: 0,
                    arguments: Some("\"Paris\"}".into()),
                    ..ToolCallFragment::default()
                }),
            ],
        );
        let first = out[1].choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(first[0].kind.as_deref(), Some("function"));
        let second = out[2].choices[0].delta.tool_calls.as_ref().unwrap();
        assert!(second[0].kind.is_none());
        assert_eq!(out.last().unwrap().finish_reason(), Some(FinishReason::ToolCalls));

        let completion = relay.into_completion();
        let message = &completion.choices[0].message;
        assert!(message.content.is_none());
        assert_eq!(message.tool_calls[0].id, "call_a");
        assert_eq!(message.tool_calls[0].function.arguments, "{\"city\":\"Paris\"}");
    }

    #[test]
    fn test_tool_call_without_id_gets_index_id_in_both_modes() {
        let mut relay = relay(false, false);
        let out = run(
            &mut relay,
            vec![
                StreamChunk::ToolCall(ToolCallFragment {
                    index: 2,
                    name: Some("lookup".into()),
                    ..ToolCallFragment::default()
                }),
                StreamChunk::ToolCall(ToolCallFragment {
                    index: 2,
                    arguments: Some("{}".into()),
                    ..ToolCallFragment::default()
                }),
            ],
        );
        let first = out[1].choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(first[0].id.as_deref(), Some("call_2"));
        let second = out[2].choices[0].delta.tool_calls.as_ref().unwrap();
        assert!(second[0].id.is_none());

        let completion = relay.into_completion();
        assert_eq!(completion.choices[0].message.tool_calls[0].id, "call_2");
    }

    #[test]
    fn test_usage_chunk_after_terminal() {
        let mut relay = relay(false, true);
        let out = run(
            &mut relay,
            vec![
                text("Hi"),
                StreamChunk::Finish(FinishReason::Stop),
                StreamChunk::Usage(Usage::new(3, 1)),
            ],
        );
        let last = out.last().unwrap();
        assert!(last.choices.is_empty());
        assert_eq!(last.usage, Some(Usage::new(3, 1)));
        assert_eq!(out[out.len() - 2].finish_reason(), Some(FinishReason::Stop));
    }

    #[test]
    fn test_estimated_usage_without_upstream_report() {
        let mut relay = relay(false, false);
        run(&mut relay, vec![text("abcde")]);
        assert_eq!(relay.usage(), Usage::new(10, 2));
    }

    fn arb_chunk() -> impl Strategy<Value = StreamChunk> {
        prop_oneof![
            "[a-z ]{0,6}".prop_map(StreamChunk::Text),
            "[a-z]{0,4}".prop_map(StreamChunk::Reasoning),
            (0u32..3, proptest::option::of("[a-z]{1,3}")).prop_map(|(index, arguments)| {
                StreamChunk::ToolCall(ToolCallFragment {
                    index,
                    arguments,
                    ..ToolCallFragment::default()
                })
            }),
            Just(StreamChunk::Finish(FinishReason::Stop)),
        ]
    }

    proptest! {
        #[test]
        fn prop_exactly_one_terminal_chunk(
            chunks in proptest::collection::vec(arb_chunk(), 1..20),
            show in any::<bool>(),
        ) {
            let mut relay = relay(show, true);
            let out = run(&mut relay, chunks);
            let terminals = out.iter().filter(|c| c.finish_reason().is_some()).count();
            prop_assert_eq!(terminals, 1);
        }

        #[test]
        fn prop_stream_content_matches_buffered(
            chunks in proptest::collection::vec(arb_chunk(), 1..20),
            show in any::<bool>(),
        ) {
            let mut streaming = relay(show, false);
            let streamed = content_of(&run(&mut streaming, chunks.clone()));

            let mut buffered = relay(show, false);
            run(&mut buffered, chunks);
            let content = buffered.into_completion().choices[0]
                .message
                .content
                .clone()
                .unwrap_or_default();
            prop_assert_eq!(streamed, content);
        }
    }
}
