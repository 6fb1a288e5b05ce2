//! Rebuilds one logical assistant message from streamed chunks.
//!
//! Content and reasoning fragments are concatenated in arrival order. Tool-call fragments are
//! merged by their `index`: the first fragment carrying a non-empty `id`, `type` or
//! `function.name` fixes that field, and every fragment appends to `function.arguments`.
//! Fragments of different indices may interleave freely. The message is complete only once a
//! `finish_reason` has been seen; a stream that ends before that is truncated.

use std::collections::BTreeMap;

use crate::error::{RelayError, Result};
use crate::types::{
    ChatCompletionChunk, ChatCompletionResponse, ChatMessage, FinishReason, MessageRole,
    ToolCall, ToolCallDelta, Usage,
};

#[derive(Debug, Default, Clone)]
struct PartialToolCall {
    id: Option<String>,
    kind: Option<String>,
    name: Option<String>,
    arguments: String,
}

fn set_once(slot: &mut Option<String>, value: Option<&String>) {
    if slot.is_none()
        && let Some(v) = value
        && !v.is_empty()
    {
        *slot = Some(v.clone());
    }
}

impl PartialToolCall {
    fn apply(&mut self, delta: &ToolCallDelta) {
        set_once(&mut self.id, delta.id.as_ref());
        set_once(&mut self.kind, delta.kind.as_ref());
        if let Some(function) = &delta.function {
            set_once(&mut self.name, function.name.as_ref());
            if let Some(args) = &function.arguments {
                self.arguments.push_str(args);
            }
        }
    }

    fn into_call(self, index: u32) -> ToolCall {
        let mut call = ToolCall::function(
            self.id.unwrap_or_else(|| format!("call_{index}")),
            index,
            self.name.unwrap_or_default(),
            self.arguments,
        );
        if let Some(kind) = self.kind {
            call.kind = kind;
        }
        call
    }
}

/// A complete backend message, however it arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalMessage {
    pub message: ChatMessage,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<Usage>,
    pub id: Option<String>,
    pub model: Option<String>,
}

impl LogicalMessage {
    /// Accept a non-streaming response verbatim (first choice).
    ///
    /// Tool calls without an `index` get their position in the message.
    pub fn from_completion(response: ChatCompletionResponse) -> Result<Self> {
        let ChatCompletionResponse {
            id,
            model,
            choices,
            usage,
            ..
        } = response;
        let choice = choices
            .into_iter()
            .next()
            .ok_or_else(|| RelayError::ParseError("backend response has no choices".into()))?;

        let mut message = choice.message;
        for (position, call) in message.tool_calls.iter_mut().enumerate() {
            call.index.get_or_insert(position as u32);
        }

        Ok(Self {
            message,
            finish_reason: choice.finish_reason,
            usage,
            id: Some(id).filter(|s| !s.is_empty()),
            model: Some(model).filter(|s| !s.is_empty()),
        })
    }
}

/// Streaming reconstruction state for one backend response.
#[derive(Debug, Default)]
pub struct DeltaAccumulator {
    id: Option<String>,
    model: Option<String>,
    content: String,
    reasoning: String,
    tool_calls: BTreeMap<u32, PartialToolCall>,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
}

impl DeltaAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one chunk into the state.
    pub fn push(&mut self, chunk: &ChatCompletionChunk) {
        set_once(&mut self.id, Some(&chunk.id));
        set_once(&mut self.model, Some(&chunk.model));

        if let Some(usage) = &chunk.usage {
            self.usage = Some(usage.clone());
        }

        for choice in &chunk.choices {
            let delta = &choice.delta;
            if let Some(text) = &delta.content {
                self.content.push_str(text);
            }
            if let Some(text) = &delta.reasoning_content {
                self.reasoning.push_str(text);
            }
            for fragment in &delta.tool_calls {
                self.tool_calls
                    .entry(fragment.index)
                    .or_default()
                    .apply(fragment);
            }
            if let Some(reason) = &choice.finish_reason {
                self.finish_reason = Some(reason.clone());
            }
        }
    }

    /// Whether the terminal marker has been seen.
    pub fn is_finished(&self) -> bool {
        self.finish_reason.is_some()
    }

    /// Reasoning received so far.
    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    /// Produce the logical message, failing if the stream never reached its terminal marker.
    pub fn finish(self) -> Result<LogicalMessage> {
        let Some(finish_reason) = self.finish_reason else {
            return Err(RelayError::StreamTruncated(format!(
                "stream ended without finish_reason ({} content bytes, {} reasoning bytes, {} tool calls)",
                self.content.len(),
                self.reasoning.len(),
                self.tool_calls.len()
            )));
        };

        let tool_calls: Vec<ToolCall> = self
            .tool_calls
            .into_iter()
            .map(|(index, partial)| partial.into_call(index))
            .collect();

        let content = if self.content.is_empty() && !tool_calls.is_empty() {
            None
        } else {
            Some(self.content)
        };

        let message = ChatMessage {
            role: MessageRole::Assistant,
            content,
            reasoning_content: Some(self.reasoning).filter(|r| !r.is_empty()),
            tool_calls,
            tool_call_id: None,
            name: None,
        };

        Ok(LogicalMessage {
            message,
            finish_reason: Some(finish_reason),
            usage: self.usage,
            id: self.id,
            model: self.model,
        })
    }
}
