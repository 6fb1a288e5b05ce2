//! Server adapters: turn orchestration results into OpenAI-compatible wire payloads.
//!
//! - **Framework-agnostic helpers**: [`completion_chunks`] encodes a [`TurnStream`] as
//!   `chat.completion.chunk` JSON payloads ending with `[DONE]`; [`sse_lines`] frames them as
//!   `data:` lines; [`error_body`] builds the OpenAI error object.
//! - **Axum router**: [`axum::router`] (requires the `server-adapters` feature).
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use reasoning_relay::orchestrator::TurnStream;
//! use reasoning_relay::server_adapters::{SseOptions, sse_lines};
//!
//! async fn forward(turn: TurnStream) {
//!     let mut lines = sse_lines(turn, "deepseek-reasoner", SseOptions::development());
//!     while let Some(line) = lines.next().await {
//!         print!("{line}");
//!     }
//! }
//! ```

use std::pin::Pin;

use futures::{Stream, StreamExt};
use serde_json::{Value, json};

use crate::error::{ErrorCategory, RelayError};
use crate::orchestrator::{TurnEvent, TurnStream};
use crate::streaming::DONE_MARKER;
use crate::types::{ChatCompletionChunk, ChunkDelta, MessageRole, ToolCallDelta, completion_id};

#[cfg(feature = "server-adapters")]
pub mod axum;

pub type PayloadStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Options for streamed responses.
#[derive(Debug, Clone)]
pub struct SseOptions {
    /// Attach summed usage to the final chunk.
    ///
    /// Default: `true`
    pub include_usage: bool,

    /// Replace messages of internal and configuration errors.
    ///
    /// Backend and tool errors are passed through either way.
    /// Default: `true`
    pub mask_errors: bool,

    /// Message used when masking. Default: `"internal error"`.
    pub masked_error_message: Option<String>,
}

impl Default for SseOptions {
    fn default() -> Self {
        Self {
            include_usage: true,
            mask_errors: true,
            masked_error_message: None,
        }
    }
}

impl SseOptions {
    /// Errors not masked.
    pub fn development() -> Self {
        Self {
            mask_errors: false,
            ..Default::default()
        }
    }

    pub fn production() -> Self {
        Self::default()
    }

    fn error_message(&self, err: &RelayError) -> String {
        let sensitive = matches!(
            err.category(),
            ErrorCategory::Internal | ErrorCategory::Configuration
        );
        if self.mask_errors && sensitive {
            self.masked_error_message
                .clone()
                .unwrap_or_else(|| "internal error".to_string())
        } else {
            err.to_string()
        }
    }
}

/// OpenAI-style error object: `{"error": {"message", "type", "code"}}`.
pub fn error_body(err: &RelayError, opts: &SseOptions) -> Value {
    json!({
        "error": {
            "message": opts.error_message(err),
            "type": err.kind(),
            "code": err.status_code(),
        }
    })
}

/// Encode a streamed turn as chunk payloads.
///
/// Every chunk shares one `chatcmpl-` id. The first chunk carries `role: assistant`; tool
/// calls handed back to the client become one `tool_calls` delta; the final chunk carries
/// the finish reason (and usage when enabled). An error is sent as an error object. The
/// last payload is always `[DONE]`.
pub fn completion_chunks(turn: TurnStream, model: impl Into<String>, opts: SseOptions) -> PayloadStream {
    let model = model.into();
    let id = completion_id();

    let s = async_stream::stream! {
        let mut turn = turn;
        let mut role_sent = false;
        let mut delta_chunk = |delta: ChunkDelta| {
            let mut delta = delta;
            if !role_sent {
                delta.role = Some(MessageRole::Assistant);
                role_sent = true;
            }
            encode(&ChatCompletionChunk::new(id.clone(), model.clone(), delta, None))
        };

        while let Some(item) = turn.next().await {
            match item {
                Ok(TurnEvent::ReasoningDelta(text)) => {
                    yield delta_chunk(ChunkDelta { reasoning_content: Some(text), ..Default::default() });
                }
                Ok(TurnEvent::ContentDelta(text)) => {
                    yield delta_chunk(ChunkDelta { content: Some(text), ..Default::default() });
                }
                Ok(TurnEvent::ClientToolCalls(calls)) => {
                    let tool_calls = calls.iter().map(ToolCallDelta::from_call).collect();
                    yield delta_chunk(ChunkDelta { tool_calls, ..Default::default() });
                }
                Ok(TurnEvent::ToolResult { name, is_error, .. }) => {
                    tracing::debug!(tool = %name, is_error, "tool result folded into turn");
                }
                Ok(TurnEvent::Finished(outcome)) => {
                    let usage = if opts.include_usage { outcome.usage.clone() } else { None };
                    let last = ChatCompletionChunk::new(
                        id.clone(),
                        outcome.model.clone(),
                        ChunkDelta::default(),
                        Some(outcome.finish_reason.clone()),
                    )
                    .with_usage(usage);
                    yield encode(&last);
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "streamed turn failed");
                    yield error_body(&e, &opts).to_string();
                    break;
                }
            }
        }
        yield DONE_MARKER.to_string();
    };
    Box::pin(s)
}

fn encode(chunk: &ChatCompletionChunk) -> String {
    serde_json::to_string(chunk).unwrap_or_else(|_| "{}".to_string())
}

/// [`completion_chunks`] framed as SSE `data:` lines.
pub fn sse_lines(turn: TurnStream, model: impl Into<String>, opts: SseOptions) -> PayloadStream {
    Box::pin(completion_chunks(turn, model, opts).map(|payload| format!("data: {payload}\n\n")))
}
