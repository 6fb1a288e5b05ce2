//! Parse a chat-completions `text/event-stream` body into chunks.
//!
//! Each SSE `data:` payload carries one JSON chunk. Empty payloads are skipped and the
//! `[DONE]` marker ends the stream. An `{"error": ...}` payload becomes an API error.

use std::fmt::Display;

use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::error::RelayError;
use crate::streaming::ChunkStream;
use crate::types::ChatCompletionChunk;

/// End-of-stream marker used by OpenAI-compatible backends.
pub const DONE_MARKER: &str = "[DONE]";

/// Convert a byte stream into a stream of chat-completion chunks.
pub fn chunk_stream<S, B, E>(byte_stream: S) -> ChunkStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let out = async_stream::stream! {
        let mut events = Box::pin(byte_stream.eventsource());

        while let Some(item) = events.next().await {
            let event = match item {
                Ok(ev) => ev,
                Err(e) => {
                    yield Err(RelayError::StreamError(format!("SSE stream error: {e}")));
                    return;
                }
            };

            let data = event.data.trim();
            if data.is_empty() {
                continue;
            }
            if data == DONE_MARKER {
                return;
            }

            match parse_chunk(data) {
                Ok(chunk) => yield Ok(chunk),
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    };
    Box::pin(out)
}

fn parse_chunk(data: &str) -> Result<ChatCompletionChunk, RelayError> {
    let value: Value = serde_json::from_str(data)
        .map_err(|e| RelayError::ParseError(format!("invalid chunk JSON: {e}")))?;

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("backend reported an error mid-stream")
            .to_string();
        let code = error
            .get("code")
            .and_then(Value::as_u64)
            .and_then(|c| u16::try_from(c).ok())
            .unwrap_or(500);
        return Err(RelayError::ApiError {
            code,
            message,
            details: Some(error.clone()),
        });
    }

    serde_json::from_value(value)
        .map_err(|e| RelayError::ParseError(format!("invalid chunk shape: {e}")))
}
