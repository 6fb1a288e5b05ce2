//! Chat backend abstraction.
//!
//! The orchestration loop talks to the backend only through [`ChatBackend`]; replies are
//! either a whole response or a chunk stream, and the loop normalizes both into one logical
//! message.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;

use crate::error::{RelayError, Result};
use crate::streaming::{ChunkStream, DeltaAccumulator, LogicalMessage};
use crate::types::{ChatCompletionRequest, ChatCompletionResponse};

pub mod openai_compat;

pub use openai_compat::OpenAiCompatBackend;

/// What a backend returns for one request.
pub enum BackendReply {
    Complete(ChatCompletionResponse),
    Stream(ChunkStream),
}

impl std::fmt::Debug for BackendReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete(resp) => f.debug_tuple("Complete").field(resp).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl BackendReply {
    /// Drain the reply into a logical message without observing individual chunks.
    pub async fn into_logical(self) -> Result<LogicalMessage> {
        match self {
            Self::Complete(resp) => LogicalMessage::from_completion(resp),
            Self::Stream(mut stream) => {
                let mut acc = DeltaAccumulator::new();
                while let Some(chunk) = stream.next().await {
                    acc.push(&chunk?);
                }
                acc.finish()
            }
        }
    }
}

/// An OpenAI-compatible chat-completions endpoint.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send one request. `request.stream` selects the reply shape the caller expects, though
    /// implementations may answer a streaming request with a complete response.
    async fn send(&self, request: ChatCompletionRequest) -> Result<BackendReply>;

    /// List the models the backend serves.
    async fn list_models(&self) -> Result<Value> {
        Err(RelayError::NotFound(
            "model listing is not supported by this backend".into(),
        ))
    }
}
