//! Orchestration options, outcomes and stream events.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::config::{DEFAULT_MAX_ITERATIONS, OrchestratorConfig};
use crate::error::{RelayError, Result};
use crate::registry::ToolProviderRegistry;
use crate::types::{
    ChatCompletionResponse, ChatMessage, FinishReason, ToolCall, ToolDefinition, Usage,
};

/// Tools the loop may execute on the model's behalf.
#[async_trait]
pub trait ToolResolver: Send + Sync {
    /// Definitions advertised to the backend next to the client's own tools.
    fn catalog(&self) -> Vec<ToolDefinition>;

    /// Whether `name` is executed here rather than by the client.
    fn owns(&self, name: &str) -> bool;

    /// Execute `name` with the raw JSON `arguments` produced by the model.
    async fn call_tool(&self, name: &str, arguments: &str) -> Result<String>;
}

#[async_trait]
impl ToolResolver for ToolProviderRegistry {
    fn catalog(&self) -> Vec<ToolDefinition> {
        ToolProviderRegistry::catalog(self)
    }

    fn owns(&self, name: &str) -> bool {
        ToolProviderRegistry::owns(self, name)
    }

    async fn call_tool(&self, name: &str, arguments: &str) -> Result<String> {
        self.invoke(name, arguments).await
    }
}

/// Per-turn knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnOptions {
    /// Ceiling on backend round-trips.
    pub max_iterations: usize,
    /// Execute registry-owned tool calls instead of returning them to the client.
    pub auto_execute: bool,
    /// Ask the backend for a chunk stream.
    pub stream: bool,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            auto_execute: true,
            stream: false,
        }
    }
}

impl From<&OrchestratorConfig> for TurnOptions {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            auto_execute: config.auto_execute,
            stream: false,
        }
    }
}

impl TurnOptions {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_auto_execute(mut self, auto_execute: bool) -> Self {
        self.auto_execute = auto_execute;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The backend produced a final answer.
    Completed,
    /// The anchor requests tools the client has to run.
    ClientToolCalls,
    /// The iteration ceiling was reached with tool calls still pending.
    MaxIterations,
}

/// Result of one logical turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// The single consolidated assistant message of the turn.
    pub message: ChatMessage,
    /// Conversation history ending with `message`.
    pub history: Vec<ChatMessage>,
    pub finish_reason: FinishReason,
    pub stop_reason: StopReason,
    /// Usage summed over every backend round-trip.
    pub usage: Option<Usage>,
    /// Backend round-trips performed.
    pub iterations: usize,
    pub model: String,
}

impl TurnOutcome {
    /// `MaxIterationsExceeded` when the ceiling cut the turn short.
    pub fn max_iterations_error(&self) -> Option<RelayError> {
        (self.stop_reason == StopReason::MaxIterations)
            .then_some(RelayError::MaxIterationsExceeded(self.iterations))
    }

    pub fn into_response(self) -> ChatCompletionResponse {
        ChatCompletionResponse::from_message(self.model, self.message, self.finish_reason, self.usage)
    }
}

/// Progress of a streamed turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// Reasoning text, including the paragraphs recording executed tool calls.
    ReasoningDelta(String),
    ContentDelta(String),
    /// Tool calls handed back to the client; emitted right before `Finished`.
    ClientToolCalls(Vec<ToolCall>),
    /// A registry tool finished.
    ToolResult {
        call_id: String,
        name: String,
        content: String,
        is_error: bool,
    },
    Finished(Box<TurnOutcome>),
}

pub type TurnStream = Pin<Box<dyn Stream<Item = Result<TurnEvent>> + Send>>;
