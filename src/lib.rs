//! # Reasoning Relay
//!
//! Multi-turn tool orchestration for OpenAI-compatible reasoning backends.
//!
#![deny(unsafe_code)]

//! A client sends one chat-completions request; the relay may need several backend
//! round-trips to answer it, running the tools the model asks for on external tool
//! providers (MCP servers over stdio, streamable HTTP or SSE) in between. The client still
//! sees exactly one assistant message per turn, with the reasoning of every sub-turn kept.
//!
//! ## Layout
//!
//! - [`streaming`]: chunk parsing and [`streaming::DeltaAccumulator`], which rebuilds one
//!   message from a chunk stream.
//! - [`registry`]: [`registry::ToolProviderRegistry`] and the provider transports.
//! - [`orchestrator`]: the tool loop ([`orchestrator::run_turn`],
//!   [`orchestrator::run_turn_stream`]) and [`orchestrator::TurnConsolidator`].
//! - [`backend`]: the [`backend::ChatBackend`] seam and its OpenAI-compatible client.
//! - [`server_adapters`]: OpenAI wire encoding, plus an axum router behind the
//!   `server-adapters` feature.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use reasoning_relay::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = Arc::new(OpenAiCompatBackend::new(
//!         BackendConfig::default().with_api_key("your-api-key"),
//!     )?);
//!     let registry = Arc::new(ToolProviderRegistry::new(
//!         vec![ProviderConfig::stdio("weather", "weather-mcp", ["--stdio"])],
//!         RegistryOptions::default(),
//!     ));
//!     registry.start_all().await;
//!
//!     let request = ChatCompletionRequest::new(
//!         "deepseek-reasoner",
//!         vec![ChatMessage::user("What's the weather in Paris?")],
//!     );
//!     let outcome = run_turn(backend, registry, request, TurnOptions::default()).await?;
//!     println!("{}", outcome.message.content_text());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod server_adapters;
pub mod streaming;
pub mod telemetry;
pub mod types;

/// Common imports.
pub mod prelude {
    pub use crate::backend::{BackendReply, ChatBackend, OpenAiCompatBackend};
    pub use crate::config::{BackendConfig, OrchestratorConfig, RelayConfig};
    pub use crate::error::RelayError;
    pub use crate::orchestrator::{
        StopReason, ToolResolver, TurnEvent, TurnOptions, TurnOutcome, run_turn,
        run_turn_stream,
    };
    pub use crate::registry::{
        ProviderConfig, ProviderState, ProviderStatus, RegistryOptions, ToolProviderRegistry,
    };
    pub use crate::streaming::{DeltaAccumulator, LogicalMessage};
    pub use crate::types::{
        ChatCompletionRequest, ChatCompletionResponse, ChatMessage, FinishReason, ToolCall,
        ToolDefinition, Usage,
    };
}

pub use error::{RelayError, Result};
