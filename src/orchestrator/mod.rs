//! Multi-turn tool orchestration.
//!
//! A client turn may take several backend round-trips: the model asks for tools, the
//! registry runs them, and the results go back until the model answers. The loop keeps
//! exactly one assistant message per turn (the anchor), folding every intermediate
//! message into it through [`TurnConsolidator`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use reasoning_relay::backend::OpenAiCompatBackend;
//! use reasoning_relay::config::BackendConfig;
//! use reasoning_relay::orchestrator::{TurnOptions, run_turn};
//! use reasoning_relay::registry::ToolProviderRegistry;
//! use reasoning_relay::types::{ChatCompletionRequest, ChatMessage};
//!
//! # async fn demo() -> reasoning_relay::error::Result<()> {
//! let backend = Arc::new(OpenAiCompatBackend::new(BackendConfig::default().with_api_key("sk-..."))?);
//! let registry = Arc::new(ToolProviderRegistry::default());
//! let request = ChatCompletionRequest::new("deepseek-reasoner", vec![ChatMessage::user("hi")]);
//!
//! let outcome = run_turn(backend, registry, request, TurnOptions::default()).await?;
//! println!("{}", outcome.message.content_text());
//! # Ok(())
//! # }
//! ```

pub mod consolidator;
pub mod dispatch;
mod run;
mod stream;
pub mod types;

pub use consolidator::{PARAGRAPH_SEPARATOR, TurnConsolidator, TurnState, append_paragraph};
pub use dispatch::{ToolOutcome, dispatch};
pub use run::run_turn;
pub use stream::run_turn_stream;
pub use types::{StopReason, ToolResolver, TurnEvent, TurnOptions, TurnOutcome, TurnStream};
