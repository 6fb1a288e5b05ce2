//! Concurrent execution of one round of tool calls.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tracing::Instrument;

use super::types::ToolResolver;
use crate::error::{RelayError, Result};
use crate::types::ToolCall;

/// Result of one tool call, ready to become a tool message.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub call_id: String,
    pub name: String,
    pub content: String,
    pub is_error: bool,
}

/// Run every call as its own task and return the outcomes in `calls` order.
///
/// Failures become structured error payloads, so every call gets exactly one outcome.
/// Dropping the returned future aborts the outstanding tasks.
pub async fn dispatch(resolver: Arc<dyn ToolResolver>, calls: &[ToolCall]) -> Vec<ToolOutcome> {
    let mut tasks = JoinSet::new();
    for (position, call) in calls.iter().enumerate() {
        let resolver = resolver.clone();
        let name = call.function.name.clone();
        let arguments = call.function.arguments.clone();
        let span = tracing::info_span!("tool_call", tool = %name, call_id = %call.id);
        tasks.spawn(
            async move {
                let started = Instant::now();
                let result = resolver.call_tool(&name, &arguments).await;
                tracing::debug!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    ok = result.is_ok(),
                    "tool call finished"
                );
                (position, result)
            }
            .instrument(span),
        );
    }

    let mut slots: Vec<Option<Result<String>>> = vec![None; calls.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((position, result)) => slots[position] = Some(result),
            Err(e) => tracing::warn!(error = %e, "tool task did not complete"),
        }
    }

    calls
        .iter()
        .zip(slots)
        .map(|(call, slot)| {
            let result = slot.unwrap_or_else(|| {
                Err(RelayError::InternalError("tool task did not complete".into()))
            });
            let (content, is_error) = match result {
                Ok(text) => (text, false),
                Err(e) => {
                    if e.is_tool_recoverable() {
                        tracing::warn!(tool = %call.function.name, error = %e, "tool call failed");
                    } else {
                        tracing::error!(tool = %call.function.name, error = %e, "tool call failed unexpectedly");
                    }
                    (e.tool_error_payload(), true)
                }
            };
            ToolOutcome {
                call_id: call.id.clone(),
                name: call.function.name.clone(),
                content,
                is_error,
            }
        })
        .collect()
}
