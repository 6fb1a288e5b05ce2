//! Streamed variant of the tool loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::run::drive;
use super::types::{ToolResolver, TurnEvent, TurnOptions, TurnStream};
use crate::backend::ChatBackend;
use crate::types::ChatCompletionRequest;

/// Run one logical turn on a background task and stream its progress.
///
/// The backend is always asked for a chunk stream. Reasoning and content deltas are
/// forwarded as they arrive; the stream ends with `TurnEvent::Finished` or an error.
/// Dropping the stream cancels the turn, including tool calls still in flight. Providers
/// themselves keep running.
pub fn run_turn_stream(
    backend: Arc<dyn ChatBackend>,
    tools: Arc<dyn ToolResolver>,
    request: ChatCompletionRequest,
    options: TurnOptions,
) -> TurnStream {
    let options = options.with_stream(true);
    let (tx, mut rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!("turn stream dropped; cancelling turn");
            }
            outcome = drive(backend, tools, request, options, Some(tx.clone())) => {
                let last = outcome.map(|o| TurnEvent::Finished(Box::new(o)));
                let _ = tx.send(last).await;
            }
        }
    });

    let guard = cancel.drop_guard();
    Box::pin(async_stream::stream! {
        let _guard = guard;
        while let Some(item) = rx.recv().await {
            let done = matches!(item, Err(_) | Ok(TurnEvent::Finished(_)));
            yield item;
            if done {
                break;
            }
        }
    })
}
