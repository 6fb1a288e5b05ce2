//! The tool loop shared by the buffered and streamed entry points.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;

use super::consolidator::TurnConsolidator;
use super::dispatch::dispatch;
use super::types::{StopReason, ToolResolver, TurnEvent, TurnOptions, TurnOutcome};
use crate::backend::{BackendReply, ChatBackend};
use crate::error::{RelayError, Result};
use crate::streaming::{DeltaAccumulator, LogicalMessage};
use crate::types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatMessage, FinishReason, ToolDefinition, Usage,
    flattened_tool_calls_json,
};

pub(crate) type EventSender = mpsc::Sender<Result<TurnEvent>>;

/// Forwards live deltas so that the reasoning a consumer sees concatenates to exactly the
/// anchor's final reasoning.
struct Emitter {
    tx: Option<EventSender>,
    emitted_reasoning: bool,
    separator_due: bool,
}

impl Emitter {
    fn new(tx: Option<EventSender>) -> Self {
        Self {
            tx,
            emitted_reasoning: false,
            separator_due: false,
        }
    }

    async fn emit(&self, event: TurnEvent) {
        if let Some(tx) = &self.tx {
            // A closed channel means the consumer left; the caller is cancelled separately.
            let _ = tx.send(Ok(event)).await;
        }
    }

    /// Start a reasoning paragraph; the separator is sent lazily with its first fragment.
    fn begin_paragraph(&mut self) {
        self.separator_due = self.emitted_reasoning;
    }

    async fn reasoning(&mut self, text: &str) {
        if text.is_empty() || self.tx.is_none() {
            return;
        }
        let delta = if self.separator_due {
            self.separator_due = false;
            format!("\n\n{text}")
        } else {
            text.to_string()
        };
        self.emitted_reasoning = true;
        self.emit(TurnEvent::ReasoningDelta(delta)).await;
    }

    async fn content(&self, text: &str) {
        if !text.is_empty() {
            self.emit(TurnEvent::ContentDelta(text.to_string())).await;
        }
    }

    async fn chunk(&mut self, chunk: &ChatCompletionChunk) {
        for choice in &chunk.choices {
            if let Some(text) = &choice.delta.reasoning_content {
                self.reasoning(text).await;
            }
            if let Some(text) = &choice.delta.content {
                self.content(text).await;
            }
        }
    }
}

/// Client tools first, then registry tools whose names the client has not taken.
fn advertised_tools(client: &[ToolDefinition], registry: Vec<ToolDefinition>) -> Vec<ToolDefinition> {
    let mut tools = client.to_vec();
    for definition in registry {
        if !tools.iter().any(|t| t.name() == definition.name()) {
            tools.push(definition);
        }
    }
    tools
}

async fn receive(reply: BackendReply, emitter: &mut Emitter) -> Result<LogicalMessage> {
    match reply {
        BackendReply::Complete(response) => {
            let logical = LogicalMessage::from_completion(response)?;
            emitter.reasoning(logical.message.reasoning_text()).await;
            emitter.content(logical.message.content_text()).await;
            Ok(logical)
        }
        BackendReply::Stream(mut chunks) => {
            let mut acc = DeltaAccumulator::new();
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk?;
                emitter.chunk(&chunk).await;
                acc.push(&chunk);
            }
            acc.finish()
        }
    }
}

/// Drive one logical turn to completion.
pub(crate) async fn drive(
    backend: Arc<dyn ChatBackend>,
    tools: Arc<dyn ToolResolver>,
    request: ChatCompletionRequest,
    options: TurnOptions,
    events: Option<EventSender>,
) -> Result<TurnOutcome> {
    let max_iterations = options.max_iterations.max(1);
    let advertised = advertised_tools(&request.tools, tools.catalog());
    let mut history = request.messages.clone();
    let mut model = request.model.clone();
    let mut consolidator = TurnConsolidator::new();
    let mut emitter = Emitter::new(events);
    let mut usage: Option<Usage> = None;

    tracing::info!(
        model = %request.model,
        messages = history.len(),
        tools = advertised.len(),
        auto_execute = options.auto_execute,
        "starting turn"
    );

    for iteration in 1..=max_iterations {
        let mut outgoing = request.clone();
        outgoing.messages = history.clone();
        outgoing.tools = advertised.clone();
        outgoing.stream = options.stream;
        if outgoing.tools.is_empty() {
            outgoing.tool_choice = None;
        }

        let reply = backend.send(outgoing).await?;
        emitter.begin_paragraph();
        let logical = receive(reply, &mut emitter).await?;

        if let Some(step) = &logical.usage {
            match &mut usage {
                Some(total) => total.merge(step),
                None => usage = Some(step.clone()),
            }
        }
        if let Some(name) = logical.model.as_ref().filter(|m| !m.is_empty()) {
            model = name.clone();
        }
        let backend_finish = logical.finish_reason.clone();
        tracing::debug!(
            iteration,
            finish_reason = backend_finish.as_ref().map(FinishReason::as_str).unwrap_or("none"),
            tool_calls = logical.message.tool_calls.len(),
            "backend round-trip complete"
        );

        consolidator.consolidate(&mut history, logical.message)?;
        let pending = consolidator
            .anchor(&history)
            .map(|anchor| anchor.tool_calls.clone())
            .ok_or_else(|| RelayError::InternalError("turn has no anchor".into()))?;

        let finish = |finish_reason: FinishReason,
                      stop_reason: StopReason,
                      history: Vec<ChatMessage>|
         -> Result<TurnOutcome> {
            let message = consolidator
                .anchor(&history)
                .cloned()
                .ok_or_else(|| RelayError::InternalError("turn has no anchor".into()))?;
            Ok(TurnOutcome {
                message,
                history,
                finish_reason,
                stop_reason,
                usage: usage.clone(),
                iterations: iteration,
                model: model.clone(),
            })
        };

        if pending.is_empty() {
            let reason = backend_finish
                .filter(|r| *r != FinishReason::ToolCalls)
                .unwrap_or(FinishReason::Stop);
            tracing::info!(iterations = iteration, "turn completed");
            return finish(reason, StopReason::Completed, history);
        }

        let all_owned = pending.iter().all(|call| tools.owns(&call.function.name));
        if !(all_owned && options.auto_execute) {
            tracing::info!(
                iterations = iteration,
                calls = pending.len(),
                "returning tool calls to the client"
            );
            emitter.emit(TurnEvent::ClientToolCalls(pending)).await;
            return finish(FinishReason::ToolCalls, StopReason::ClientToolCalls, history);
        }

        if iteration == max_iterations {
            tracing::warn!(
                max_iterations,
                calls = pending.len(),
                "iteration ceiling reached with tool calls pending"
            );
            return finish(FinishReason::Length, StopReason::MaxIterations, history);
        }

        emitter.begin_paragraph();
        emitter.reasoning(&flattened_tool_calls_json(&pending)).await;

        for outcome in dispatch(tools.clone(), &pending).await {
            history.push(ChatMessage::tool(&outcome.call_id, &outcome.content));
            emitter
                .emit(TurnEvent::ToolResult {
                    call_id: outcome.call_id,
                    name: outcome.name,
                    content: outcome.content,
                    is_error: outcome.is_error,
                })
                .await;
        }
    }

    // Every path through the final iteration returns above.
    Err(RelayError::InternalError("tool loop exited without an outcome".into()))
}

/// Run one logical turn and return its consolidated outcome.
///
/// Tool calls owned by `tools` are executed and fed back until the backend answers without
/// them. Calls naming client tools (or any call when auto-execution is off) end the turn
/// with `finish_reason = tool_calls`. Reaching `max_iterations` with calls still pending
/// ends it with `finish_reason = length`; see [`TurnOutcome::max_iterations_error`].
pub async fn run_turn(
    backend: Arc<dyn ChatBackend>,
    tools: Arc<dyn ToolResolver>,
    request: ChatCompletionRequest,
    options: TurnOptions,
) -> Result<TurnOutcome> {
    drive(backend, tools, request, options, None).await
}
