//! Shared fixtures: a scripted chat backend, an in-memory tool set and chunk builders.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use reasoning_relay::backend::{BackendReply, ChatBackend};
use reasoning_relay::error::{RelayError, Result};
use reasoning_relay::orchestrator::ToolResolver;
use reasoning_relay::types::{
    ChatChoice, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatMessage,
    ChunkDelta, FinishReason, FunctionCallDelta, ToolCall, ToolCallDelta, ToolDefinition, Usage,
};
use serde_json::json;

pub const MODEL: &str = "deepseek-reasoner";

/// One scripted backend reply.
pub enum Scripted {
    Complete(ChatCompletionResponse),
    Chunks(Vec<ChatCompletionChunk>),
    /// Yields the chunks, then never ends.
    Stalled(Vec<ChatCompletionChunk>),
    Fail(RelayError),
}

/// Backend answering from a queue and recording every request it receives.
#[derive(Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<ChatCompletionRequest>>,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ChatCompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn send(&self, request: ChatCompletionRequest) -> Result<BackendReply> {
        self.requests.lock().unwrap().push(request);
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Complete(response)) => Ok(BackendReply::Complete(response)),
            Some(Scripted::Chunks(chunks)) => Ok(BackendReply::Stream(Box::pin(stream::iter(
                chunks.into_iter().map(Ok),
            )))),
            Some(Scripted::Stalled(chunks)) => Ok(BackendReply::Stream(Box::pin(
                stream::iter(chunks.into_iter().map(Ok)).chain(stream::pending()),
            ))),
            Some(Scripted::Fail(err)) => Err(err),
            None => Err(RelayError::InternalError("backend script exhausted".into())),
        }
    }
}

/// How an in-memory tool answers.
#[derive(Clone)]
pub enum FakeReply {
    Text(String),
    Timeout,
}

#[derive(Clone)]
struct FakeTool {
    delay: Duration,
    reply: FakeReply,
}

/// In-memory tool set standing in for the provider registry.
#[derive(Default)]
pub struct FakeTools {
    tools: HashMap<String, FakeTool>,
    calls: Mutex<Vec<(String, String)>>,
    cancelled: Arc<AtomicUsize>,
}

impl FakeTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(self, name: &str, text: &str) -> Self {
        self.with_tool(name, Duration::ZERO, FakeReply::Text(text.to_string()))
    }

    pub fn with_tool(mut self, name: &str, delay: Duration, reply: FakeReply) -> Self {
        self.tools.insert(name.to_string(), FakeTool { delay, reply });
        self
    }

    /// `(name, arguments)` of every call that started.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls dropped before they finished.
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

struct InFlight<'a> {
    cancelled: &'a AtomicUsize,
    finished: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl ToolResolver for FakeTools {
    fn catalog(&self) -> Vec<ToolDefinition> {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| ToolDefinition::function(name.as_str(), "fake tool", json!({"type": "object"})))
            .collect()
    }

    fn owns(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    async fn call_tool(&self, name: &str, arguments: &str) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments.to_string()));
        let tool = self
            .tools
            .get(name)
            .cloned()
            .ok_or_else(|| RelayError::ProviderUnavailable(format!("no tool '{name}'")))?;

        let mut in_flight = InFlight {
            cancelled: &self.cancelled,
            finished: false,
        };
        tokio::time::sleep(tool.delay).await;
        in_flight.finished = true;

        match tool.reply {
            FakeReply::Text(text) => Ok(text),
            FakeReply::Timeout => Err(RelayError::tool_timeout(name, Duration::from_millis(50))),
        }
    }
}

pub fn call(id: &str, index: u32, name: &str, arguments: &str) -> ToolCall {
    ToolCall::function(id, index, name, arguments)
}

/// Non-streaming reply.
pub fn completion(
    reasoning: &str,
    content: Option<&str>,
    calls: Vec<ToolCall>,
    usage: Option<Usage>,
) -> Scripted {
    let finish = if calls.is_empty() {
        FinishReason::Stop
    } else {
        FinishReason::ToolCalls
    };
    let mut message = ChatMessage::assistant("").with_tool_calls(calls);
    message.content = content.map(str::to_string);
    if !reasoning.is_empty() {
        message.reasoning_content = Some(reasoning.to_string());
    }
    Scripted::Complete(ChatCompletionResponse {
        id: "chatcmpl-test".into(),
        object: "chat.completion".into(),
        created: 0,
        model: MODEL.into(),
        choices: vec![ChatChoice {
            index: 0,
            message,
            finish_reason: Some(finish),
        }],
        usage,
    })
}

fn chunk(delta: ChunkDelta, finish_reason: Option<FinishReason>) -> ChatCompletionChunk {
    ChatCompletionChunk::new("chatcmpl-test", MODEL, delta, finish_reason)
}

pub fn reasoning_chunk(text: &str) -> ChatCompletionChunk {
    chunk(
        ChunkDelta {
            reasoning_content: Some(text.to_string()),
            ..Default::default()
        },
        None,
    )
}

pub fn content_chunk(text: &str) -> ChatCompletionChunk {
    chunk(
        ChunkDelta {
            content: Some(text.to_string()),
            ..Default::default()
        },
        None,
    )
}

/// A tool-call fragment. The first fragment of a call carries its id and name.
pub fn tool_call_chunk(index: u32, id: Option<&str>, name: Option<&str>, arguments: &str) -> ChatCompletionChunk {
    chunk(
        ChunkDelta {
            tool_calls: vec![ToolCallDelta {
                index,
                id: id.map(str::to_string),
                kind: id.map(|_| "function".to_string()),
                function: Some(FunctionCallDelta {
                    name: name.map(str::to_string),
                    arguments: Some(arguments.to_string()),
                }),
            }],
            ..Default::default()
        },
        None,
    )
}

pub fn finish_chunk(reason: FinishReason) -> ChatCompletionChunk {
    chunk(ChunkDelta::default(), Some(reason))
}

/// The trailing usage-only chunk sent when `stream_options.include_usage` is set.
pub fn usage_chunk(prompt_tokens: u32, completion_tokens: u32) -> ChatCompletionChunk {
    let mut last = chunk(ChunkDelta::default(), None);
    last.choices.clear();
    last.with_usage(Some(Usage::new(prompt_tokens, completion_tokens)))
}
