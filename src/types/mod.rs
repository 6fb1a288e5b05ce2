//! Wire types shared by the backend client, the orchestration loop and the server adapter.

pub mod chat;
pub mod completion;
pub mod tools;

pub use chat::{
    ChatMessage, FlattenedToolCall, FunctionCall, MessageRole, ToolCall,
    flattened_tool_calls_json,
};
pub use completion::{
    ChatChoice, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChunkChoice,
    ChunkDelta, CompletionTokensDetails, FinishReason, FunctionCallDelta, PromptTokensDetails,
    StreamOptions, ToolCallDelta, Usage, completion_id,
};
pub use tools::{FunctionDefinition, ToolDefinition, ToolDescriptor};
