//! JSON-RPC 2.0 frames and the MCP methods spoken to subprocess providers.
//!
//! A session runs `initialize`, sends `notifications/initialized`, then discovers tools with
//! `tools/list`. Invocations use `tools/call`.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{RelayError, Result};
use crate::types::ToolDescriptor;

/// MCP protocol revision announced during the handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// Outgoing request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: Value,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// Outgoing notification (no `id`, no reply).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A reply to one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// The `result`, or the JSON-RPC error as a tool error.
    pub fn into_result(self, method: &str) -> Result<Value> {
        if let Some(error) = self.error {
            return Err(RelayError::ToolError(format!(
                "{method} failed ({}): {}",
                error.code, error.message
            )));
        }
        self.result.ok_or_else(|| {
            RelayError::MalformedToolResponse(format!("{method} reply has neither result nor error"))
        })
    }
}

/// Anything a server may send.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    Response(JsonRpcResponse),
    Notification { method: String, params: Option<Value> },
    Request { id: Value, method: String },
}

impl IncomingMessage {
    /// Classify a decoded frame.
    pub fn classify(value: Value) -> Result<Self> {
        let method = value.get("method").and_then(Value::as_str).map(str::to_string);
        let id = value.get("id").filter(|id| !id.is_null()).cloned();
        match (method, id) {
            (Some(method), Some(id)) => Ok(Self::Request { id, method }),
            (Some(method), None) => Ok(Self::Notification {
                method,
                params: value.get("params").cloned(),
            }),
            (None, _) => serde_json::from_value(value)
                .map(Self::Response)
                .map_err(|e| RelayError::MalformedToolResponse(format!("invalid JSON-RPC frame: {e}"))),
        }
    }
}

pub fn initialize_params(client_name: &str, client_version: &str) -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": {} },
        "clientInfo": { "name": client_name, "version": client_version }
    })
}

/// Decode a `tools/list` result.
pub fn parse_tools_list(result: Value) -> Result<Vec<ToolDescriptor>> {
    #[derive(Deserialize)]
    struct ToolsList {
        #[serde(default)]
        tools: Vec<ToolDescriptor>,
    }

    serde_json::from_value::<ToolsList>(result)
        .map(|list| list.tools)
        .map_err(|e| RelayError::MalformedToolResponse(format!("invalid tools/list result: {e}")))
}

/// Render a `tools/call` result as the text handed back to the model.
///
/// Text items of `content` are joined with newlines; without any text item the `content`
/// array is returned as JSON. A result flagged `isError` becomes a tool error.
pub fn render_tool_result(result: &Value) -> Result<String> {
    let content = result.get("content").cloned().unwrap_or(Value::Array(Vec::new()));
    let items = content.as_array().ok_or_else(|| {
        RelayError::MalformedToolResponse("tools/call result content is not an array".into())
    })?;

    let texts: Vec<&str> = items
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
        .map(|item| item.get("text").and_then(Value::as_str).unwrap_or_default())
        .collect();

    let rendered = if texts.is_empty() {
        content.to_string()
    } else {
        texts.join("\n")
    };

    if result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
        return Err(RelayError::ToolError(rendered));
    }
    Ok(rendered)
}
