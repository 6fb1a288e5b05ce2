//! Core error types.

use serde_json::json;
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors raised by the relay.
///
/// Variants fall into three groups:
/// - tool failures (`MalformedToolResponse`, `ToolTimeout`, `ProviderUnavailable`,
///   `ToolError`), which the orchestration loop converts into tool-result content instead of
///   aborting a turn;
/// - backend failures (`ApiError`, `HttpError`, `ConnectionError`, `TimeoutError`,
///   `StreamTruncated`, `ParseError`), which abort the turn and reach the caller unmodified;
/// - local failures (configuration, state, I/O).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayError {
    /// A streamed backend response ended before its terminal marker.
    #[error("Stream truncated: {0}")]
    StreamTruncated(String),

    /// A tool call carried unparsable arguments, or a provider answered with a body that is
    /// not a valid tool result.
    #[error("Malformed tool response: {0}")]
    MalformedToolResponse(String),

    /// A tool invocation did not answer within its time budget.
    #[error("Tool '{tool}' timed out after {timeout_ms}ms")]
    ToolTimeout { tool: String, timeout_ms: u64 },

    /// The provider owning a tool is not running or not reachable.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provider ran the tool and reported a failure.
    #[error("Tool execution error: {0}")]
    ToolError(String),

    /// The turn stopped after exhausting its iteration budget.
    #[error("Maximum iterations exceeded ({0})")]
    MaxIterationsExceeded(usize),

    /// The backend answered with a non-success status.
    #[error("API error {code}: {message}")]
    ApiError {
        code: u16,
        message: String,
        details: Option<serde_json::Value>,
    },

    /// HTTP transport failure.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Connection could not be established.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Request-level timeout toward the backend.
    #[error("Timeout error: {0}")]
    TimeoutError(String),

    /// Event-stream framing failure.
    #[error("Stream error: {0}")]
    StreamError(String),

    /// Response payload could not be decoded.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    JsonError(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Operation not valid in the current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Unknown provider or tool.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid caller input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O failure.
    #[error("IO error: {0}")]
    IoError(String),

    /// Internal failure.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Broad classification used for status mapping and log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caller-side problem (4xx style).
    Client,
    /// Backend-side problem (5xx style).
    Server,
    /// Network or transport problem.
    Network,
    /// Tool execution problem.
    Tool,
    /// Local configuration problem.
    Configuration,
    /// Anything else.
    Internal,
}

impl RelayError {
    /// Create an API error from a status code and message.
    pub fn api_error(code: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a tool timeout error.
    pub fn tool_timeout(tool: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::ToolTimeout {
            tool: tool.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Whether the error is a tool failure that the loop reports back to the backend as a
    /// tool result instead of aborting the turn.
    pub fn is_tool_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MalformedToolResponse(_)
                | Self::ToolTimeout { .. }
                | Self::ProviderUnavailable(_)
                | Self::ToolError(_)
        )
    }

    /// Classify the error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ApiError { code, .. } if (400..500).contains(code) => ErrorCategory::Client,
            Self::ApiError { .. } => ErrorCategory::Server,
            Self::HttpError(_)
            | Self::ConnectionError(_)
            | Self::TimeoutError(_)
            | Self::StreamError(_)
            | Self::StreamTruncated(_) => ErrorCategory::Network,
            Self::MalformedToolResponse(_)
            | Self::ToolTimeout { .. }
            | Self::ProviderUnavailable(_)
            | Self::ToolError(_) => ErrorCategory::Tool,
            Self::ConfigurationError(_) => ErrorCategory::Configuration,
            Self::InvalidInput(_) | Self::NotFound(_) => ErrorCategory::Client,
            _ => ErrorCategory::Internal,
        }
    }

    /// HTTP status an inbound adapter should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ApiError { code, .. } => *code,
            Self::InvalidInput(_) => 400,
            Self::NotFound(_) => 404,
            Self::TimeoutError(_) => 504,
            Self::HttpError(_)
            | Self::ConnectionError(_)
            | Self::StreamError(_)
            | Self::StreamTruncated(_)
            | Self::ParseError(_) => 502,
            _ => 500,
        }
    }

    /// Short machine-readable kind, used in tool-error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StreamTruncated(_) => "stream_truncated",
            Self::MalformedToolResponse(_) => "malformed_tool_response",
            Self::ToolTimeout { .. } => "tool_timeout",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::ToolError(_) => "tool_error",
            Self::MaxIterationsExceeded(_) => "max_iterations_exceeded",
            Self::ApiError { .. } => "api_error",
            Self::HttpError(_) => "http_error",
            Self::ConnectionError(_) => "connection_error",
            Self::TimeoutError(_) => "timeout",
            Self::StreamError(_) => "stream_error",
            Self::ParseError(_) => "parse_error",
            Self::JsonError(_) => "json_error",
            Self::ConfigurationError(_) => "configuration_error",
            Self::InvalidState(_) => "invalid_state",
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::IoError(_) => "io_error",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// JSON string stored as the content of a tool message when an invocation fails.
    pub fn tool_error_payload(&self) -> String {
        json!({
            "error": self.kind(),
            "message": self.to_string(),
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn tool_errors_are_recoverable() {
        assert!(RelayError::tool_timeout("weather_get", Duration::from_secs(2)).is_tool_recoverable());
        assert!(RelayError::ProviderUnavailable("weather".into()).is_tool_recoverable());
        assert!(RelayError::MalformedToolResponse("bad".into()).is_tool_recoverable());
        assert!(!RelayError::StreamTruncated("eof".into()).is_tool_recoverable());
        assert!(!RelayError::api_error(500, "boom").is_tool_recoverable());
    }

    #[test]
    fn tool_error_payload_is_structured_json() {
        let err = RelayError::tool_timeout("search_query", Duration::from_millis(1500));
        let payload: serde_json::Value =
            serde_json::from_str(&err.tool_error_payload()).expect("valid json");
        assert_eq!(payload["error"], "tool_timeout");
        assert_eq!(
            payload["message"],
            "Tool 'search_query' timed out after 1500ms"
        );
    }

    #[test]
    fn categories_and_status_codes() {
        assert_eq!(RelayError::api_error(404, "x").category(), ErrorCategory::Client);
        assert_eq!(RelayError::api_error(503, "x").category(), ErrorCategory::Server);
        assert_eq!(RelayError::api_error(503, "x").status_code(), 503);
        assert_eq!(RelayError::InvalidInput("model".into()).status_code(), 400);
        assert_eq!(RelayError::StreamTruncated("eof".into()).status_code(), 502);
        assert_eq!(
            RelayError::ConfigurationError("x".into()).category(),
            ErrorCategory::Configuration
        );
    }
}
