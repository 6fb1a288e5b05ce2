//! reqwest-based client for OpenAI-compatible chat-completions endpoints.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use secrecy::ExposeSecret;
use serde_json::Value;

use super::{BackendReply, ChatBackend};
use crate::config::BackendConfig;
use crate::error::{RelayError, Result};
use crate::streaming::chunk_stream;
use crate::types::{ChatCompletionRequest, StreamOptions};

/// Chat backend speaking the OpenAI chat-completions protocol.
#[derive(Debug, Clone)]
pub struct OpenAiCompatBackend {
    config: BackendConfig,
    http_client: reqwest::Client,
    headers: HeaderMap,
}

impl OpenAiCompatBackend {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| RelayError::ConfigurationError(format!("HTTP client: {e}")))?;
        Self::with_http_client(config, http_client)
    }

    /// Reuse an existing client (shared connection pool).
    pub fn with_http_client(config: BackendConfig, http_client: reqwest::Client) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes())
                    .map_err(|e| RelayError::ConfigurationError(format!("header '{name}': {e}")))?,
                HeaderValue::from_str(value)?,
            );
        }
        Ok(Self {
            config,
            http_client,
            headers,
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.headers(self.headers.clone());
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key.expose_secret()),
            None => builder,
        }
    }
}

/// Build an `ApiError` from a failed response body, keeping the backend's own message.
fn api_error_from_body(code: u16, body: &str) -> RelayError {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => {
            let message = value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .or_else(|| value.get("message").and_then(Value::as_str))
                .unwrap_or(body)
                .to_string();
            RelayError::ApiError {
                code,
                message,
                details: Some(value),
            }
        }
        Err(_) => RelayError::ApiError {
            code,
            message: if body.is_empty() {
                format!("backend returned status {code}")
            } else {
                body.to_string()
            },
            details: None,
        },
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatBackend {
    async fn send(&self, mut request: ChatCompletionRequest) -> Result<BackendReply> {
        let streaming = request.stream;
        if streaming && self.config.include_stream_usage && request.stream_options.is_none() {
            request.stream_options = Some(StreamOptions {
                include_usage: true,
            });
        }

        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            stream = streaming,
            "sending chat completion request"
        );

        let mut builder = self
            .authorized(self.http_client.post(&self.config.chat_url))
            .json(&request);
        builder = if streaming {
            builder.header(ACCEPT, "text/event-stream")
        } else {
            builder.timeout(self.config.request_timeout())
        };

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "backend rejected request");
            return Err(api_error_from_body(status.as_u16(), &body));
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if streaming && is_event_stream {
            Ok(BackendReply::Stream(chunk_stream(response.bytes_stream())))
        } else {
            let body = response.text().await?;
            let parsed = serde_json::from_str(&body)
                .map_err(|e| RelayError::ParseError(format!("invalid completion body: {e}")))?;
            Ok(BackendReply::Complete(parsed))
        }
    }

    async fn list_models(&self) -> Result<Value> {
        let response = self
            .authorized(self.http_client.get(self.config.models_url()))
            .timeout(self.config.connect_timeout() * 3)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(api_error_from_body(status.as_u16(), &body));
        }
        Ok(serde_json::from_str(&body)?)
    }
}
