//! HTTP-based providers on the `rmcp` streamable-HTTP client.
//!
//! Two flavours share one implementation and differ only in the `Accept` header of their
//! POSTs: streamable-HTTP servers may answer with JSON or an event stream, while `sse`
//! servers always reply on an event stream. The `Mcp-Session-Id` handed out during
//! `initialize` is captured so closing the transport can end the session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use rmcp::model::{
    CallToolRequestParam, CallToolResult, ClientCapabilities, ClientInfo, ClientJsonRpcMessage,
    Implementation, LoggingLevel, LoggingMessageNotificationParam, PaginatedRequestParam,
    ProtocolVersion, RawContent, ServerJsonRpcMessage,
};
use rmcp::service::{NotificationContext, RunningService, ServiceError};
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::transport::common::http_header::{EVENT_STREAM_MIME_TYPE, HEADER_SESSION_ID, JSON_MIME_TYPE};
use rmcp::transport::streamable_http_client::{
    SseError, StreamableHttpClient, StreamableHttpClientTransportConfig, StreamableHttpError,
    StreamableHttpPostResponse,
};
use rmcp::{ClientHandler, RoleClient};
use serde_json::Value;
use sse_stream::{Sse, SseStream};

use super::ProviderTransport;
use crate::error::{RelayError, Result};
use crate::registry::protocol::{METHOD_INITIALIZE, METHOD_TOOLS_CALL};
use crate::types::ToolDescriptor;

/// Forwards server log notifications to tracing.
#[derive(Clone)]
struct RelayClientHandler {
    provider: String,
    info: ClientInfo,
}

impl ClientHandler for RelayClientHandler {
    fn get_info(&self) -> ClientInfo {
        self.info.clone()
    }

    async fn on_logging_message(
        &self,
        params: LoggingMessageNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) {
        let LoggingMessageNotificationParam {
            level,
            logger,
            data,
        } = params;
        let logger = logger.as_deref().unwrap_or("-");
        match level {
            LoggingLevel::Emergency | LoggingLevel::Alert | LoggingLevel::Critical | LoggingLevel::Error => {
                tracing::error!(provider = %self.provider, logger, %data, "provider log");
            }
            LoggingLevel::Warning => {
                tracing::warn!(provider = %self.provider, logger, %data, "provider log");
            }
            LoggingLevel::Debug => {
                tracing::debug!(provider = %self.provider, logger, %data, "provider log");
            }
            _ => {
                tracing::info!(provider = %self.provider, logger, %data, "provider log");
            }
        }
    }
}

/// reqwest-backed client handed to the rmcp transport.
#[derive(Clone)]
struct RelayHttpClient {
    client: reqwest::Client,
    headers: HeaderMap,
    accept: HeaderValue,
    session: Arc<RwLock<Option<String>>>,
}

impl RelayHttpClient {
    fn remember_session(&self, session: &str) {
        *self
            .session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(session.to_string());
    }

    fn take_session(&self) -> Option<String> {
        self.session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    fn session_id(&self) -> Option<String> {
        self.session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn send_delete(&self, uri: &str, session: &str) -> std::result::Result<(), reqwest::Error> {
        let response = self
            .client
            .delete(uri)
            .headers(self.headers.clone())
            .header(HEADER_SESSION_ID, session)
            .timeout(Duration::from_secs(5))
            .send()
            .await?;
        // Servers without explicit session teardown answer 405.
        if response.status() != StatusCode::METHOD_NOT_ALLOWED {
            response.error_for_status()?;
        }
        Ok(())
    }
}

impl StreamableHttpClient for RelayHttpClient {
    type Error = reqwest::Error;

    async fn get_stream(
        &self,
        uri: Arc<str>,
        session_id: Arc<str>,
        last_event_id: Option<String>,
        auth_token: Option<String>,
    ) -> std::result::Result<BoxStream<'static, std::result::Result<Sse, SseError>>, StreamableHttpError<Self::Error>>
    {
        let mut request = self
            .client
            .get(uri.as_ref())
            .headers(self.headers.clone())
            .header(ACCEPT, EVENT_STREAM_MIME_TYPE)
            .header(HEADER_SESSION_ID, session_id.as_ref());
        if let Some(last_event_id) = last_event_id {
            request = request.header("last-event-id", last_event_id);
        }
        if let Some(token) = auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if matches!(
            response.status(),
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_FOUND
        ) {
            return Err(StreamableHttpError::ServerDoesNotSupportSse);
        }
        let response = response.error_for_status()?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok())
            .map(str::to_string);
        if !content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with(EVENT_STREAM_MIME_TYPE))
        {
            return Err(StreamableHttpError::UnexpectedContentType(content_type));
        }
        Ok(SseStream::from_byte_stream(response.bytes_stream()).boxed())
    }

    async fn delete_session(
        &self,
        uri: Arc<str>,
        session: Arc<str>,
        _auth_token: Option<String>,
    ) -> std::result::Result<(), StreamableHttpError<Self::Error>> {
        self.take_session();
        self.send_delete(uri.as_ref(), session.as_ref()).await?;
        Ok(())
    }

    async fn post_message(
        &self,
        uri: Arc<str>,
        message: ClientJsonRpcMessage,
        session_id: Option<Arc<str>>,
        auth_token: Option<String>,
    ) -> std::result::Result<StreamableHttpPostResponse, StreamableHttpError<Self::Error>> {
        let mut request = self
            .client
            .post(uri.as_ref())
            .headers(self.headers.clone())
            .header(ACCEPT, self.accept.clone());
        if let Some(token) = auth_token {
            request = request.bearer_auth(token);
        }
        if let Some(session) = session_id {
            request = request.header(HEADER_SESSION_ID, session.as_ref());
        }

        let response = request.json(&message).send().await?.error_for_status()?;
        if matches!(response.status(), StatusCode::ACCEPTED | StatusCode::NO_CONTENT) {
            return Ok(StreamableHttpPostResponse::Accepted);
        }

        let session = response
            .headers()
            .get(HEADER_SESSION_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if let Some(session) = &session {
            self.remember_session(session);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok())
            .map(str::to_string);
        match content_type.as_deref() {
            Some(ct) if ct.starts_with(EVENT_STREAM_MIME_TYPE) => Ok(StreamableHttpPostResponse::Sse(
                SseStream::from_byte_stream(response.bytes_stream()).boxed(),
                session,
            )),
            Some(ct) if ct.starts_with(JSON_MIME_TYPE) => {
                let message: ServerJsonRpcMessage = response.json().await?;
                Ok(StreamableHttpPostResponse::Json(message, session))
            }
            _ => {
                let body = response.bytes().await?;
                if body.iter().all(u8::is_ascii_whitespace) {
                    return Ok(StreamableHttpPostResponse::Accepted);
                }
                match serde_json::from_slice::<ServerJsonRpcMessage>(&body) {
                    Ok(message) => Ok(StreamableHttpPostResponse::Json(message, session)),
                    Err(_) => Err(StreamableHttpError::UnexpectedContentType(content_type)),
                }
            }
        }
    }
}

enum ClientState {
    Connecting {
        transport: Option<StreamableHttpClientTransport<RelayHttpClient>>,
    },
    Ready {
        service: RunningService<RoleClient, RelayClientHandler>,
    },
    Closed,
}

/// A provider reached over HTTP.
pub struct HttpTransport {
    name: String,
    url: String,
    client: RelayHttpClient,
    state: tokio::sync::Mutex<ClientState>,
    alive: AtomicBool,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl HttpTransport {
    /// Streamable-HTTP provider: replies may be JSON or an event stream.
    pub fn streamable(
        name: &str,
        url: &str,
        headers: &HashMap<String, String>,
        client: reqwest::Client,
    ) -> Result<Self> {
        let accept = HeaderValue::from_str(&[EVENT_STREAM_MIME_TYPE, JSON_MIME_TYPE].join(", "))?;
        Self::new(name, url, headers, client, accept)
    }

    /// Provider that answers every POST on an event stream.
    pub fn event_stream(
        name: &str,
        url: &str,
        headers: &HashMap<String, String>,
        client: reqwest::Client,
    ) -> Result<Self> {
        Self::new(
            name,
            url,
            headers,
            client,
            HeaderValue::from_static(EVENT_STREAM_MIME_TYPE),
        )
    }

    fn new(
        name: &str,
        url: &str,
        headers: &HashMap<String, String>,
        client: reqwest::Client,
        accept: HeaderValue,
    ) -> Result<Self> {
        let mut header_map = HeaderMap::new();
        for (key, value) in headers {
            header_map.insert(
                HeaderName::from_bytes(key.as_bytes())?,
                HeaderValue::from_str(value)?,
            );
        }

        let client = RelayHttpClient {
            client,
            headers: header_map,
            accept,
            session: Arc::new(RwLock::new(None)),
        };
        let transport = StreamableHttpClientTransport::with_client(
            client.clone(),
            StreamableHttpClientTransportConfig::with_uri(url.to_string()),
        );

        Ok(Self {
            name: name.to_string(),
            url: url.to_string(),
            client,
            state: tokio::sync::Mutex::new(ClientState::Connecting {
                transport: Some(transport),
            }),
            alive: AtomicBool::new(true),
        })
    }

    /// Session id assigned by the server, once initialized.
    pub fn session_id(&self) -> Option<String> {
        self.client.session_id()
    }

    fn client_info(client_name: &str) -> ClientInfo {
        ClientInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: client_name.to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
        }
    }

    fn unavailable(&self, what: &str, e: impl std::fmt::Display) -> RelayError {
        RelayError::ProviderUnavailable(format!("provider '{}' {what}: {e}", self.name))
    }

    fn service_error(&self, method: &str, e: ServiceError) -> RelayError {
        match e {
            ServiceError::McpError(error) => {
                RelayError::ToolError(format!("{method} failed: {}", error.message))
            }
            ServiceError::TransportClosed => {
                self.alive.store(false, Ordering::SeqCst);
                self.unavailable("closed the connection", method)
            }
            other => self.unavailable(&format!("{method} failed"), other),
        }
    }

    async fn list_tools(
        &self,
        service: &RunningService<RoleClient, RelayClientHandler>,
    ) -> Result<Vec<ToolDescriptor>> {
        let mut tools = Vec::new();
        let mut cursor = None;
        loop {
            let page = service
                .peer()
                .list_tools(Some(PaginatedRequestParam { cursor }))
                .await
                .map_err(|e| self.service_error("tools/list", e))?;
            tools.extend(page.tools.into_iter().map(|tool| ToolDescriptor {
                name: tool.name.to_string(),
                description: tool.description.map(|d| d.to_string()),
                input_schema: Value::Object((*tool.input_schema).clone()),
            }));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(tools),
            }
        }
    }
}

/// Text items joined with newlines; otherwise the structured or raw content as JSON.
fn render_call_result(result: CallToolResult) -> Result<String> {
    let texts: Vec<&str> = result
        .content
        .iter()
        .filter_map(|content| match &content.raw {
            RawContent::Text(text) => Some(text.text.as_str()),
            _ => None,
        })
        .collect();

    let rendered = if !texts.is_empty() {
        texts.join("\n")
    } else if let Some(structured) = &result.structured_content {
        structured.to_string()
    } else {
        serde_json::to_string(&result.content)?
    };

    if result.is_error.unwrap_or(false) {
        return Err(RelayError::ToolError(rendered));
    }
    Ok(rendered)
}

#[async_trait]
impl ProviderTransport for HttpTransport {
    async fn initialize(&self, client_name: &str, timeout: Duration) -> Result<Vec<ToolDescriptor>> {
        let mut state = self.state.lock().await;
        let transport = match &mut *state {
            ClientState::Connecting { transport } => transport.take().ok_or_else(|| {
                RelayError::InvalidState(format!("provider '{}' is already initializing", self.name))
            })?,
            ClientState::Ready { .. } => {
                return Err(RelayError::InvalidState(format!(
                    "provider '{}' is already initialized",
                    self.name
                )));
            }
            ClientState::Closed => {
                return Err(RelayError::ProviderUnavailable(format!(
                    "provider '{}' is closed",
                    self.name
                )));
            }
        };

        let handler = RelayClientHandler {
            provider: self.name.clone(),
            info: Self::client_info(client_name),
        };
        let service = tokio::time::timeout(timeout, rmcp::serve_client(handler, transport))
            .await
            .map_err(|_| RelayError::tool_timeout(METHOD_INITIALIZE, timeout))?
            .map_err(|e| self.unavailable("handshake failed", e))?;

        if let Some(info) = service.peer().peer_info() {
            let server = info.server_info.name.as_str();
            let protocol = info.protocol_version.to_string();
            tracing::debug!(provider = %self.name, server, %protocol, "provider initialized");
        }

        let tools = tokio::time::timeout(timeout, self.list_tools(&service))
            .await
            .map_err(|_| RelayError::tool_timeout("tools/list", timeout))?;
        match tools {
            Ok(tools) => {
                *state = ClientState::Ready { service };
                Ok(tools)
            }
            Err(e) => {
                *state = ClientState::Closed;
                let _ = service.cancel().await;
                Err(e)
            }
        }
    }

    async fn call_tool(&self, tool: &str, arguments: Value, timeout: Duration) -> Result<String> {
        let peer = match &*self.state.lock().await {
            ClientState::Ready { service } => service.peer().clone(),
            _ => {
                return Err(RelayError::ProviderUnavailable(format!(
                    "provider '{}' is not running",
                    self.name
                )));
            }
        };

        let arguments = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                return Err(RelayError::InvalidInput(format!(
                    "tool arguments must be a JSON object, got {other}"
                )));
            }
        };

        let call = peer.call_tool(CallToolRequestParam {
            name: tool.to_string().into(),
            arguments,
        });
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result.map_err(|e| self.service_error(METHOD_TOOLS_CALL, e))?,
            Err(_) => {
                tracing::warn!(provider = %self.name, %tool, "tool call timed out");
                return Err(RelayError::tool_timeout(METHOD_TOOLS_CALL, timeout));
            }
        };
        render_call_result(result)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let previous = std::mem::replace(&mut *self.state.lock().await, ClientState::Closed);
        if let ClientState::Ready { service } = previous
            && let Err(e) = service.cancel().await
        {
            tracing::debug!(provider = %self.name, error = %e, "session task ended abnormally");
        }

        if let Some(session) = self.client.take_session()
            && let Err(e) = self.client.send_delete(&self.url, &session).await
        {
            tracing::debug!(provider = %self.name, error = %e, "session teardown failed");
        }
    }
}
