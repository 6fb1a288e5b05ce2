//! Transports carrying MCP sessions between the registry and a provider.
//!
//! Subprocess providers speak newline-delimited JSON-RPC framed by [`StdioTransport`]; the
//! HTTP-based providers run on the `rmcp` streamable-HTTP client ([`HttpTransport`]).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::config::{ProviderConfig, RegistryOptions, TransportConfig};
use crate::error::Result;
use crate::types::ToolDescriptor;

pub mod http;
pub mod stdio;

pub use http::HttpTransport;
pub use stdio::StdioTransport;

/// An MCP session with one provider.
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    /// Handshake and discover the provider's tools, each exchange bounded by `timeout`.
    async fn initialize(&self, client_name: &str, timeout: Duration) -> Result<Vec<ToolDescriptor>>;

    /// Run `tools/call` and render the result as text.
    ///
    /// Expiry yields `ToolTimeout`; a dead or unreachable peer yields `ProviderUnavailable`;
    /// a result flagged as an error yields `ToolError`.
    async fn call_tool(&self, tool: &str, arguments: Value, timeout: Duration) -> Result<String>;

    /// Whether the peer can still be reached without reconnecting.
    fn is_alive(&self) -> bool {
        true
    }

    /// Release the session. Safe to call more than once.
    async fn close(&self);
}

/// Open the transport described by `config`.
pub async fn connect(
    config: &ProviderConfig,
    options: &RegistryOptions,
    http_client: &reqwest::Client,
) -> Result<Arc<dyn ProviderTransport>> {
    let transport: Arc<dyn ProviderTransport> = match &config.transport {
        TransportConfig::Stdio {
            command,
            args,
            env,
            cwd,
        } => Arc::new(StdioTransport::spawn(
            &config.name,
            command,
            args,
            env,
            cwd.as_deref(),
            options.stop_grace(),
        )?),
        TransportConfig::Http { url, headers } => Arc::new(HttpTransport::streamable(
            &config.name,
            url,
            headers,
            http_client.clone(),
        )?),
        TransportConfig::EventStream { url, headers } => Arc::new(HttpTransport::event_stream(
            &config.name,
            url,
            headers,
            http_client.clone(),
        )?),
    };
    Ok(transport)
}
