//! One provider's lifecycle: `stopped → starting → running | failed`.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::config::{ProviderConfig, RegistryOptions, TransportKind};
use super::transport::{self, ProviderTransport};
use crate::error::{RelayError, Result};
use crate::types::{ToolDefinition, ToolDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderState {
    #[default]
    Stopped,
    Starting,
    Running,
    Failed,
}

/// Point-in-time view of a provider, as reported by `status()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub transport: TransportKind,
    pub state: ProviderState,
    pub enabled: bool,
    pub description: String,
    pub tools_count: usize,
    pub tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct ProviderRuntime {
    state: ProviderState,
    tools: Vec<ToolDescriptor>,
    transport: Option<Arc<dyn ProviderTransport>>,
    last_error: Option<String>,
    started_at: Option<DateTime<Utc>>,
}

pub struct ToolProvider {
    config: ProviderConfig,
    options: Arc<RegistryOptions>,
    http_client: reqwest::Client,
    enabled: AtomicBool,
    runtime: RwLock<ProviderRuntime>,
    // Serializes start/stop; calls only take the runtime lock briefly.
    lifecycle: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for ToolProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolProvider")
            .field("name", &self.config.name)
            .field("state", &self.state())
            .finish()
    }
}

impl ToolProvider {
    pub fn new(config: ProviderConfig, options: Arc<RegistryOptions>, http_client: reqwest::Client) -> Self {
        let enabled = AtomicBool::new(config.enabled);
        Self {
            config,
            options,
            http_client,
            enabled,
            runtime: RwLock::new(ProviderRuntime::default()),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, ProviderRuntime> {
        self.runtime.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ProviderRuntime> {
        self.runtime.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> ProviderState {
        self.read().state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Connect, handshake and discover tools. Starting a running provider is a no-op.
    pub async fn start(&self) -> Result<()> {
        let options = self.options.clone();
        let client = self.http_client.clone();
        let config = self.config.clone();
        self.start_with(async move { transport::connect(&config, &options, &client).await })
            .await
    }

    /// Start over an already-open transport.
    pub(crate) async fn start_with_transport(&self, transport: Arc<dyn ProviderTransport>) -> Result<()> {
        self.start_with(async move { Ok(transport) }).await
    }

    async fn start_with<F>(&self, connect: F) -> Result<()>
    where
        F: Future<Output = Result<Arc<dyn ProviderTransport>>>,
    {
        let _lifecycle = self.lifecycle.lock().await;
        if self.state() == ProviderState::Running {
            return Ok(());
        }
        self.write().state = ProviderState::Starting;

        let timeout = self.options.startup_timeout_for(&self.config);
        tracing::info!(
            provider = %self.config.name,
            transport = %self.config.transport.kind(),
            "starting provider"
        );

        let client_name = self.options.client_name.clone();
        let attempt = async {
            let transport = connect.await?;
            match transport.initialize(&client_name, timeout).await {
                Ok(tools) => Ok((transport, tools)),
                Err(e) => {
                    transport.close().await;
                    Err(e)
                }
            }
        };

        let outcome = match tokio::time::timeout(timeout, attempt).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RelayError::ProviderUnavailable(format!(
                "provider '{}' did not start within {}ms",
                self.config.name,
                timeout.as_millis()
            ))),
        };

        match outcome {
            Ok((transport, tools)) => {
                tracing::info!(provider = %self.config.name, tools = tools.len(), "provider running");
                let mut runtime = self.write();
                runtime.state = ProviderState::Running;
                runtime.tools = tools;
                runtime.transport = Some(transport);
                runtime.last_error = None;
                runtime.started_at = Some(Utc::now());
                Ok(())
            }
            Err(e) => {
                tracing::warn!(provider = %self.config.name, error = %e, "provider failed to start");
                self.mark_failed(&e.to_string());
                Err(e)
            }
        }
    }

    fn mark_failed(&self, reason: &str) {
        let mut runtime = self.write();
        runtime.state = ProviderState::Failed;
        runtime.tools.clear();
        runtime.transport = None;
        runtime.last_error = Some(reason.to_string());
        runtime.started_at = None;
    }

    /// Close the transport and forget discovered tools. Idempotent.
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let transport = {
            let mut runtime = self.write();
            runtime.state = ProviderState::Stopped;
            runtime.tools.clear();
            runtime.started_at = None;
            runtime.transport.take()
        };
        if let Some(transport) = transport {
            transport.close().await;
            tracing::info!(provider = %self.config.name, "provider stopped");
        }
    }

    /// Whether a running provider advertises `tool` (unqualified name).
    pub fn has_tool(&self, tool: &str) -> bool {
        let runtime = self.read();
        runtime.state == ProviderState::Running && runtime.tools.iter().any(|t| t.name == tool)
    }

    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.read().tools.clone()
    }

    /// Discovered tools as namespaced function definitions.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.read()
            .tools
            .iter()
            .map(|descriptor| ToolDefinition::from_descriptor(&self.config.name, descriptor))
            .collect()
    }

    /// Invoke `tool` (unqualified name) with parsed arguments.
    pub async fn call(&self, tool: &str, arguments: Value) -> Result<String> {
        let transport = {
            let runtime = self.read();
            match (&runtime.state, &runtime.transport) {
                (ProviderState::Running, Some(transport)) => transport.clone(),
                _ => {
                    return Err(RelayError::ProviderUnavailable(format!(
                        "provider '{}' is not running",
                        self.config.name
                    )));
                }
            }
        };

        let timeout = self.options.call_timeout_for(&self.config);
        tracing::debug!(provider = %self.config.name, %tool, "invoking tool");
        let result = transport.call_tool(tool, arguments, timeout).await;

        if !transport.is_alive() {
            let mut runtime = self.write();
            let current = runtime
                .transport
                .as_ref()
                .is_some_and(|t| Arc::ptr_eq(t, &transport));
            if current {
                tracing::warn!(provider = %self.config.name, "provider connection lost");
                runtime.state = ProviderState::Failed;
                runtime.tools.clear();
                runtime.transport = None;
                runtime.last_error = Some("connection lost".to_string());
            }
        }
        result
    }

    pub fn snapshot(&self) -> ProviderStatus {
        let runtime = self.read();
        ProviderStatus {
            name: self.config.name.clone(),
            transport: self.config.transport.kind(),
            state: runtime.state,
            enabled: self.is_enabled(),
            description: self.config.description.clone(),
            tools_count: runtime.tools.len(),
            tools: runtime.tools.iter().map(|t| t.name.clone()).collect(),
            last_error: runtime.last_error.clone(),
            started_at: runtime.started_at,
        }
    }
}
