//! Tool provider registry.
//!
//! Owns the configured providers, runs their lifecycle and exposes their tools as one
//! namespaced catalog. A tool `get` from provider `weather` is advertised as `weather_get`.
//! Providers fail independently: a provider that cannot start is marked `failed` and its
//! siblings keep serving.
//!
//! ```rust,no_run
//! use reasoning_relay::registry::{ProviderConfig, RegistryOptions, ToolProviderRegistry};
//!
//! # async fn demo() -> reasoning_relay::error::Result<()> {
//! let registry = ToolProviderRegistry::new(
//!     vec![ProviderConfig::stdio("files", "mcp-files", ["--root", "/srv"])],
//!     RegistryOptions::default(),
//! );
//! for (name, outcome) in registry.start_all().await {
//!     if let Err(e) = outcome {
//!         eprintln!("{name} failed: {e}");
//!     }
//! }
//! let listing = registry.invoke("files_list", r#"{"path": "."}"#).await?;
//! # let _ = listing;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::future::join_all;
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::{RelayError, Result};
use crate::types::ToolDefinition;

pub mod config;
pub mod protocol;
pub mod provider;
pub mod transport;

pub use config::{ProviderConfig, RegistryOptions, TransportConfig, TransportKind};
pub use provider::{ProviderState, ProviderStatus, ToolProvider};
pub use transport::{HttpTransport, ProviderTransport, StdioTransport};

/// Status plus full tool definitions for one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderDetails {
    #[serde(flatten)]
    pub status: ProviderStatus,
    pub definitions: Vec<ToolDefinition>,
}

pub struct ToolProviderRegistry {
    providers: RwLock<Vec<Arc<ToolProvider>>>,
    options: Arc<RegistryOptions>,
    http_client: reqwest::Client,
}

impl std::fmt::Debug for ToolProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

impl Default for ToolProviderRegistry {
    fn default() -> Self {
        Self::new(Vec::new(), RegistryOptions::default())
    }
}

impl ToolProviderRegistry {
    /// Build the table. Every provider starts out `stopped`.
    pub fn new(configs: Vec<ProviderConfig>, options: RegistryOptions) -> Self {
        let options = Arc::new(options);
        let http_client = reqwest::Client::new();
        let providers = configs
            .into_iter()
            .map(|config| Arc::new(ToolProvider::new(config, options.clone(), http_client.clone())))
            .collect();
        Self {
            providers: RwLock::new(providers),
            options,
            http_client,
        }
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<ToolProvider>>> {
        self.providers.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<ToolProvider>>> {
        self.providers.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn all(&self) -> Vec<Arc<ToolProvider>> {
        self.read().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.read().iter().map(|p| p.name().to_string()).collect()
    }

    pub fn provider(&self, name: &str) -> Option<Arc<ToolProvider>> {
        self.read().iter().find(|p| p.name() == name).cloned()
    }

    fn require(&self, name: &str) -> Result<Arc<ToolProvider>> {
        self.provider(name)
            .ok_or_else(|| RelayError::NotFound(format!("provider '{name}'")))
    }

    pub async fn start(&self, name: &str) -> Result<()> {
        self.require(name)?.start().await
    }

    /// Start every enabled provider concurrently.
    pub async fn start_all(&self) -> Vec<(String, Result<()>)> {
        let enabled: Vec<_> = self.all().into_iter().filter(|p| p.is_enabled()).collect();
        let outcomes = join_all(enabled.iter().map(|p| p.start())).await;
        let results: Vec<_> = enabled
            .iter()
            .map(|p| p.name().to_string())
            .zip(outcomes)
            .collect();

        let running = results.iter().filter(|(_, r)| r.is_ok()).count();
        tracing::info!(running, total = results.len(), "providers started");
        results
    }

    pub async fn stop(&self, name: &str) -> Result<()> {
        self.require(name)?.stop().await;
        Ok(())
    }

    pub async fn stop_all(&self) {
        join_all(self.all().iter().map(|p| p.stop())).await;
    }

    /// Tools of every running provider, namespaced, in registration order.
    pub fn catalog(&self) -> Vec<ToolDefinition> {
        self.read().iter().flat_map(|p| p.definitions()).collect()
    }

    fn resolve(&self, qualified: &str) -> Option<(Arc<ToolProvider>, String)> {
        self.read().iter().find_map(|provider| {
            let tool = qualified
                .strip_prefix(provider.name())
                .and_then(|rest| rest.strip_prefix('_'))?;
            provider
                .has_tool(tool)
                .then(|| (provider.clone(), tool.to_string()))
        })
    }

    /// Whether `qualified` names a tool of a running provider.
    pub fn owns(&self, qualified: &str) -> bool {
        self.resolve(qualified).is_some()
    }

    /// Call a namespaced tool with raw JSON arguments.
    pub async fn invoke(&self, qualified: &str, arguments_json: &str) -> Result<String> {
        let (provider, tool) = self.resolve(qualified).ok_or_else(|| {
            RelayError::ProviderUnavailable(format!("no running provider offers '{qualified}'"))
        })?;
        let arguments = parse_arguments(qualified, arguments_json)?;

        match provider.call(&tool, arguments).await {
            Err(RelayError::ToolTimeout { timeout_ms, .. }) => Err(RelayError::ToolTimeout {
                tool: qualified.to_string(),
                timeout_ms,
            }),
            other => other,
        }
    }

    pub fn status(&self) -> Vec<ProviderStatus> {
        self.read().iter().map(|p| p.snapshot()).collect()
    }

    pub fn details(&self, name: &str) -> Result<ProviderDetails> {
        let provider = self.require(name)?;
        Ok(ProviderDetails {
            status: provider.snapshot(),
            definitions: provider.definitions(),
        })
    }

    /// Register a provider at runtime, starting it when enabled.
    ///
    /// A start failure is recorded on the returned status rather than returned as an error.
    pub async fn add_provider(&self, config: ProviderConfig) -> Result<ProviderStatus> {
        config.validate()?;
        let provider = {
            let mut providers = self.write();
            if providers.iter().any(|p| p.name() == config.name) {
                return Err(RelayError::InvalidInput(format!(
                    "provider '{}' already exists",
                    config.name
                )));
            }
            let provider = Arc::new(ToolProvider::new(
                config,
                self.options.clone(),
                self.http_client.clone(),
            ));
            providers.push(provider.clone());
            provider
        };
        tracing::info!(provider = %provider.name(), "provider added");

        if provider.is_enabled() {
            let _ = provider.start().await;
        }
        Ok(provider.snapshot())
    }

    pub async fn remove_provider(&self, name: &str) -> Result<()> {
        let removed = {
            let mut providers = self.write();
            let index = providers
                .iter()
                .position(|p| p.name() == name)
                .ok_or_else(|| RelayError::NotFound(format!("provider '{name}'")))?;
            providers.remove(index)
        };
        removed.stop().await;
        tracing::info!(provider = %name, "provider removed");
        Ok(())
    }

    /// Enabling starts the provider; disabling stops it.
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let provider = self.require(name)?;
        provider.set_enabled(enabled);
        if enabled {
            provider.start().await
        } else {
            provider.stop().await;
            Ok(())
        }
    }

    /// Stop everything, replace the table with `configs` and start the enabled providers.
    pub async fn reload(&self, configs: Vec<ProviderConfig>) -> Result<Vec<(String, Result<()>)>> {
        for config in &configs {
            config.validate()?;
        }
        self.stop_all().await;
        {
            let mut providers = self.write();
            *providers = configs
                .into_iter()
                .map(|config| {
                    Arc::new(ToolProvider::new(
                        config,
                        self.options.clone(),
                        self.http_client.clone(),
                    ))
                })
                .collect();
        }
        tracing::info!(providers = self.read().len(), "registry reloaded");
        Ok(self.start_all().await)
    }
}

fn parse_arguments(tool: &str, raw: &str) -> Result<Value> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    let value: Value = serde_json::from_str(raw).map_err(|e| {
        RelayError::MalformedToolResponse(format!("arguments for '{tool}' are not valid JSON: {e}"))
    })?;
    if !value.is_object() {
        return Err(RelayError::MalformedToolResponse(format!(
            "arguments for '{tool}' must be a JSON object"
        )));
    }
    Ok(value)
}
