//! Relay configuration.
//!
//! Every struct here deserializes with serde and carries defaults, so a host application can
//! load it from whatever format it prefers. Builder-style `with_*` methods cover programmatic
//! setup.
//!
//! ```rust
//! use reasoning_relay::config::{BackendConfig, RelayConfig};
//!
//! let config = RelayConfig::new(
//!     BackendConfig::new("https://api.deepseek.com/v1/chat/completions").with_api_key("sk-..."),
//! )
//! .with_max_iterations(6)
//! .with_system_prompt("Summarize tool output in your reasoning.");
//! assert!(config.validate().is_ok());
//! ```

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use crate::error::{RelayError, Result};
use crate::registry::{ProviderConfig, RegistryOptions};
use crate::telemetry::LogConfig;

/// Default chat-completions endpoint.
pub const DEFAULT_CHAT_URL: &str = "https://api.deepseek.com/v1/chat/completions";
/// Default bound on backend round-trips per turn.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

fn default_chat_url() -> String {
    DEFAULT_CHAT_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|s| !s.is_empty())
        .map(SecretString::from))
}

/// Connection settings for the chat backend.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Full chat-completions URL.
    #[serde(default = "default_chat_url")]
    pub chat_url: String,
    /// Models listing URL; derived from `chat_url` when unset.
    #[serde(default)]
    pub models_url: Option<String>,
    /// Bearer token.
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub api_key: Option<SecretString>,
    /// Whole-request timeout for non-streaming calls.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Extra headers sent with every backend request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Ask the backend for a usage chunk at the end of streams.
    #[serde(default = "default_true")]
    pub include_stream_usage: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CHAT_URL)
    }
}

impl BackendConfig {
    pub fn new(chat_url: impl Into<String>) -> Self {
        Self {
            chat_url: chat_url.into(),
            models_url: None,
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            headers: HashMap::new(),
            include_stream_usage: true,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(api_key.into()));
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// `models_url`, or the sibling `/models` of the chat URL.
    pub fn models_url(&self) -> String {
        if let Some(url) = &self.models_url {
            return url.clone();
        }
        match self.chat_url.strip_suffix("/chat/completions") {
            Some(base) => format!("{base}/models"),
            None => format!("{}/models", self.chat_url.trim_end_matches('/')),
        }
    }
}

/// Tool-loop behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum backend round-trips per turn.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Execute registry tools automatically; requests may override this per call.
    #[serde(default = "default_true")]
    pub auto_execute: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            auto_execute: true,
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub registry: RegistryOptions,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Prompt placed in front of every conversation when set.
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub logging: LogConfig,
}

impl RelayConfig {
    pub fn new(backend: BackendConfig) -> Self {
        Self {
            backend,
            ..Default::default()
        }
    }

    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.orchestrator.max_iterations = max_iterations;
        self
    }

    pub fn with_auto_execute(mut self, auto_execute: bool) -> Self {
        self.orchestrator.auto_execute = auto_execute;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let url = self.backend.chat_url.as_str();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(RelayError::ConfigurationError(format!(
                "backend chat_url must be an http(s) URL, got '{url}'"
            )));
        }
        self.logging.level()?;
        if self.orchestrator.max_iterations == 0 {
            return Err(RelayError::ConfigurationError(
                "max_iterations must be at least 1".into(),
            ));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            provider.validate()?;
            if !seen.insert(provider.name.as_str()) {
                return Err(RelayError::ConfigurationError(format!(
                    "duplicate provider name '{}'",
                    provider.name
                )));
            }
        }
        Ok(())
    }
}
