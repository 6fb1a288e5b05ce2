//! Provider descriptors and registry-wide options.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

fn default_true() -> bool {
    true
}

/// How to reach a provider.
///
/// The `type` tag uses the names common in MCP client configuration files: `stdio`,
/// `streamableHttp` and `sse`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransportConfig {
    /// A long-lived child process speaking newline-delimited JSON-RPC on stdin/stdout.
    #[serde(rename = "stdio")]
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default)]
        cwd: Option<PathBuf>,
    },
    /// One HTTP POST per JSON-RPC exchange; replies may be JSON or an event stream.
    #[serde(rename = "streamableHttp", alias = "http")]
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    /// HTTP POST answered with an event stream that carries the reply.
    #[serde(rename = "sse", alias = "eventstream")]
    EventStream {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl TransportConfig {
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio { .. } => TransportKind::Stdio,
            Self::Http { .. } => TransportKind::Http,
            Self::EventStream { .. } => TransportKind::EventStream,
        }
    }
}

/// Transport family, without its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    #[serde(rename = "stdio")]
    Stdio,
    #[serde(rename = "streamableHttp")]
    Http,
    #[serde(rename = "sse")]
    EventStream,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Stdio => "stdio",
            Self::Http => "streamableHttp",
            Self::EventStream => "sse",
        })
    }
}

/// One tool provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Namespace prefix for the provider's tools.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Disabled providers are skipped by `start_all`.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub transport: TransportConfig,
    /// Overrides the registry-wide startup timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_timeout_ms: Option<u64>,
    /// Overrides the registry-wide per-call timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_timeout_ms: Option<u64>,
}

impl ProviderConfig {
    fn with_transport(name: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            enabled: true,
            transport,
            startup_timeout_ms: None,
            call_timeout_ms: None,
        }
    }

    pub fn stdio<I, S>(name: impl Into<String>, command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_transport(
            name,
            TransportConfig::Stdio {
                command: command.into(),
                args: args.into_iter().map(Into::into).collect(),
                env: HashMap::new(),
                cwd: None,
            },
        )
    }

    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_transport(
            name,
            TransportConfig::Http {
                url: url.into(),
                headers: HashMap::new(),
            },
        )
    }

    pub fn event_stream(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_transport(
            name,
            TransportConfig::EventStream {
                url: url.into(),
                headers: HashMap::new(),
            },
        )
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RelayError::ConfigurationError(
                "provider name must not be empty".into(),
            ));
        }
        match &self.transport {
            TransportConfig::Stdio { command, .. } if command.trim().is_empty() => {
                Err(RelayError::ConfigurationError(format!(
                    "provider '{}' has an empty command",
                    self.name
                )))
            }
            TransportConfig::Http { url, .. } | TransportConfig::EventStream { url, .. }
                if !(url.starts_with("http://") || url.starts_with("https://")) =>
            {
                Err(RelayError::ConfigurationError(format!(
                    "provider '{}' needs an http(s) url, got '{url}'",
                    self.name
                )))
            }
            _ => Ok(()),
        }
    }
}

fn default_startup_timeout_ms() -> u64 {
    30_000
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

fn default_stop_grace_ms() -> u64 {
    5_000
}

fn default_client_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

/// Registry-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegistryOptions {
    /// Bound on spawn plus handshake plus discovery.
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
    /// Bound on a single tool invocation.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// How long a child gets to exit after its stdin closes before it is killed.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    /// `clientInfo.name` sent during the handshake.
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            startup_timeout_ms: default_startup_timeout_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            client_name: default_client_name(),
        }
    }
}

impl RegistryOptions {
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn startup_timeout_for(&self, provider: &ProviderConfig) -> Duration {
        provider
            .startup_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(self.startup_timeout_ms))
    }

    pub fn call_timeout_for(&self, provider: &ProviderConfig) -> Duration {
        provider
            .call_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(self.call_timeout_ms))
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}
