//! Tracing subscriber setup.
//!
//! The library only emits `tracing` events; the host decides where they go by passing the
//! `logging` section of [`RelayConfig`](crate::config::RelayConfig) to [`init_subscriber`].
//!
//! ```rust,no_run
//! use reasoning_relay::config::RelayConfig;
//! use reasoning_relay::telemetry::init_subscriber;
//!
//! let config: RelayConfig = serde_json::from_str(r#"{"logging": {"level": "debug", "format": "json"}}"#)?;
//! let _guard = init_subscriber(&config.logging.with_env_overrides()?)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};

use crate::error::{RelayError, Result};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    JsonCompact,
}

impl FromStr for OutputFormat {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "json-compact" => Ok(Self::JsonCompact),
            other => Err(RelayError::ConfigurationError(format!(
                "invalid log format: {other}. Valid options: text, json, json-compact"
            ))),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

/// Where and how log lines are written.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogConfig {
    /// `trace`, `debug`, `info`, `warn` or `error`.
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: OutputFormat,
    /// Write to stdout. With a log file set, lines go to both.
    #[serde(default = "default_true")]
    pub console: bool,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: OutputFormat::Text,
            console: true,
            file: None,
        }
    }
}

impl LogConfig {
    pub fn level(&self) -> Result<tracing::Level> {
        tracing::Level::from_str(&self.level).map_err(|_| {
            RelayError::ConfigurationError(format!(
                "invalid log level: {}. Valid options: trace, debug, info, warn, error",
                self.level
            ))
        })
    }

    /// Apply `RELAY_LOG_LEVEL`, `RELAY_LOG_FORMAT` and `RELAY_LOG_FILE` on top.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides<F>(mut self, var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = var("RELAY_LOG_LEVEL") {
            self.level = level;
        }
        if let Some(format) = var("RELAY_LOG_FORMAT") {
            self.format = format.parse()?;
        }
        if let Some(file) = var("RELAY_LOG_FILE") {
            self.file = Some(PathBuf::from(file));
        }
        self.level()?;
        Ok(self)
    }
}

fn make_writer(config: &LogConfig) -> Result<(BoxMakeWriter, Option<WorkerGuard>)> {
    let Some(path) = &config.file else {
        return Ok((BoxMakeWriter::new(std::io::stdout), None));
    };

    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file_name = path.file_name().ok_or_else(|| {
        RelayError::ConfigurationError(format!("log file path has no file name: {}", path.display()))
    })?;

    let (file, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name));
    let writer = if config.console {
        BoxMakeWriter::new(std::io::stdout.and(file))
    } else {
        BoxMakeWriter::new(file)
    };
    Ok((writer, Some(guard)))
}

/// Install the global subscriber.
///
/// Returns the file writer's guard when a log file is configured; keep it alive for as long
/// as lines should be flushed. An already-installed global subscriber is left in place.
pub fn init_subscriber(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let level = config.level()?.to_string().to_lowercase();
    let filter = format!("reasoning_relay={level}");
    let (writer, guard) = make_writer(config)?;

    let installed = match config.format {
        OutputFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_target(true)
            .with_thread_names(true)
            .json()
            .try_init(),
        OutputFormat::JsonCompact => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .json()
            .flatten_event(true)
            .try_init(),
        OutputFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .try_init(),
    };

    match installed {
        Ok(()) => Ok(guard),
        Err(e) if e.to_string().contains("already been set") => Ok(guard),
        Err(e) => Err(RelayError::ConfigurationError(format!(
            "failed to initialize tracing: {e}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn logging_section_deserializes_with_defaults() {
        let config: LogConfig = serde_json::from_str(r#"{"format": "json-compact"}"#).unwrap();
        assert_eq!(config.level().unwrap(), tracing::Level::INFO);
        assert_eq!(config.format, OutputFormat::JsonCompact);
        assert!(config.console);
        assert!(config.file.is_none());
    }

    #[test]
    fn environment_overrides_the_file_settings() {
        let env = HashMap::from([
            ("RELAY_LOG_LEVEL", "DEBUG"),
            ("RELAY_LOG_FORMAT", "json"),
            ("RELAY_LOG_FILE", "/var/log/relay.log"),
        ]);
        let config = LogConfig::default()
            .with_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.level().unwrap(), tracing::Level::DEBUG);
        assert_eq!(config.format, OutputFormat::Json);
        assert_eq!(config.file, Some(PathBuf::from("/var/log/relay.log")));

        let loud = LogConfig::default().with_overrides(|key| {
            (key == "RELAY_LOG_LEVEL").then(|| "loud".to_string())
        });
        assert!(matches!(loud, Err(RelayError::ConfigurationError(_))));
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn file_output_returns_a_guard() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.log");
        let config = LogConfig {
            level: "warn".into(),
            format: OutputFormat::Json,
            console: false,
            file: Some(path.clone()),
        };
        let guard = init_subscriber(&config).unwrap();
        assert!(guard.is_some());
        tracing::warn!("written to file");
        drop(guard);
        assert!(path.exists());
    }
}
