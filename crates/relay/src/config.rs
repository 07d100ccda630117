//! Configuration management for the relay binary.
//!
//! This module handles loading, validation, and conversion of the relay
//! configuration from TOML files and command-line overrides.

use crate::cli::CliArgs;
use anyhow::{anyhow, Context, Result};
use relay_server::config::{DEFAULT_OUTBOUND_QUEUE_CAPACITY, DEFAULT_PORT};
use relay_server::{IdentityPolicy, RelayConfig, RelayError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

fn default_bind_address() -> String {
    format!("0.0.0.0:{DEFAULT_PORT}")
}

fn default_outbound_queue_capacity() -> usize {
    DEFAULT_OUTBOUND_QUEUE_CAPACITY
}

fn default_stats_interval_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Relay settings
    #[serde(default)]
    pub server: ServerSettings,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Relay-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to bind to (e.g., "0.0.0.0:8765")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Maximum number of concurrent connections, 0 for unlimited
    #[serde(default)]
    pub max_connections: usize,
    /// Per-connection outbound queue bound
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
    /// Treatment of client-supplied ids
    #[serde(default)]
    pub identity_policy: IdentityPolicy,
    /// Seconds between statistics log lines, 0 to disable
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            max_connections: 0,
            outbound_queue_capacity: default_outbound_queue_capacity(),
            identity_policy: IdentityPolicy::default(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes a default configuration to `path`
    /// and returns it.
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)
                .context("Failed to serialize default configuration")?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides on top of the file settings.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(bind_address) = &args.bind_address {
            self.server.bind_address = bind_address.clone();
        }
        if let Some(log_level) = &args.log_level {
            self.logging.level = log_level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
        if let Some(max_connections) = args.max_connections {
            self.server.max_connections = max_connections;
        }
        if let Some(identity_policy) = args.identity_policy {
            self.server.identity_policy = identity_policy;
        }
    }

    /// Validates the configuration.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error describing the
    /// first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            return Err(anyhow!("Invalid bind address: {}", self.server.bind_address));
        }

        if self.server.outbound_queue_capacity == 0 {
            return Err(anyhow!("outbound_queue_capacity must be greater than 0"));
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(anyhow!(
                "Invalid log level: {}. Must be one of: {VALID_LOG_LEVELS:?}",
                self.logging.level
            ));
        }

        Ok(())
    }

    /// Converts the file settings into the relay's configuration.
    ///
    /// # Errors
    ///
    /// Wraps `RelayError::Config` when the bind address does not parse or
    /// the relay rejects the resulting settings.
    pub fn to_relay_config(&self) -> Result<RelayConfig> {
        let bind_address = self.server.bind_address.parse::<SocketAddr>().map_err(|e| {
            RelayError::Config(format!(
                "Invalid bind address '{}': {e}",
                self.server.bind_address
            ))
        })?;

        let relay_config = RelayConfig {
            bind_address,
            max_connections: self.server.max_connections,
            outbound_queue_capacity: self.server.outbound_queue_capacity,
            identity_policy: self.server.identity_policy,
        };
        relay_config.validate()?;
        Ok(relay_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, NamedTempFile};
    use tokio::fs;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:8765");
        assert_eq!(config.server.max_connections, 0);
        assert_eq!(config.server.outbound_queue_capacity, 256);
        assert_eq!(config.server.identity_policy, IdentityPolicy::Trust);
        assert_eq!(config.server.stats_interval_secs, 60);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file_writes_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relay.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:8765");
        assert!(path.exists());

        // The written file loads back to the same settings.
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded.server.bind_address, config.server.bind_address);
        assert_eq!(
            reloaded.server.outbound_queue_capacity,
            config.server.outbound_queue_capacity
        );
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[server]
bind_address = "127.0.0.1:9100"
max_connections = 500
outbound_queue_capacity = 32
identity_policy = "bind-first"
stats_interval_secs = 15

[logging]
level = "debug"
json_format = true
"#;

        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), toml_content).await.unwrap();

        let config = AppConfig::load_from_file(temp_file.path()).await.unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:9100");
        assert_eq!(config.server.max_connections, 500);
        assert_eq!(config.server.outbound_queue_capacity, 32);
        assert_eq!(config.server.identity_policy, IdentityPolicy::BindFirst);
        assert_eq!(config.server.stats_interval_secs, 15);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
    }

    #[tokio::test]
    async fn test_partial_file_uses_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "[server]\nmax_connections = 10\n")
            .await
            .unwrap();

        let config = AppConfig::load_from_file(temp_file.path()).await.unwrap();
        assert_eq!(config.server.max_connections, 10);
        assert_eq!(config.server.bind_address, "0.0.0.0:8765");
        assert_eq!(config.server.outbound_queue_capacity, 256);
        assert_eq!(config.logging.level, "info");
    }

    #[tokio::test]
    async fn test_malformed_file_is_error() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "[server\nbind_address = ")
            .await
            .unwrap();
        assert!(AppConfig::load_from_file(temp_file.path()).await.is_err());
    }

    #[test]
    fn test_validation_invalid_bind_address() {
        let mut config = AppConfig::default();
        config.server.bind_address = "not-an-address".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid bind address"));
    }

    #[test]
    fn test_validation_zero_queue_capacity() {
        let mut config = AppConfig::default();
        config.server.outbound_queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_log_levels() {
        let mut config = AppConfig::default();
        for level in VALID_LOG_LEVELS {
            config.logging.level = level.to_string();
            assert!(config.validate().is_ok(), "{level} should be valid");
        }
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = AppConfig::default();
        let args = CliArgs {
            bind_address: Some("127.0.0.1:7000".to_string()),
            log_level: Some("warn".to_string()),
            json_logs: true,
            max_connections: Some(8),
            identity_policy: Some(IdentityPolicy::BindFirst),
            ..CliArgs::default()
        };
        config.apply_cli_overrides(&args);

        assert_eq!(config.server.bind_address, "127.0.0.1:7000");
        assert_eq!(config.logging.level, "warn");
        assert!(config.logging.json_format);
        assert_eq!(config.server.max_connections, 8);
        assert_eq!(config.server.identity_policy, IdentityPolicy::BindFirst);
    }

    #[test]
    fn test_cli_without_overrides_keeps_file_settings() {
        let mut config = AppConfig::default();
        config.server.max_connections = 3;
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config.server.max_connections, 3);
        assert_eq!(config.server.bind_address, "0.0.0.0:8765");
    }

    #[test]
    fn test_to_relay_config_conversion() {
        let mut config = AppConfig::default();
        config.server.bind_address = "127.0.0.1:8800".to_string();
        config.server.max_connections = 100;
        config.server.outbound_queue_capacity = 16;

        let relay_config = config.to_relay_config().unwrap();
        assert_eq!(relay_config.bind_address.to_string(), "127.0.0.1:8800");
        assert_eq!(relay_config.max_connections, 100);
        assert_eq!(relay_config.outbound_queue_capacity, 16);
        assert_eq!(relay_config.identity_policy, IdentityPolicy::Trust);
    }

    #[test]
    fn test_to_relay_config_reports_relay_config_errors() {
        let mut config = AppConfig::default();
        config.server.outbound_queue_capacity = 0;
        let err = config.to_relay_config().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RelayError>(),
            Some(RelayError::Config(_))
        ));

        config.server.outbound_queue_capacity = 8;
        config.server.bind_address = "not-an-address".to_string();
        let err = config.to_relay_config().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RelayError>(),
            Some(RelayError::Config(_))
        ));
    }
}
