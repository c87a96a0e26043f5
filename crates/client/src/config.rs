//! Client configuration.
//!
//! Settings are read from TOML. The default path is
//! `~/.config/rembus/config.toml`; a missing file yields the defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable overriding the Rembus data directory.
pub const REMBUS_DIR_ENV: &str = "REMBUS_DIR";

/// Environment variable overriding the log level.
pub const REMBUS_LOG_LEVEL_ENV: &str = "REMBUS_LOG_LEVEL";

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be greater than 0")]
    ZeroTimeout(&'static str),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Where registered private keys are kept.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeyStoreKind {
    /// PEM files under `<rembus_dir>/keys`.
    #[default]
    File,
    /// The operating system keychain.
    Keyring,
    /// Process memory only; keys are lost on exit.
    Memory,
}

/// Settings for a Rembus component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Upper bound for reaching the open state, in milliseconds.
    pub connect_timeout_ms: u64,

    /// Default wait for an orderly close, in milliseconds.
    pub close_timeout_ms: u64,

    /// Deadline for every request awaiting a RESPONSE, in milliseconds.
    pub request_timeout_ms: u64,

    /// Root directory for Rembus data (private keys live in `keys/`).
    pub rembus_dir: PathBuf,

    /// Private key storage backend.
    pub keystore: KeyStoreKind,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            close_timeout_ms: 5000,
            request_timeout_ms: 1000,
            rembus_dir: default_rembus_dir(),
            keystore: KeyStoreKind::File,
            log_level: "info".to_string(),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rembus")
        .join("config.toml")
}

/// Returns the Rembus data directory: `$REMBUS_DIR`, else `<config_dir>/rembus`.
pub fn default_rembus_dir() -> PathBuf {
    match std::env::var(REMBUS_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rembus"),
    }
}

impl ClientConfig {
    /// Deadline for reaching the open state.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Default close wait.
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Deadline for a single request.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported variables:
    /// - REMBUS_DIR: Override the data directory
    /// - REMBUS_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var(REMBUS_DIR_ENV) {
            if !dir.is_empty() {
                tracing::info!("Overriding rembus_dir from environment: {}", dir);
                self.rembus_dir = PathBuf::from(dir);
            }
        }

        if let Ok(level) = std::env::var(REMBUS_LOG_LEVEL_ENV) {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("connect_timeout_ms"));
        }
        if self.close_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("close_timeout_ms"));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("request_timeout_ms"));
        }

        let level = self.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use serial_test::serial;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.close_timeout(), Duration::from_secs(5));
        assert_eq!(config.request_timeout(), Duration::from_secs(1));
        assert_eq!(config.keystore, KeyStoreKind::File);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    #[serial]
    fn test_load_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ClientConfig::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "request_timeout_ms = 250\nkeystore = \"memory\"\nrembus_dir = \"/tmp/rb\"\n",
        )
        .unwrap();

        let config = ClientConfig::load(&path).unwrap();
        assert_eq!(config.request_timeout_ms, 250);
        assert_eq!(config.keystore, KeyStoreKind::Memory);
        assert_eq!(config.rembus_dir, PathBuf::from("/tmp/rb"));
        assert_eq!(config.connect_timeout_ms, 5000);
    }

    #[test]
    fn test_invalid_toml_reports_position() {
        let err = ClientConfig::from_toml("request_timeout_ms = \"soon\"").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Invalid TOML configuration"), "{}", msg);
        assert!(msg.contains("at position"), "{}", msg);
    }

    #[test]
    fn test_unknown_keystore_rejected() {
        assert!(ClientConfig::from_toml("keystore = \"vault\"").is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = ClientConfig {
            keystore: KeyStoreKind::Keyring,
            ..ClientConfig::default()
        };
        let text = config.to_toml().unwrap();
        assert!(text.contains("keystore = \"keyring\""));
        assert_eq!(ClientConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_validate_default_config() {
        assert!(ClientConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_zero_timeouts() {
        let mut config = ClientConfig::default();
        config.request_timeout_ms = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroTimeout("request_timeout_ms"))
        );

        let mut config = ClientConfig::default();
        config.connect_timeout_ms = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroTimeout("connect_timeout_ms"))
        );
    }

    #[test]
    fn test_validate_log_level_case_insensitive() {
        let mut config = ClientConfig::default();
        config.log_level = "DEBUG".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_log_level_invalid() {
        let mut config = ClientConfig::default();
        config.log_level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }

    #[test]
    #[serial]
    fn test_env_override_rembus_dir() {
        std::env::remove_var(REMBUS_LOG_LEVEL_ENV);
        std::env::set_var(REMBUS_DIR_ENV, "/tmp/rembus-test");

        let mut config = ClientConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.rembus_dir, PathBuf::from("/tmp/rembus-test"));
        assert_eq!(default_rembus_dir(), PathBuf::from("/tmp/rembus-test"));

        std::env::remove_var(REMBUS_DIR_ENV);
    }

    #[test]
    #[serial]
    fn test_env_override_log_level() {
        std::env::remove_var(REMBUS_DIR_ENV);
        std::env::set_var(REMBUS_LOG_LEVEL_ENV, "debug");

        let mut config = ClientConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.log_level, "debug");

        std::env::remove_var(REMBUS_LOG_LEVEL_ENV);
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        std::env::set_var(REMBUS_DIR_ENV, "");
        std::env::set_var(REMBUS_LOG_LEVEL_ENV, "");

        let mut config = ClientConfig::default();
        let original = config.clone();
        config.apply_env_overrides();
        assert_eq!(config, original);

        std::env::remove_var(REMBUS_DIR_ENV);
        std::env::remove_var(REMBUS_LOG_LEVEL_ENV);
    }
}
