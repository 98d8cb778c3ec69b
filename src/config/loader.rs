use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::types::Config;

/// Polls longer than this cannot be expressed to `poll(2)` here.
const MAX_POLL_TIMEOUT_MS: u64 = u16::MAX as u64;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config file '{path}': {message}")]
    ValidationError { path: PathBuf, message: String },
}

impl Config {
    /// Returns the path to the configuration file.
    ///
    /// Uses `~/.config/obsidian-install/config.toml` on Linux via
    /// `dirs::config_dir()`. Falls back to the current directory if
    /// config_dir is unavailable.
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("obsidian-install").join("config.toml")
    }

    /// Loads configuration from the default config file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Loads configuration from `path`.
    ///
    /// - If the file doesn't exist, returns `Config::default()`.
    /// - Otherwise parses it as TOML and validates it.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate(path)?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Validates the configuration read from `path`.
    ///
    /// Checks:
    /// - The tool name and image are not empty
    /// - Loop and write timeouts are usable
    /// - Default partition sizes are in range
    pub fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::ValidationError {
            path: path.to_path_buf(),
            message,
        };

        if self.installer.tool.trim().is_empty() {
            return Err(invalid("installer.tool must not be empty".to_string()));
        }
        if self.installer.image.trim().is_empty() {
            return Err(invalid("installer.image must not be empty".to_string()));
        }

        let session = &self.session;
        if !(1..=MAX_POLL_TIMEOUT_MS).contains(&session.poll_timeout_ms) {
            return Err(invalid(format!(
                "session.poll_timeout_ms must be between 1 and {MAX_POLL_TIMEOUT_MS}, got {}",
                session.poll_timeout_ms
            )));
        }
        if !(1..=MAX_POLL_TIMEOUT_MS).contains(&session.write_stall_timeout_ms) {
            return Err(invalid(format!(
                "session.write_stall_timeout_ms must be between 1 and {MAX_POLL_TIMEOUT_MS}, got {}",
                session.write_stall_timeout_ms
            )));
        }
        if session.max_write_stalls == 0 {
            return Err(invalid("session.max_write_stalls must be at least 1".to_string()));
        }

        self.partitions
            .validate()
            .map_err(|e| invalid(format!("partitions: {e}")))
    }
}
