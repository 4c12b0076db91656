//! Configuration settings for assessor-sync.
//!
//! Settings are loaded from `~/.assessor-sync/config.yaml`. Every field has a
//! default, so a partial file (or no file at all) is valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Paths;
use crate::error::SyncError;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Synchronization engine settings.
    pub sync: SyncConfig,
    /// Remote backend settings.
    pub remote: RemoteConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Synchronization engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Start the recurring sync timer when the engine starts. For the CLI
    /// this makes `sync` keep running as with `--watch`.
    #[serde(default)]
    pub auto_sync: bool,
    /// Interval between auto-sync checks, in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Attempt count at which a pending item is reported as stuck.
    #[serde(default = "default_stuck_threshold")]
    pub stuck_threshold: u32,
}

/// Remote backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the REST backend, e.g. `https://assessor.example.gov/api`.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Tables to register with the REST gateway.
    #[serde(default)]
    pub tables: Vec<String>,
    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

// Default value functions for serde
const fn default_interval_ms() -> u64 {
    30_000
}

const fn default_stuck_threshold() -> u32 {
    3
}

const fn default_timeout_secs() -> u64 {
    30
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_sync: false,
            interval_ms: default_interval_ms(),
            stuck_threshold: default_stuck_threshold(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            tables: Vec::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl SyncConfig {
    /// Auto-sync interval as a [`Duration`].
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl RemoteConfig {
    /// HTTP timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self, SyncError> {
        let paths = Paths::new()?;
        Self::load_from_path(&paths.config_file)
    }

    /// Load configuration from a specific path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or
    /// if it holds invalid values.
    pub fn load_from_path(path: &std::path::Path) -> Result<Self, SyncError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        let config: Self = serde_yaml::from_str(&contents).map_err(|e| {
            SyncError::Config(format!(
                "Failed to parse config file {}: {e}",
                path.display()
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save_to_path(&self, path: &std::path::Path) -> Result<(), SyncError> {
        let contents = serde_yaml::to_string(self)
            .map_err(|e| SyncError::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, contents).map_err(|e| {
            SyncError::Config(format!(
                "Failed to write config file {}: {e}",
                path.display()
            ))
        })
    }

    /// Check values serde cannot reject on its own.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.sync.interval_ms == 0 {
            return Err(SyncError::Config(
                "sync.interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.sync.stuck_threshold == 0 {
            return Err(SyncError::Config(
                "sync.stuck_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
