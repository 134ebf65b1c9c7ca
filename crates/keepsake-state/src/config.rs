//! Configuration loading for the state store.
//!
//! The canonical configuration lives in `keepsake-config.yaml` next to the
//! host binary. Every section is optional; a missing file section falls
//! back to the defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Environment variable that overrides [`StorageConfig::root`].
pub const DATA_DIR_ENV: &str = "KEEPSAKE_DATA_DIR";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level store configuration.
///
/// Mirrors the structure of `keepsake-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// Where documents are written.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Periodic save settings.
    #[serde(default)]
    pub autosave: AutosaveConfig,

    /// I/O lane settings.
    #[serde(default)]
    pub io: IoConfig,

    /// Logging configuration for host binaries.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl StoreConfig {
    /// Load configuration from a YAML file, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not to a mapping.
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.storage.apply_env_overrides();
        Ok(config)
    }

    /// How long shutdown waits for queued writes before writing directly.
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.io.shutdown_timeout_ms)
    }
}

/// Storage location.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageConfig {
    /// Root directory; documents live at `<root>/<namespace>/<key>.<ext>`.
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

impl StorageConfig {
    /// Override the root with `KEEPSAKE_DATA_DIR` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(DATA_DIR_ENV) {
            self.root = PathBuf::from(val);
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
        }
    }
}

/// Autosave settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AutosaveConfig {
    /// When false, no entity type autosaves regardless of its declared
    /// interval.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// I/O lane settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IoConfig {
    /// Milliseconds shutdown waits for the lane to drain.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("data/state")
}

const fn default_true() -> bool {
    true
}

const fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

fn default_log_level() -> String {
    "info".to_owned()
}
