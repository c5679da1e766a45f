//! Configuration module for Cumulus.

use serde::Deserialize;
use std::path::Path;

use crate::{CumulusError, Result};

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/cumulus.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Physical storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory; each user gets `<root>/<user_id>`.
    #[serde(default = "default_storage_root")]
    pub root: String,
    /// Directory holding user avatars.
    #[serde(default = "default_avatar_path")]
    pub avatar_path: String,
    /// Capacity given to newly registered users, in bytes.
    #[serde(default = "default_disk_space")]
    pub default_disk_space: i64,
    /// Maximum number of registered accounts.
    #[serde(default = "default_max_users")]
    pub max_users: i64,
    /// Size of each chunk emitted by archive and download streams.
    #[serde(default = "default_archive_chunk_size")]
    pub archive_chunk_size: usize,
    /// Number of chunks buffered ahead of a slow reader.
    #[serde(default = "default_archive_buffer_chunks")]
    pub archive_buffer_chunks: usize,
}

fn default_storage_root() -> String {
    "data/files".to_string()
}

fn default_avatar_path() -> String {
    "data/static".to_string()
}

fn default_disk_space() -> i64 {
    500 * 1024 * 1024 // 500MB
}

fn default_max_users() -> i64 {
    7
}

fn default_archive_chunk_size() -> usize {
    64 * 1024
}

fn default_archive_buffer_chunks() -> usize {
    8
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            avatar_path: default_avatar_path(),
            default_disk_space: default_disk_space(),
            max_users: default_max_users(),
            archive_chunk_size: default_archive_chunk_size(),
            archive_buffer_chunks: default_archive_buffer_chunks(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/cumulus.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(CumulusError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| CumulusError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `CUMULUS_STORAGE_ROOT`: Override the physical storage root
    /// - `CUMULUS_DATABASE_PATH`: Override the database file path
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("CUMULUS_STORAGE_ROOT") {
            if !root.is_empty() {
                self.storage.root = root;
            }
        }
        if let Ok(path) = std::env::var("CUMULUS_DATABASE_PATH") {
            if !path.is_empty() {
                self.database.path = path;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.storage.default_disk_space <= 0 {
            return Err(CumulusError::Config(
                "storage.default_disk_space must be positive".to_string(),
            ));
        }
        if self.storage.max_users <= 0 {
            return Err(CumulusError::Config(
                "storage.max_users must be positive".to_string(),
            ));
        }
        if self.storage.archive_chunk_size == 0 || self.storage.archive_buffer_chunks == 0 {
            return Err(CumulusError::Config(
                "archive chunk size and buffer must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
