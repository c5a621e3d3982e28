//! Typed configuration file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::validate::{validate, ValidationError};

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("no configuration file found (tried {})", display_paths(.0))]
    NotFound(Vec<PathBuf>),

    #[error("invalid configuration: {}", display_violations(.0))]
    Invalid(Vec<ValidationError>),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn display_violations(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Root of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Verbose logging, plus a dump of derived DDL at startup.
    #[serde(default)]
    pub debug: bool,

    pub store: StoreSettings,

    pub tlog: TlogSettings,
}

/// Relational store connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default)]
    pub password: String,

    pub database: String,

    #[serde(default = "default_charset")]
    pub charset: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Ingestion and migration behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlogSettings {
    /// Watched directory for `*_tlog_<n>.log` files.
    pub dir: PathBuf,

    /// Processed files are moved here, mirroring their path under `dir`.
    pub backup_dir: PathBuf,

    /// Rows per batch before an immediate flush.
    #[serde(default = "default_batch_write")]
    pub batch_write: usize,

    /// Period of the flush-all tick.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    /// TCP listen address; unset or empty disables the listener.
    #[serde(default)]
    pub listen: Option<String>,

    /// Model description (XML or JSON).
    pub model_file: PathBuf,

    #[serde(default = "default_true")]
    pub auto_create_table: bool,

    #[serde(default = "default_true")]
    pub auto_add_column: bool,

    #[serde(default = "default_true")]
    pub auto_add_index: bool,

    /// Period of the background migration pass.
    #[serde(default = "default_migrate_interval_secs")]
    pub migrate_interval_secs: u64,

    /// Capacity of the control loop queue.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// How long shutdown waits for an in-flight migration pass.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3306
}

fn default_user() -> String {
    "root".to_string()
}

fn default_charset() -> String {
    "utf8mb4".to_string()
}

fn default_max_connections() -> u32 {
    8
}

fn default_batch_write() -> usize {
    100
}

fn default_flush_interval_secs() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_migrate_interval_secs() -> u64 {
    10 * 24 * 60 * 60
}

fn default_channel_capacity() -> usize {
    1
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

impl Settings {
    /// Load, parse and validate a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::parse_toml(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;
        Ok(settings)
    }

    /// Parse and validate TOML text.
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            message: e.to_string(),
        })?;
        validate(&settings).map_err(ConfigError::Invalid)?;
        Ok(settings)
    }

    /// JSON rendering with the store password masked, for startup logs.
    pub fn redacted_json(&self) -> String {
        let mut copy = self.clone();
        if !copy.store.password.is_empty() {
            copy.store.password = "***".to_string();
        }
        serde_json::to_string(&copy).unwrap_or_else(|e| format!("<unprintable: {}>", e))
    }
}

impl TlogSettings {
    /// Listener address, treating an empty string as disabled.
    pub fn listen_addr(&self) -> Option<&str> {
        self.listen
            .as_deref()
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn migrate_interval(&self) -> Duration {
        Duration::from_secs(self.migrate_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
