//! Configuration management for querier
//!
//! This module handles loading and managing configuration from:
//! - A configuration file (TOML format, `~/.querier/config.toml` by default)
//! - Environment variables (`QUERIER_*`)
//!
//! Configuration precedence (highest to lowest):
//! 1. Environment variables
//! 2. Configuration file
//! 3. Default values

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Path to the credentials file
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,

    /// Upper bound for establishing a connection, in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Number of records fetched per cursor round trip
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Application name reported to the server
    #[serde(default = "default_app_name")]
    pub app_name: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// Path to log file (None for stderr)
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Enable timestamps in logs
    #[serde(default = "default_log_timestamps")]
    pub timestamps: bool,
}

/// Log level options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

// Default value functions
fn default_credentials_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".credentials.toml")
}

fn default_timeout() -> u64 {
    30
}

fn default_batch_size() -> u32 {
    500
}

fn default_app_name() -> String {
    "querier".to_string()
}

fn default_log_level() -> LogLevel {
    LogLevel::Warn
}

fn default_log_timestamps() -> bool {
    true
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            credentials_path: default_credentials_path(),
            timeout: default_timeout(),
            batch_size: default_batch_size(),
            app_name: default_app_name(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_path: None,
            timestamps: default_log_timestamps(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                ConfigError::FileNotFound(path.display().to_string()).into()
            }
            _ => crate::error::QuerierError::Io(e),
        })?;
        Self::from_toml(&text)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default file (if present), then apply
    /// environment overrides
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `QUERIER_*` overrides read through `lookup`
    ///
    /// Recognized keys: `QUERIER_CREDENTIALS`, `QUERIER_TIMEOUT`,
    /// `QUERIER_BATCH_SIZE`, `QUERIER_LOG_LEVEL`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("QUERIER_CREDENTIALS") {
            self.connection.credentials_path = PathBuf::from(path);
        }
        if let Some(value) = lookup("QUERIER_TIMEOUT") {
            self.connection.timeout = parse_env("QUERIER_TIMEOUT", &value)?;
        }
        if let Some(value) = lookup("QUERIER_BATCH_SIZE") {
            self.connection.batch_size = parse_env("QUERIER_BATCH_SIZE", &value)?;
        }
        if let Some(value) = lookup("QUERIER_LOG_LEVEL") {
            self.logging.level = value.parse()?;
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".querier")
            .join("config.toml")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.connection.timeout == 0 {
            return Err(ConfigError::InvalidValue {
                field: "connection.timeout".to_string(),
                value: "0".to_string(),
            }
            .into());
        }
        if self.connection.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "connection.batch_size".to_string(),
                value: "0".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl ConnectionConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        ConfigError::InvalidValue {
            field: key.to_string(),
            value: value.to_string(),
        }
        .into()
    })
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Install a `tracing` subscriber for querier's log output.
///
/// Writes to `file_path` (appending) when set, otherwise to stderr. Calling
/// this when a global subscriber is already installed is a no-op.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let level = config.level.to_tracing_level();

    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false);

    // try_init fails only when a subscriber is already set
    let _ = match (&config.file_path, config.timestamps) {
        (Some(path), timestamps) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| ConfigError::Logging(format!("{}: {e}", path.display())))?;
            let builder = builder.with_ansi(false).with_writer(Mutex::new(file));
            if timestamps {
                builder.try_init()
            } else {
                builder.without_time().try_init()
            }
        }
        (None, true) => builder.with_writer(std::io::stderr).try_init(),
        (None, false) => builder.with_writer(std::io::stderr).without_time().try_init(),
    };

    Ok(())
}
