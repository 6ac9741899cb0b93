//! Configuration file parsing and structures.
//!
//! atriumd uses TOML for declarative configuration. The gateway shared
//! secret may come from the config file or from the `GATEWAY_SHARED_SECRET`
//! environment variable; deployments without either still start, but every
//! signed route answers 503 until a secret is configured.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use tracing_subscriber::filter::LevelFilter;

/// Environment fallback for the gateway shared secret.
pub const SHARED_SECRET_ENV: &str = "GATEWAY_SHARED_SECRET";

/// Top-level configuration structure
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,
}

/// HTTP listener configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind, e.g. "127.0.0.1"
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_listen() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8750
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
        }
    }
}

/// Gateway request-authentication configuration
#[derive(Debug, Default, Deserialize)]
pub struct AuthConfig {
    /// HMAC shared secret for signed gateway requests.
    /// Falls back to the `GATEWAY_SHARED_SECRET` environment variable.
    #[serde(default)]
    pub shared_secret: Option<String>,
}

impl AuthConfig {
    /// Resolve the effective shared secret, treating empty strings as unset.
    pub fn resolved_shared_secret(&self) -> Option<String> {
        let configured = self
            .shared_secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        configured.or_else(|| {
            std::env::var(SHARED_SECRET_ENV)
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        toml::from_str(&contents).map_err(ConfigError::Parse)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
}
