//! Configuration parsing and structures

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::env::substitute_env_vars;
use crate::session::{Credentials, Endpoint, DEFAULT_READ_TIMEOUT};

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Remote endpoint and session settings
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Local temp storage for open files
    #[serde(default)]
    pub transfer: TransferConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Endpoint configuration
#[derive(Clone, Deserialize)]
pub struct EndpointConfig {
    /// Default URI; operations may name any URI on the same server
    pub url: Option<String>,

    /// Static username, used when the server asks for credentials
    pub username: Option<String>,

    /// Static password
    pub password: Option<String>,

    /// How long a request may stall before it fails
    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_read_timeout() -> Duration {
    DEFAULT_READ_TIMEOUT
}

fn default_user_agent() -> String {
    format!("webdav-adapter/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            password: None,
            read_timeout: default_read_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl EndpointConfig {
    /// Static credentials, if a username is configured
    pub fn credentials(&self) -> Option<Credentials> {
        self.username
            .as_ref()
            .map(|username| Credentials::new(username.clone(), self.password.clone()))
    }
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("read_timeout", &self.read_timeout)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

/// Temp file settings
#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    /// Directory for temp files (default: the system temp dir)
    pub temp_dir: Option<PathBuf>,

    /// File name prefix of temp files
    #[serde(default = "default_temp_prefix")]
    pub temp_prefix: String,
}

fn default_temp_prefix() -> String {
    "csync.".to_string()
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            temp_prefix: default_temp_prefix(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string, substituting `${VAR}`
    /// references from the environment first
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let content = substitute_env_vars(content)?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.endpoint.url {
            Endpoint::parse(url).map_err(|e| {
                ConfigError::ValidationError(format!("Invalid endpoint url {:?}: {}", url, e))
            })?;
        }

        if self.endpoint.read_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "endpoint.read_timeout must be greater than zero".to_string(),
            ));
        }

        if let Some(dir) = &self.transfer.temp_dir {
            if !dir.is_dir() {
                return Err(ConfigError::ValidationError(format!(
                    "transfer.temp_dir {:?} is not a directory",
                    dir
                )));
            }
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}
