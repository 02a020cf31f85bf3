//! Admin server configuration

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Largest request body accepted by default (config, state and template PUTs)
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Configuration for the admin server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Server bind address
    pub bind_address: SocketAddr,

    /// Directory holding config, state, template, stats and the run-lock
    pub state_dir: PathBuf,

    /// Enable request logging
    pub enable_request_logging: bool,

    /// Maximum request body size in bytes
    pub max_body_bytes: usize,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            state_dir: PathBuf::from("data"),
            enable_request_logging: true,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl AdminConfig {
    /// Create a new config builder
    pub fn builder() -> AdminConfigBuilder {
        AdminConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.state_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingField {
                field: "state_dir".to_string(),
            });
        }

        if self.max_body_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_body_bytes".to_string(),
                reason: "Must accept at least one byte".to_string(),
            });
        }

        Ok(())
    }
}

/// Builder for AdminConfig
#[derive(Debug, Default)]
pub struct AdminConfigBuilder {
    bind_address: Option<SocketAddr>,
    state_dir: Option<PathBuf>,
    enable_request_logging: Option<bool>,
    max_body_bytes: Option<usize>,
}

impl AdminConfigBuilder {
    /// Set bind address
    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = Some(addr);
        self
    }

    /// Set bind address from string
    pub fn bind_address_str(mut self, addr: &str) -> Result<Self, ConfigError> {
        self.bind_address = Some(addr.parse().map_err(|_| ConfigError::InvalidValue {
            field: "bind_address".to_string(),
            reason: format!("Invalid address: {}", addr),
        })?);
        Ok(self)
    }

    /// Set the state directory
    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    /// Enable/disable request logging
    pub fn enable_request_logging(mut self, enable: bool) -> Self {
        self.enable_request_logging = Some(enable);
        self
    }

    /// Set maximum request body size
    pub fn max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = Some(bytes);
        self
    }

    /// Build the config
    pub fn build(self) -> Result<AdminConfig, ConfigError> {
        let defaults = AdminConfig::default();
        let config = AdminConfig {
            bind_address: self.bind_address.unwrap_or(defaults.bind_address),
            state_dir: self.state_dir.unwrap_or(defaults.state_dir),
            enable_request_logging: self
                .enable_request_logging
                .unwrap_or(defaults.enable_request_logging),
            max_body_bytes: self.max_body_bytes.unwrap_or(defaults.max_body_bytes),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    InvalidValue { field: String, reason: String },
    MissingField { field: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
            Self::MissingField { field } => {
                write!(f, "Missing required field: {}", field)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
