//! Configuration management for feedwarden
//!
//! Settings come from environment variables (`FEEDWARDEN_*`) or a TOML file,
//! with command-line flags applied on top by the binary. Every section and
//! field has a default, so a file only needs the values it changes:
//!
//! ```toml
//! [storage]
//! state_dir = "/var/lib/feedwarden"
//!
//! [fetcher]
//! concurrency = 4
//! webhook_url = "https://hooks.example.com/feeds"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::admin::AdminConfig;
use crate::fetcher::dedup::{DEFAULT_LOOKBACK_DAYS, DEFAULT_SEEN_ITEMS_CLEANUP_DAYS};
use crate::fetcher::{
    DedupWindows, FetcherSettings, WebhookConfig, DEFAULT_CONCURRENCY, DEFAULT_ERROR_THRESHOLD,
};
use crate::storage::RemoteConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where documents live
    pub storage: StorageConfig,

    /// Admin server configuration
    pub admin: AdminSection,

    /// Run configuration
    pub fetcher: FetcherConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// State directory (config, state, template, stats, run-lock)
    pub state_dir: PathBuf,

    /// Admin API of another instance to read and write documents through
    pub remote_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("data"),
            remote_url: None,
        }
    }
}

/// Admin server section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminSection {
    /// Bind address, `host:port`
    pub bind_address: String,

    /// Log every request
    pub enable_request_logging: bool,

    /// Maximum request body size in bytes
    pub max_body_bytes: usize,
}

impl Default for AdminSection {
    fn default() -> Self {
        let defaults = AdminConfig::default();
        Self {
            bind_address: defaults.bind_address.to_string(),
            enable_request_logging: defaults.enable_request_logging,
            max_body_bytes: defaults.max_body_bytes,
        }
    }
}

/// Run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// Feeds fetched at the same time
    pub concurrency: usize,

    /// Consecutive failures before a feed is disabled (0 = never)
    pub error_threshold: u32,

    /// Seen-set feeds ignore items older than this many days
    pub lookback_days: i64,

    /// Seen-set entries are forgotten after this many days
    pub seen_items_cleanup_days: i64,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// User agent string
    pub user_agent: String,

    /// Randomize feed order on every run
    pub shuffle: bool,

    /// Deliver updates to this webhook instead of the log
    pub webhook_url: Option<String>,

    /// Bearer token for the webhook
    pub webhook_token: Option<String>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            seen_items_cleanup_days: DEFAULT_SEEN_ITEMS_CLEANUP_DAYS,
            request_timeout_secs: 30,
            user_agent: crate::USER_AGENT.to_string(),
            shuffle: true,
            webhook_url: None,
            webhook_token: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let state_dir = std::env::var("FEEDWARDEN_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.storage.state_dir);
        let remote_url = std::env::var("FEEDWARDEN_REMOTE_URL").ok();

        let bind_address =
            std::env::var("FEEDWARDEN_BIND_ADDRESS").unwrap_or(defaults.admin.bind_address);
        let enable_request_logging = env_or(
            "FEEDWARDEN_REQUEST_LOGGING",
            defaults.admin.enable_request_logging,
        );
        let max_body_bytes = env_or("FEEDWARDEN_MAX_BODY_BYTES", defaults.admin.max_body_bytes);

        let fetcher = FetcherConfig {
            concurrency: env_or("FEEDWARDEN_CONCURRENCY", defaults.fetcher.concurrency),
            error_threshold: env_or("FEEDWARDEN_ERROR_THRESHOLD", defaults.fetcher.error_threshold),
            lookback_days: env_or("FEEDWARDEN_LOOKBACK_DAYS", defaults.fetcher.lookback_days),
            seen_items_cleanup_days: env_or(
                "FEEDWARDEN_SEEN_ITEMS_CLEANUP_DAYS",
                defaults.fetcher.seen_items_cleanup_days,
            ),
            request_timeout_secs: env_or(
                "FEEDWARDEN_REQUEST_TIMEOUT",
                defaults.fetcher.request_timeout_secs,
            ),
            user_agent: std::env::var("FEEDWARDEN_USER_AGENT")
                .unwrap_or(defaults.fetcher.user_agent),
            shuffle: env_or("FEEDWARDEN_SHUFFLE", defaults.fetcher.shuffle),
            webhook_url: std::env::var("FEEDWARDEN_WEBHOOK_URL").ok(),
            webhook_token: std::env::var("FEEDWARDEN_WEBHOOK_TOKEN").ok(),
        };

        let log_level =
            std::env::var("FEEDWARDEN_LOG_LEVEL").unwrap_or_else(|_| String::from("info"));

        let log_format =
            std::env::var("FEEDWARDEN_LOG_FORMAT").unwrap_or_else(|_| String::from("text"));

        Ok(Self {
            storage: StorageConfig {
                state_dir,
                remote_url,
            },
            admin: AdminSection {
                bind_address,
                enable_request_logging,
                max_body_bytes,
            },
            fetcher,
            logging: LoggingConfig {
                level: log_level,
                format: log_format,
            },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.storage.state_dir.as_os_str().is_empty() {
            anyhow::bail!("state_dir must not be empty");
        }

        if self.fetcher.concurrency == 0 {
            anyhow::bail!("concurrency must be greater than 0");
        }

        if self.fetcher.lookback_days <= 0 || self.fetcher.seen_items_cleanup_days <= 0 {
            anyhow::bail!("lookback_days and seen_items_cleanup_days must be positive");
        }

        if self.fetcher.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than 0");
        }

        if let Some(remote) = &self.storage.remote_url {
            url::Url::parse(remote).with_context(|| format!("invalid remote_url {remote:?}"))?;
        }

        if let Some(webhook) = self.webhook_config() {
            webhook.validate().map_err(anyhow::Error::msg)?;
        }

        self.admin_config()?;
        Ok(())
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.fetcher.request_timeout_secs)
    }

    /// Admin server settings
    pub fn admin_config(&self) -> Result<AdminConfig> {
        let config = AdminConfig::builder()
            .bind_address_str(&self.admin.bind_address)?
            .state_dir(&self.storage.state_dir)
            .enable_request_logging(self.admin.enable_request_logging)
            .max_body_bytes(self.admin.max_body_bytes)
            .build()?;
        Ok(config)
    }

    /// Run tuning
    #[must_use]
    pub fn fetcher_settings(&self) -> FetcherSettings {
        FetcherSettings {
            concurrency: self.fetcher.concurrency,
            error_threshold: self.fetcher.error_threshold,
            windows: DedupWindows {
                lookback: chrono::Duration::days(self.fetcher.lookback_days),
                cleanup: chrono::Duration::days(self.fetcher.seen_items_cleanup_days),
            },
            shuffle: self.fetcher.shuffle,
        }
    }

    /// Remote store settings, when a remote is configured
    #[must_use]
    pub fn remote_config(&self) -> Option<RemoteConfig> {
        self.storage
            .remote_url
            .as_ref()
            .map(|url| RemoteConfig::new(url.as_str()).with_timeout(self.request_timeout()))
    }

    /// Webhook settings, when a webhook is configured
    #[must_use]
    pub fn webhook_config(&self) -> Option<WebhookConfig> {
        let url = self.fetcher.webhook_url.as_ref()?;
        let mut config = WebhookConfig::new(url.as_str());
        if let Some(token) = &self.fetcher.webhook_token {
            config = config.with_auth_token(token.as_str());
        }
        Some(config)
    }
}
