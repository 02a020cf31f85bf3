//! Notifiers: where accepted items and error reports go
//!
//! A run hands every accepted item (or one digest per feed) and every error
//! report to a [`Notifier`]. Two implementations ship with the crate:
//!
//! - [`LogNotifier`] writes everything to the tracing log
//! - [`WebhookNotifier`] POSTs JSON payloads to an HTTP endpoint
//!
//! # Webhook payloads
//!
//! ```json
//! {"kind": "item", "feed": {"url": "...", "title": "..."}, "items": [ ... ]}
//! {"kind": "digest", "feed": {"url": "...", "title": "..."}, "items": [ ... ]}
//! {"kind": "error", "message": "<rendered error template>"}
//! ```

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::FeedItem;
use crate::script::FeedDecl;

/// Errors that can occur while delivering a notification
#[derive(Debug, Error)]
pub enum NotifyError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint rejected the notification
    #[error("HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Invalid notifier configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Destination for run output
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Notifier name, for logs
    fn name(&self) -> &str;

    /// Deliver one accepted item
    async fn send_item(&self, feed: &FeedDecl, item: &FeedItem) -> Result<(), NotifyError>;

    /// Deliver the accepted items of a digest feed together
    async fn send_digest(&self, feed: &FeedDecl, items: &[FeedItem]) -> Result<(), NotifyError> {
        for item in items {
            self.send_item(feed, item).await?;
        }
        Ok(())
    }

    /// Deliver an error report, already rendered through the error template
    async fn send_error(&self, message: &str) -> Result<(), NotifyError>;
}

// ============================================================================
// Log Notifier
// ============================================================================

/// Writes notifications to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send_item(&self, feed: &FeedDecl, item: &FeedItem) -> Result<(), NotifyError> {
        tracing::info!(
            feed = %feed.display_name(),
            title = %item.title,
            link = %item.link,
            "New item"
        );
        Ok(())
    }

    async fn send_digest(&self, feed: &FeedDecl, items: &[FeedItem]) -> Result<(), NotifyError> {
        tracing::info!(feed = %feed.display_name(), items = items.len(), "Digest");
        for item in items {
            tracing::info!(feed = %feed.display_name(), title = %item.title, link = %item.link, "Digest item");
        }
        Ok(())
    }

    async fn send_error(&self, message: &str) -> Result<(), NotifyError> {
        tracing::error!(message = %message, "Run error notification");
        Ok(())
    }
}

// ============================================================================
// Webhook Notifier
// ============================================================================

/// Webhook notifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Webhook URL endpoint
    pub url: String,
    /// Optional authentication token (sent as Bearer token)
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Custom headers to include in requests
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Maximum retry attempts on failure
    #[serde(default = "default_retries")]
    pub max_retries: u32,
}

fn default_timeout() -> u64 {
    10
}

fn default_retries() -> u32 {
    3
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
            headers: HashMap::new(),
            timeout_secs: default_timeout(),
            max_retries: default_retries(),
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// The URL must be absolute http(s); the timeout non-zero
    pub fn validate(&self) -> Result<(), String> {
        let url = url::Url::parse(&self.url)
            .map_err(|e| format!("invalid webhook URL {:?}: {e}", self.url))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!("webhook URL {:?} is not http(s)", self.url));
        }
        if self.timeout_secs == 0 {
            return Err("webhook timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// POSTs notifications as JSON
pub struct WebhookNotifier {
    config: WebhookConfig,
    client: Client,
    backoff_base: Duration,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> Result<Self, NotifyError> {
        config.validate().map_err(NotifyError::InvalidConfig)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(crate::USER_AGENT)
            .build()?;

        Ok(Self {
            config,
            client,
            backoff_base: Duration::from_secs(1),
        })
    }

    /// Override the retry backoff base (1s by default)
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    fn feed_payload(kind: &str, feed: &FeedDecl, items: &[FeedItem]) -> serde_json::Value {
        serde_json::json!({
            "kind": kind,
            "feed": {
                "url": feed.url,
                "title": feed.title,
                "message_thread_id": feed.message_thread_id,
                "format": feed.format.as_ref().map(|f| &f.name),
            },
            "items": items,
        })
    }

    async fn send_with_retry(&self, payload: &serde_json::Value) -> Result<(), NotifyError> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // Exponential backoff: base, 2x, 4x...
                let delay = self.backoff_base * 2_u32.pow(attempt - 1);
                tokio::time::sleep(delay).await;
                tracing::debug!(
                    attempt = attempt + 1,
                    max = self.config.max_retries + 1,
                    "Retrying webhook request"
                );
            }

            let mut request = self.client.post(&self.config.url);
            if let Some(token) = &self.config.auth_token {
                request = request.bearer_auth(token);
            }
            for (key, value) in &self.config.headers {
                request = request.header(key, value);
            }

            match request.json(payload).send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    let status = response.status();
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unable to read response body".to_string());
                    last_error = Some(NotifyError::Rejected {
                        status: status.as_u16(),
                        body,
                    });

                    // Don't retry on client errors (4xx)
                    if status.is_client_error() {
                        break;
                    }
                }
                Err(e) => last_error = Some(NotifyError::Http(e)),
            }
        }

        let err = last_error.unwrap_or_else(|| NotifyError::InvalidConfig("no attempts made".into()));
        tracing::warn!(url = %self.config.url, error = %err, "Webhook delivery failed");
        Err(err)
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send_item(&self, feed: &FeedDecl, item: &FeedItem) -> Result<(), NotifyError> {
        let payload = Self::feed_payload("item", feed, std::slice::from_ref(item));
        self.send_with_retry(&payload).await
    }

    async fn send_digest(&self, feed: &FeedDecl, items: &[FeedItem]) -> Result<(), NotifyError> {
        let payload = Self::feed_payload("digest", feed, items);
        self.send_with_retry(&payload).await
    }

    async fn send_error(&self, message: &str) -> Result<(), NotifyError> {
        let payload = serde_json::json!({ "kind": "error", "message": message });
        self.send_with_retry(&payload).await
    }
}
