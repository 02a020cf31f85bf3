//! Remote store: config and state kept by another instance's admin API
//!
//! Lets a run on one host read its config and persist its state through
//! the admin API of the host that owns the state directory.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::error::ErrorCategory;

// ============================================================================
// Client Configuration
// ============================================================================

/// Configuration for [`RemoteStore`]
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base URL of the admin API, e.g. `http://state-host:8080`
    pub base_url: String,

    /// Request timeout
    pub timeout: Duration,

    /// Retries after a network error or a 5xx
    pub retry_count: u32,

    /// Delay between retries
    pub retry_delay: Duration,

    pub user_agent: String,
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
            retry_count: 2,
            retry_delay: Duration::from_millis(500),
            user_agent: crate::USER_AGENT.to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

// ============================================================================
// Remote Store
// ============================================================================

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// HTTP client for the admin API documents
#[derive(Debug, Clone)]
pub struct RemoteStore {
    config: RemoteConfig,
    http_client: Client,
}

impl RemoteStore {
    pub fn new(config: RemoteConfig) -> Result<Self, ClientError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub async fn get_config(&self) -> Result<String, ClientError> {
        let body = self.get_with_retry("/api/config").await?;
        String::from_utf8(body).map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    pub async fn put_config(&self, body: &[u8]) -> Result<(), ClientError> {
        self.put_with_retry("/api/config", body, "text/plain; charset=utf-8")
            .await
    }

    pub async fn get_state(&self) -> Result<Vec<u8>, ClientError> {
        self.get_with_retry("/api/state").await
    }

    pub async fn put_state(&self, body: &[u8]) -> Result<(), ClientError> {
        self.put_with_retry("/api/state", body, "application/json")
            .await
    }

    pub async fn get_error_template(&self) -> Result<String, ClientError> {
        let body = self.get_with_retry("/api/error-template").await?;
        String::from_utf8(body).map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    pub async fn put_error_template(&self, body: &[u8]) -> Result<(), ClientError> {
        self.put_with_retry("/api/error-template", body, "text/plain; charset=utf-8")
            .await
    }

    // Internal: GET request with retry
    async fn get_with_retry(&self, path: &str) -> Result<Vec<u8>, ClientError> {
        let url = format!("{}{path}", self.config.base_url);
        let mut last_error = None;

        for attempt in 0..=self.config.retry_count {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay).await;
            }

            match self.http_client.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    return response
                        .bytes()
                        .await
                        .map(|b| b.to_vec())
                        .map_err(|e| ClientError::NetworkError(e.to_string()));
                }
                Ok(response) => {
                    let err = status_error(response).await;
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    last_error = Some(err);
                }
                Err(e) => last_error = Some(ClientError::NetworkError(e.to_string())),
            }
            tracing::debug!(url = %url, attempt, "Remote GET failed");
        }

        Err(last_error.unwrap_or_else(|| ClientError::NetworkError("Unknown error".to_string())))
    }

    // Internal: PUT request with retry
    async fn put_with_retry(
        &self,
        path: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<(), ClientError> {
        let url = format!("{}{path}", self.config.base_url);
        let mut last_error = None;

        for attempt in 0..=self.config.retry_count {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay).await;
            }

            let request = self
                .http_client
                .put(&url)
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(body.to_vec());

            match request.send().await {
                Ok(response) if response.status() == StatusCode::NO_CONTENT => return Ok(()),
                Ok(response) if response.status().is_success() => {
                    return Err(ClientError::InvalidResponse(format!(
                        "want 204, got {}",
                        response.status().as_u16()
                    )));
                }
                Ok(response) => {
                    let err = status_error(response).await;
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    last_error = Some(err);
                }
                Err(e) => last_error = Some(ClientError::NetworkError(e.to_string())),
            }
            tracing::debug!(url = %url, attempt, "Remote PUT failed");
        }

        Err(last_error.unwrap_or_else(|| ClientError::NetworkError("Unknown error".to_string())))
    }
}

async fn status_error(response: reqwest::Response) -> ClientError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);
    ClientError::HttpError { status, message }
}

// ============================================================================
// Client Errors
// ============================================================================

/// Remote store errors
#[derive(Debug, Clone)]
pub enum ClientError {
    /// Initialization error
    InitError(String),

    /// Network error
    NetworkError(String),

    /// Non-success status; `message` is the server's error text
    HttpError { status: u16, message: String },

    /// Invalid response
    InvalidResponse(String),
}

impl ClientError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError(_) => true,
            Self::HttpError { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::HttpError { status: 400, .. } => ErrorCategory::Validation,
            Self::HttpError { status: 404, .. } => ErrorCategory::NotFound,
            Self::HttpError { status: 409, .. } => ErrorCategory::Conflict,
            Self::InitError(_) => ErrorCategory::Config,
            _ => ErrorCategory::Network,
        }
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InitError(msg) => write!(f, "Initialization error: {msg}"),
            Self::NetworkError(msg) => write!(f, "Network error: {msg}"),
            Self::HttpError { status, message } => {
                write!(f, "HTTP error ({status}): {message}")
            }
            Self::InvalidResponse(msg) => write!(f, "Invalid response: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_trims_trailing_slash() {
        let config = RemoteConfig::new("http://localhost:8080/");
        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.retry_count, 2);
    }

    #[test]
    fn test_error_categories() {
        let conflict = ClientError::HttpError {
            status: 409,
            message: "cannot modify config: run is in progress".into(),
        };
        assert_eq!(conflict.category(), ErrorCategory::Conflict);
        assert!(!conflict.is_retryable());

        let unavailable = ClientError::HttpError {
            status: 503,
            message: String::new(),
        };
        assert_eq!(unavailable.category(), ErrorCategory::Network);
        assert!(unavailable.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = ClientError::HttpError {
            status: 400,
            message: "invalid JSON: EOF".into(),
        };
        assert_eq!(err.to_string(), "HTTP error (400): invalid JSON: EOF");
    }
}
