//! Feed sources
//!
//! A [`FeedSource`] turns a feed declaration into items. The built-in
//! [`JsonFeedSource`] speaks JSON Feed 1.x over HTTP; other formats plug in
//! through the trait.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use crate::models::{CacheValidators, FeedItem, FetchOutcome};
use crate::script::FeedDecl;

/// Bytes of an error response body kept for the error message
const ERROR_BODY_LIMIT: usize = 16 * 1024;

/// Errors that can occur while fetching a feed
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-200 response
    #[error("want 200, got {status}: {body}")]
    Status { status: u16, body: String },

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Body could not be decoded as a feed
    #[error("Decoding error: {0}")]
    Decode(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Timeout => true,
            Self::Decode(_) | Self::InvalidUrl(_) => false,
        }
    }
}

/// Something that can fetch a declared feed
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch `feed`, passing the validators remembered from the previous
    /// response so unchanged feeds can answer [`FetchOutcome::NotModified`]
    async fn fetch(
        &self,
        feed: &FeedDecl,
        validators: &CacheValidators,
    ) -> Result<FetchOutcome, FetchError>;
}

// ============================================================================
// JSON Feed Source
// ============================================================================

#[derive(Debug, Deserialize)]
struct JsonFeedDocument {
    #[serde(default)]
    items: Vec<JsonFeedItem>,
}

#[derive(Debug, Deserialize)]
struct JsonFeedItem {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    content_text: Option<String>,
    #[serde(default)]
    date_published: Option<String>,
}

impl From<JsonFeedItem> for FeedItem {
    fn from(item: JsonFeedItem) -> Self {
        let guid = match item.id {
            Some(serde_json::Value::String(s)) => s,
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        let published = item
            .date_published
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));

        Self {
            guid,
            link: item.url.unwrap_or_default(),
            title: item.title.unwrap_or_default(),
            published,
            summary: item.summary.or(item.content_text).unwrap_or_default(),
        }
    }
}

/// HTTP source for JSON Feed documents
pub struct JsonFeedSource {
    client: Client,
}

impl JsonFeedSource {
    /// Create a source with the given request timeout and user agent
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be created
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }

    /// Parse a JSON Feed body
    pub fn parse(body: &[u8]) -> Result<Vec<FeedItem>, FetchError> {
        let doc: JsonFeedDocument =
            serde_json::from_slice(body).map_err(|e| FetchError::Decode(e.to_string()))?;
        Ok(doc.items.into_iter().map(FeedItem::from).collect())
    }
}

#[async_trait]
impl FeedSource for JsonFeedSource {
    async fn fetch(
        &self,
        feed: &FeedDecl,
        validators: &CacheValidators,
    ) -> Result<FetchOutcome, FetchError> {
        let url = url::Url::parse(&feed.url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

        let mut request = self
            .client
            .get(url)
            .header(header::ACCEPT, "application/feed+json, application/json");
        if let Some(etag) = &validators.etag {
            request = request.header(header::IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = &validators.last_modified {
            request = request.header(header::IF_MODIFIED_SINCE, last_modified);
        }

        let response = request
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Http(e)
                }
            })?;

        let status = response.status();
        tracing::debug!(feed = %feed.url, status = status.as_u16(), "Fetched feed");

        if status == StatusCode::NOT_MODIFIED {
            return Ok(FetchOutcome::NotModified);
        }
        if status != StatusCode::OK {
            let body = response.bytes().await.unwrap_or_default();
            let end = body.len().min(ERROR_BODY_LIMIT);
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body[..end]).into_owned(),
            });
        }

        let header_value = |name: header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let validators = CacheValidators {
            etag: header_value(header::ETAG),
            last_modified: header_value(header::LAST_MODIFIED),
        };

        let body = response.bytes().await?;
        Ok(FetchOutcome::Items {
            items: Self::parse(&body)?,
            validators,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_feed() {
        let body = br#"{
            "version": "https://jsonfeed.org/version/1.1",
            "title": "Example",
            "items": [
                {"id": "1", "url": "https://e.com/1", "title": "One",
                 "date_published": "2024-05-01T10:00:00+02:00", "content_text": "text"},
                {"id": 2, "url": "https://e.com/2"},
                {"url": "https://e.com/3", "date_published": "yesterday"}
            ]
        }"#;

        let items = JsonFeedSource::parse(body).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].guid, "1");
        assert_eq!(items[0].summary, "text");
        assert_eq!(
            items[0].published.unwrap().to_rfc3339(),
            "2024-05-01T08:00:00+00:00"
        );
        assert_eq!(items[1].guid, "2");
        assert_eq!(items[2].key(), "https://e.com/3");
        assert!(items[2].published.is_none());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            JsonFeedSource::parse(b"<rss/>"),
            Err(FetchError::Decode(_))
        ));
    }

    #[test]
    fn test_status_error_message() {
        let err = FetchError::Status {
            status: 503,
            body: "down".into(),
        };
        assert_eq!(err.to_string(), "want 200, got 503: down");
        assert!(err.is_recoverable());
    }
}
