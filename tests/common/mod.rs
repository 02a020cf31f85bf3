//! Common test utilities

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tower::ServiceExt;

use feedwarden::admin::{create_router, AppState};
use feedwarden::fetcher::{FeedSource, FetchError, Notifier, NotifyError};
use feedwarden::models::{CacheValidators, FeedItem, FetchOutcome};
use feedwarden::script::{FeedDecl, ScriptCompiler};
use feedwarden::storage::StateDir;

/// Fresh, initialized state directory
pub fn state_dir() -> (TempDir, StateDir) {
    let tmp = TempDir::new().unwrap();
    let dir = StateDir::new(tmp.path());
    dir.init().unwrap();
    (tmp, dir)
}

/// Admin router over `dir`
pub fn router(dir: &StateDir) -> Router {
    create_router(AppState::new(dir.clone(), Arc::new(ScriptCompiler::new())))
}

/// Response parts of a oneshot request
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn text(&self) -> String {
        String::from_utf8(self.body.clone()).unwrap()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn header(&self, name: &str) -> &str {
        self.headers.get(name).unwrap().to_str().unwrap()
    }
}

pub async fn send(router: &Router, method: Method, uri: &str, body: impl Into<Body>) -> Reply {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(body.into())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec();
    Reply {
        status,
        headers,
        body,
    }
}

pub async fn get(router: &Router, uri: &str) -> Reply {
    send(router, Method::GET, uri, Body::empty()).await
}

pub async fn put(router: &Router, uri: &str, body: impl Into<Body>) -> Reply {
    send(router, Method::PUT, uri, body).await
}

/// Feed item published `published` (if any)
pub fn item(guid: &str, published: Option<DateTime<Utc>>) -> FeedItem {
    FeedItem {
        guid: guid.to_string(),
        link: format!("https://example.com/{guid}"),
        title: format!("Item {guid}"),
        published,
        summary: String::new(),
    }
}

// ============================================================================
// Fake Feed Source
// ============================================================================

/// Canned answer for one feed URL
#[derive(Debug, Clone)]
pub enum Canned {
    Items(Vec<FeedItem>),
    NotModified,
    Status(u16),
}

/// Feed source answering from a table, recording the validators it gets
#[derive(Default)]
pub struct FakeSource {
    replies: Mutex<HashMap<String, Canned>>,
    pub calls: Mutex<Vec<(String, CacheValidators)>>,
    gate: Option<(Arc<tokio::sync::Notify>, Arc<tokio::sync::Notify>)>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch signals `entered`, then waits for `release`
    pub fn gated(entered: Arc<tokio::sync::Notify>, release: Arc<tokio::sync::Notify>) -> Self {
        Self {
            gate: Some((entered, release)),
            ..Self::default()
        }
    }

    pub fn set(&self, url: &str, reply: Canned) {
        self.replies.lock().unwrap().insert(url.to_string(), reply);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl FeedSource for FakeSource {
    async fn fetch(
        &self,
        feed: &FeedDecl,
        validators: &CacheValidators,
    ) -> Result<FetchOutcome, FetchError> {
        self.calls
            .lock()
            .unwrap()
            .push((feed.url.clone(), validators.clone()));

        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }

        let reply = self.replies.lock().unwrap().get(&feed.url).cloned();
        match reply {
            Some(Canned::Items(items)) => Ok(FetchOutcome::Items {
                items,
                validators: CacheValidators {
                    etag: Some("\"v1\"".to_string()),
                    last_modified: None,
                },
            }),
            Some(Canned::NotModified) => Ok(FetchOutcome::NotModified),
            Some(Canned::Status(status)) => Err(FetchError::Status {
                status,
                body: "unavailable".to_string(),
            }),
            None => Ok(FetchOutcome::items(Vec::new())),
        }
    }
}

// ============================================================================
// Recording Notifier
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Item { feed: String, key: String },
    Digest { feed: String, keys: Vec<String> },
    Error(String),
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Sent>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn item_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Item { key, .. } => Some(key),
                _ => None,
            })
            .collect();
        keys.sort();
        keys
    }

    pub fn errors(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Error(message) => Some(message),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send_item(&self, feed: &FeedDecl, item: &FeedItem) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(Sent::Item {
            feed: feed.url.clone(),
            key: item.key().to_string(),
        });
        Ok(())
    }

    async fn send_digest(&self, feed: &FeedDecl, items: &[FeedItem]) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(Sent::Digest {
            feed: feed.url.clone(),
            keys: items.iter().map(|i| i.key().to_string()).collect(),
        });
        Ok(())
    }

    async fn send_error(&self, message: &str) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Error(message.to_string()));
        Ok(())
    }
}
