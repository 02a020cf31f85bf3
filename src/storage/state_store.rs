//! State Store: per-feed dedup records
//!
//! `state.json` maps each feed URL to a [`FeedState`]. The admin surface
//! reads and writes the raw document; runs go through the typed
//! [`StateStore::load`] / [`StateStore::save`] pair.

use std::collections::BTreeMap;
use std::io;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::CacheValidators;

use super::atomic;
use super::error::StoreError;
use super::layout::StateDir;

/// Document served when nothing is stored
pub const EMPTY_STATE: &[u8] = b"{}";

/// State document: feed URL to record
pub type StateMap = BTreeMap<String, FeedState>;

// ============================================================================
// Feed State
// ============================================================================

/// Dedup cursor and health counters of one feed
///
/// Every field defaults, so `{}` is a valid record. Unknown fields are
/// ignored when reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedState {
    /// Fetching stopped after too many consecutive failures
    pub disabled: bool,

    /// Items published before this instant are treated as already sent
    pub last_updated: DateTime<Utc>,

    /// `Last-Modified` of the previous response, sent back as `If-Modified-Since`
    #[serde(skip_serializing_if = "String::is_empty")]
    pub last_modified: String,

    /// `ETag` of the previous response, sent back as `If-None-Match`
    #[serde(skip_serializing_if = "String::is_empty")]
    pub etag: String,

    /// Consecutive failures
    #[serde(skip_serializing_if = "is_zero")]
    pub error_count: u32,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub last_error: String,

    /// Item key to first-seen time, for feeds that send every new item
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seen_items: Option<BTreeMap<String, DateTime<Utc>>>,

    pub fetch_count: u64,
    pub fetch_fail_count: u64,
}

impl Default for FeedState {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::default())
    }
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl FeedState {
    /// Record for a feed first seen at `now`
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            disabled: false,
            last_updated: now,
            last_modified: String::new(),
            etag: String::new(),
            error_count: 0,
            last_error: String::new(),
            seen_items: None,
            fetch_count: 0,
            fetch_fail_count: 0,
        }
    }

    /// Successful fetch: reset the failure streak and advance the cursor
    pub fn mark_fetch_success(&mut self, now: DateTime<Utc>) {
        self.fetch_count += 1;
        self.error_count = 0;
        self.last_error.clear();
        self.last_updated = now;
    }

    /// Remember the cache validators of the latest response
    pub fn set_validators(&mut self, validators: &CacheValidators) {
        self.etag = validators.etag.clone().unwrap_or_default();
        if let Some(last_modified) = &validators.last_modified {
            self.last_modified.clone_from(last_modified);
        }
    }

    /// Validators to send with the next request
    pub fn validators(&self) -> CacheValidators {
        CacheValidators {
            etag: (!self.etag.is_empty()).then(|| self.etag.clone()),
            last_modified: (!self.last_modified.is_empty()).then(|| self.last_modified.clone()),
        }
    }

    /// Source reported no changes: clear the failure streak, advance the cursor
    pub fn mark_not_modified(&mut self, now: DateTime<Utc>) {
        self.error_count = 0;
        self.last_error.clear();
        self.last_updated = now;
    }

    /// Failed fetch. Returns `true` when this failure disabled the feed.
    pub fn mark_fetch_failure(&mut self, error: &str, threshold: u32) -> bool {
        self.fetch_fail_count += 1;
        self.error_count += 1;
        self.last_error = error.to_string();

        if !self.disabled && threshold > 0 && self.error_count >= threshold {
            self.disabled = true;
            return true;
        }
        false
    }

    /// Clear the disabled flag and the failure streak
    pub fn reenable(&mut self) {
        self.disabled = false;
        self.error_count = 0;
        self.last_error.clear();
    }

    /// Make sure the seen-set exists and drop entries older than `cleanup`.
    ///
    /// Returns whether the set was just created, and how many entries were
    /// pruned.
    pub fn prepare_seen_items(&mut self, now: DateTime<Utc>, cleanup: Duration) -> (bool, usize) {
        let created = self.seen_items.is_none();
        let seen = self.seen_items.get_or_insert_with(BTreeMap::new);

        let cutoff = now - cleanup;
        let before = seen.len();
        seen.retain(|_, first_seen| *first_seen >= cutoff);
        (created, before - seen.len())
    }

    pub fn is_seen(&self, key: &str) -> bool {
        self.seen_items
            .as_ref()
            .is_some_and(|seen| seen.contains_key(key))
    }

    pub fn mark_seen(&mut self, key: &str, now: DateTime<Utc>) {
        self.seen_items
            .get_or_insert_with(BTreeMap::new)
            .entry(key.to_string())
            .or_insert(now);
    }

    pub fn seen_len(&self) -> usize {
        self.seen_items.as_ref().map_or(0, BTreeMap::len)
    }
}

// ============================================================================
// State Store
// ============================================================================

/// Storage of `state.json`
///
/// Writes are not serialized against runs: the run-lock is not consulted,
/// so an edit made during a run is overwritten when the run saves.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: StateDir,
}

impl StateStore {
    pub fn new(dir: StateDir) -> Self {
        Self { dir }
    }

    /// Stored document verbatim, `{}` when absent or empty
    pub async fn get(&self) -> Result<Vec<u8>, StoreError> {
        match tokio::fs::read(self.dir.state_path()).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(EMPTY_STATE.to_vec()),
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(EMPTY_STATE.to_vec()),
            Err(err) => Err(StoreError::io("read state", err)),
        }
    }

    /// Validate and store a raw document exactly as supplied
    pub async fn put(&self, body: &[u8]) -> Result<(), StoreError> {
        let map = validate(body)?;

        atomic::replace(&self.dir.state_path(), body)
            .await
            .map_err(|e| StoreError::io("write state", e))?;

        tracing::info!(feeds = map.len(), "State replaced");
        Ok(())
    }

    /// Typed view of the stored document
    pub async fn load(&self) -> Result<StateMap, StoreError> {
        let bytes = self.get().await?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::json("parse state", e))
    }

    /// Persist `state`; returns the number of bytes written
    pub async fn save(&self, state: &StateMap) -> Result<usize, StoreError> {
        let bytes =
            serde_json::to_vec_pretty(state).map_err(|e| StoreError::json("encode state", e))?;

        atomic::replace(&self.dir.state_path(), &bytes)
            .await
            .map_err(|e| StoreError::io("write state", e))?;

        tracing::debug!(feeds = state.len(), bytes = bytes.len(), "State saved");
        Ok(bytes.len())
    }
}

/// Check a raw state document: a JSON object whose values are feed records
pub fn validate(body: &[u8]) -> Result<StateMap, StoreError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| StoreError::InvalidState(e.to_string()))?;

    let serde_json::Value::Object(entries) = value else {
        return Err(StoreError::InvalidState(
            "state must be a JSON object".to_string(),
        ));
    };

    if let Some((key, _)) = entries.iter().find(|(_, v)| !v.is_object()) {
        return Err(StoreError::InvalidState(format!(
            "state entry {key:?} must be an object"
        )));
    }

    serde_json::from_value(serde_json::Value::Object(entries))
        .map_err(|e| StoreError::InvalidState(e.to_string()))
}
