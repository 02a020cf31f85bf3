//! Data models shared by feed sources, the run and notifiers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of a fetched feed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    /// Stable identifier assigned by the publisher, if any
    #[serde(default)]
    pub guid: String,

    #[serde(default)]
    pub link: String,

    #[serde(default)]
    pub title: String,

    /// Publication time, when the feed provides one
    #[serde(default)]
    pub published: Option<DateTime<Utc>>,

    #[serde(default)]
    pub summary: String,
}

impl FeedItem {
    /// Dedup key: the guid, falling back to the link
    pub fn key(&self) -> &str {
        if self.guid.is_empty() {
            &self.link
        } else {
            &self.guid
        }
    }
}

/// HTTP cache validators carried between fetches of a feed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheValidators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Result of a successful fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The source reports nothing changed since the last fetch
    NotModified,

    /// Items currently published by the feed
    Items {
        items: Vec<FeedItem>,
        validators: CacheValidators,
    },
}

impl FetchOutcome {
    /// Outcome with items and no cache validators
    pub fn items(items: Vec<FeedItem>) -> Self {
        Self::Items {
            items,
            validators: CacheValidators::default(),
        }
    }

    pub fn item_count(&self) -> usize {
        match self {
            Self::NotModified => 0,
            Self::Items { items, .. } => items.len(),
        }
    }
}
