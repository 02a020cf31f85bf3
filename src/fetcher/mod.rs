//! The Run: fetch every declared feed once
//!
//! A run holds the run-lock for its whole duration, so the admin surface
//! refuses config writes while it is in progress. Steps:
//!
//! 1. Load config, state and error template through a [`Store`]
//! 2. Compile the config into feed declarations
//! 3. Fetch feeds concurrently (shuffled), apply dedup, deliver new items
//! 4. Save the state and write one immutable statistics record
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use feedwarden::fetcher::{Fetcher, JsonFeedSource, LogNotifier};
//! use feedwarden::script::ScriptCompiler;
//! use feedwarden::storage::{LocalStore, StateDir};
//!
//! # async fn example() -> feedwarden::Result<()> {
//! let dir = StateDir::new("/var/lib/feedwarden");
//! let compiler = Arc::new(ScriptCompiler::new());
//! let store = Arc::new(LocalStore::new(dir.clone(), compiler.clone()));
//! let source = Arc::new(JsonFeedSource::new(Duration::from_secs(30), feedwarden::USER_AGENT)?);
//!
//! let fetcher = Fetcher::new(&dir, store, compiler, source, Arc::new(LogNotifier));
//! let stats = fetcher.run().await?;
//! println!("{} feeds, {} failed", stats.total_feeds, stats.failed_feeds);
//! # Ok(())
//! # }
//! ```

pub mod dedup;
pub mod notify;
pub mod source;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use rand::seq::SliceRandom;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::models::{FeedItem, FetchOutcome};
use crate::script::{ConfigCompiler, FeedDecl};
use crate::storage::template::{self, DEFAULT_ERROR_TEMPLATE};
use crate::storage::{FeedState, RunLock, RunStats, StateDir, StateMap, StatsAggregator, Store};

pub use dedup::DedupWindows;
pub use notify::{LogNotifier, Notifier, NotifyError, WebhookConfig, WebhookNotifier};
pub use source::{FeedSource, FetchError, JsonFeedSource};

/// Consecutive failures after which a feed is disabled
pub const DEFAULT_ERROR_THRESHOLD: u32 = 12;

/// Feeds fetched at the same time
pub const DEFAULT_CONCURRENCY: usize = 10;

const RUN_LOCK_OWNER: &str = "run";
const REENABLE_LOCK_OWNER: &str = "reenable";

// ============================================================================
// Settings
// ============================================================================

/// Run tuning
#[derive(Debug, Clone)]
pub struct FetcherSettings {
    pub concurrency: usize,
    /// 0 never disables a feed
    pub error_threshold: u32,
    pub windows: DedupWindows,
    /// Randomize feed order so the same hosts are not always hit first
    pub shuffle: bool,
}

impl Default for FetcherSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            windows: DedupWindows::default(),
            shuffle: true,
        }
    }
}

/// A declared feed and what the state knows about it
#[derive(Debug, Clone, Serialize)]
pub struct FeedStatus {
    pub url: String,
    pub title: String,
    pub digest: bool,
    pub always_send_new_items: bool,
    /// `None` until the first run sees the feed
    pub state: Option<FeedState>,
}

// ============================================================================
// Fetcher
// ============================================================================

/// Shared between the feeds of one run
struct RunContext {
    state: Mutex<StateMap>,
    stats: Mutex<RunStats>,
    error_template: String,
}

/// Executes runs against a [`Store`]
pub struct Fetcher {
    store: Arc<dyn Store>,
    lock: RunLock,
    stats: StatsAggregator,
    compiler: Arc<dyn ConfigCompiler>,
    source: Arc<dyn FeedSource>,
    notifier: Arc<dyn Notifier>,
    settings: FetcherSettings,
}

impl Fetcher {
    /// The run-lock and the statistics records always live in `dir`, even
    /// when `store` is remote.
    pub fn new(
        dir: &StateDir,
        store: Arc<dyn Store>,
        compiler: Arc<dyn ConfigCompiler>,
        source: Arc<dyn FeedSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            lock: dir.run_lock(),
            stats: StatsAggregator::new(dir.clone()),
            compiler,
            source,
            notifier,
            settings: FetcherSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: FetcherSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &FetcherSettings {
        &self.settings
    }

    /// Execute one run.
    ///
    /// Fails with a conflict if another run holds the run-lock. A run that
    /// fails after acquiring the lock sends an error notification and
    /// releases the lock before returning.
    pub async fn run(&self) -> Result<RunStats> {
        let mut guard = self.lock.try_acquire(RUN_LOCK_OWNER)?;
        tracing::info!(lock = %guard.path().display(), "Run started");

        let result = self.run_locked().await;
        if let Err(err) = &result {
            tracing::error!(error = %err, "Run failed");
            let template = self.error_template().await;
            self.notify_error(&template, &err.to_string()).await;
        }

        let released = guard.release();
        let stats = result?;
        released?;
        Ok(stats)
    }

    async fn run_locked(&self) -> Result<RunStats> {
        let started = Utc::now();
        let snapshot = self.store.load_snapshot().await?;
        let config = self.compiler.compile(&snapshot.config)?;

        let mut feeds = config.feeds;
        if self.settings.shuffle {
            feeds.shuffle(&mut rand::thread_rng());
        }

        let mut stats = RunStats::new(started);
        stats.total_feeds = feeds.len() as u64;
        let ctx = RunContext {
            state: Mutex::new(snapshot.state),
            stats: Mutex::new(stats),
            error_template: snapshot.error_template,
        };

        let tasks: Vec<_> = feeds
            .iter()
            .map(|feed| self.process_feed(feed, &ctx))
            .collect();
        stream::iter(tasks)
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect::<Vec<()>>()
            .await;

        let state = ctx.state.into_inner();
        let mut stats = ctx.stats.into_inner();

        stats.seen_items_entries_total = state.values().map(|s| s.seen_len() as u64).sum();
        stats.state_bytes_written = self.store.save_state(&state).await? as u64;
        stats.memory_usage = resident_memory_bytes();
        stats.finish(Utc::now());

        let record = self.stats.write(&stats).await?;
        tracing::info!(
            feeds = stats.total_feeds,
            success = stats.success_feeds,
            failed = stats.failed_feeds,
            not_modified = stats.not_modified_feeds,
            sent = stats.messages_sent,
            duration_ms = stats.duration.as_millis() as u64,
            record = %record.display(),
            "Run finished"
        );
        Ok(stats)
    }

    async fn process_feed(&self, feed: &FeedDecl, ctx: &RunContext) {
        let now = Utc::now();

        // Work on a copy so the map is not locked across the fetch.
        let (mut record, first_fetch) = {
            let mut state = ctx.state.lock().await;
            match state.get(&feed.url) {
                Some(record) => (record.clone(), false),
                None => {
                    tracing::debug!(feed = %feed.url, "Initializing state");
                    let record = FeedState::new(now);
                    state.insert(feed.url.clone(), record.clone());
                    (record, true)
                }
            }
        };

        if record.disabled {
            tracing::debug!(feed = %feed.url, "Skipping disabled feed");
            ctx.stats.lock().await.disabled_feeds += 1;
            return;
        }

        let started = Instant::now();
        let outcome = self.source.fetch(feed, &record.validators()).await;
        ctx.stats
            .lock()
            .await
            .record_fetch(&feed.url, started.elapsed(), outcome.is_ok());

        match outcome {
            Ok(FetchOutcome::NotModified) => {
                tracing::debug!(feed = %feed.url, "Feed not modified");
                record.mark_not_modified(Utc::now());
                ctx.stats.lock().await.not_modified_feeds += 1;
            }
            Ok(FetchOutcome::Items { items, validators }) => {
                let fetched_at = Utc::now();
                let parsed = items.len() as u64;
                record.set_validators(&validators);

                let selection = dedup::select(
                    feed,
                    &mut record,
                    items,
                    first_fetch,
                    fetched_at,
                    self.settings.windows,
                );
                record.mark_fetch_success(fetched_at);

                {
                    let mut stats = ctx.stats.lock().await;
                    stats.success_feeds += 1;
                    stats.total_items_parsed += parsed;
                    stats.items_seen_total += selection.examined;
                    stats.items_deduped_total += selection.deduped;
                    stats.items_skipped_old_total += selection.skipped_old;
                    stats.items_enqueued_total += selection.accepted.len() as u64;
                    stats.seen_items_pruned_total += selection.pruned;
                }

                tracing::debug!(
                    feed = %feed.url,
                    parsed,
                    accepted = selection.accepted.len(),
                    "Feed fetched"
                );
                self.deliver(feed, selection.accepted, ctx).await;
            }
            Err(err) => {
                let message = err.to_string();
                tracing::debug!(feed = %feed.url, error = %message, "Fetch failed");
                ctx.stats.lock().await.failed_feeds += 1;

                if record.mark_fetch_failure(&message, self.settings.error_threshold) {
                    let report = disabled_report(&feed.url, record.error_count, &message);
                    tracing::warn!(feed = %feed.url, errors = record.error_count, "Feed disabled");
                    ctx.stats.lock().await.disabled_feeds += 1;
                    self.notify_error(&ctx.error_template, &report).await;
                }
            }
        }

        ctx.state.lock().await.insert(feed.url.clone(), record);
    }

    async fn deliver(&self, feed: &FeedDecl, items: Vec<FeedItem>, ctx: &RunContext) {
        if items.is_empty() {
            return;
        }

        if feed.digest {
            let started = Instant::now();
            let result = self.notifier.send_digest(feed, &items).await;
            self.record_send(feed, started, result, ctx).await;
            return;
        }

        for item in &items {
            let started = Instant::now();
            let result = self.notifier.send_item(feed, item).await;
            self.record_send(feed, started, result, ctx).await;
        }
    }

    async fn record_send(
        &self,
        feed: &FeedDecl,
        started: Instant,
        result: std::result::Result<(), NotifyError>,
        ctx: &RunContext,
    ) {
        if let Err(err) = &result {
            tracing::warn!(
                feed = %feed.url,
                notifier = self.notifier.name(),
                error = %err,
                "Failed to deliver update"
            );
        }
        ctx.stats
            .lock()
            .await
            .record_send(&feed.url, started.elapsed(), result.is_ok());
    }

    async fn error_template(&self) -> String {
        match self.store.load_error_template().await {
            Ok(template) => template,
            Err(err) => {
                tracing::warn!(error = %err, "Falling back to default error template");
                DEFAULT_ERROR_TEMPLATE.to_string()
            }
        }
    }

    async fn notify_error(&self, template: &str, message: &str) {
        let rendered = template::render(template, message);
        if let Err(err) = self.notifier.send_error(&rendered).await {
            tracing::warn!(notifier = self.notifier.name(), error = %err, "Failed to send error notification");
        }
    }

    /// Clear the disabled flag and failure streak of `url`.
    ///
    /// Runs under the run-lock so it cannot be lost to a concurrent run.
    pub async fn reenable(&self, url: &str) -> Result<()> {
        let mut guard = self.lock.try_acquire(REENABLE_LOCK_OWNER)?;

        let mut state = self.store.load_state().await?;
        let record = state
            .get_mut(url)
            .ok_or_else(|| Error::not_found(format!("feed {url:?} not found in state")))?;
        record.reenable();
        self.store.save_state(&state).await?;

        guard.release()?;
        tracing::info!(feed = %url, "Feed reenabled");
        Ok(())
    }

    /// Declared feeds, in declaration order, with their state
    pub async fn list_feeds(&self) -> Result<Vec<FeedStatus>> {
        let config = self.store.load_config().await?;
        let mut state = self.store.load_state().await?;
        let parsed = self.compiler.compile(&config)?;

        Ok(parsed
            .feeds
            .into_iter()
            .map(|feed| FeedStatus {
                state: state.remove(&feed.url),
                title: feed.title,
                digest: feed.digest,
                always_send_new_items: feed.always_send_new_items,
                url: feed.url,
            })
            .collect())
    }
}

fn disabled_report(url: &str, attempts: u32, error: &str) -> String {
    format!(
        "fetching feed {url:?} failed after {attempts} previous attempts: {error}; \
         feed was disabled, to reenable it run 'feedwarden reenable {url:?}'"
    )
}

/// Resident set size of this process, 0 where unavailable
fn resident_memory_bytes() -> u64 {
    std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| parse_vm_rss(&status))
        .unwrap_or(0)
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kib: u64 = line
        .trim_start_matches("VmRSS:")
        .split_whitespace()
        .next()?
        .parse()
        .ok()?;
    Some(kib * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_report() {
        let report = disabled_report("https://e.com/feed", 12, "want 200, got 500: oops");
        assert_eq!(
            report,
            "fetching feed \"https://e.com/feed\" failed after 12 previous attempts: \
             want 200, got 500: oops; feed was disabled, to reenable it run \
             'feedwarden reenable \"https://e.com/feed\"'"
        );
    }

    #[test]
    fn test_parse_vm_rss() {
        let status = "Name:\tfeedwarden\nVmPeak:\t  9000 kB\nVmRSS:\t    1234 kB\nThreads:\t4\n";
        assert_eq!(parse_vm_rss(status), Some(1234 * 1024));
        assert_eq!(parse_vm_rss("Name:\tx\n"), None);
    }

    #[test]
    fn test_default_settings() {
        let settings = FetcherSettings::default();
        assert_eq!(settings.concurrency, 10);
        assert_eq!(settings.error_threshold, 12);
        assert!(settings.shuffle);
    }
}
