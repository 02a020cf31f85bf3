//! Run statistics and the Stats Aggregator
//!
//! Each completed run leaves one immutable JSON record under
//! `<state_dir>/stats/`. The aggregator only ever reads closed records: a
//! record is written to a temporary name and linked into place, and files
//! that are not `*.json` (temporaries included) are ignored.
//!
//! Durations are stored as integer nanoseconds so records stay readable by
//! any tool that already consumes them.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::atomic;
use super::error::StoreError;
use super::layout::StateDir;

/// Size of the top-N feed lists
pub const TOP_FEED_COUNT: usize = 5;

/// Records returned by [`StatsAggregator::list`] at most
pub const LIST_LIMIT: usize = 100;

pub const CSV_HEADER: [&str; 10] = [
    "StartTime",
    "Duration",
    "TotalFeeds",
    "SuccessFeeds",
    "FailedFeeds",
    "NotModifiedFeeds",
    "TotalItemsParsed",
    "TotalFetchTime",
    "AvgFetchTime",
    "MemoryUsage (Bytes)",
];

// ============================================================================
// Record Types
// ============================================================================

/// Statistics of one run
///
/// Only `start_time` is required when reading; every other field defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub start_time: DateTime<Utc>,

    #[serde(default, with = "duration_nanos")]
    pub duration: Duration,

    #[serde(default)]
    pub total_feeds: u64,
    #[serde(default)]
    pub success_feeds: u64,
    #[serde(default)]
    pub failed_feeds: u64,
    #[serde(default)]
    pub not_modified_feeds: u64,
    #[serde(default)]
    pub disabled_feeds: u64,
    #[serde(default)]
    pub total_items_parsed: u64,

    #[serde(default, with = "duration_nanos")]
    pub total_fetch_time: Duration,
    #[serde(default, with = "duration_nanos")]
    pub avg_fetch_time: Duration,
    #[serde(default)]
    pub fetch_latency_ms: PercentileStats,
    #[serde(default)]
    pub send_latency_ms: PercentileStats,

    #[serde(default)]
    pub items_seen_total: u64,
    #[serde(default)]
    pub items_deduped_total: u64,
    #[serde(default)]
    pub items_skipped_old_total: u64,
    #[serde(default)]
    pub items_enqueued_total: u64,

    #[serde(default)]
    pub messages_attempted: u64,
    #[serde(default)]
    pub messages_sent: u64,
    #[serde(default)]
    pub messages_failed: u64,

    #[serde(default)]
    pub seen_items_entries_total: u64,
    #[serde(default)]
    pub seen_items_pruned_total: u64,
    #[serde(default)]
    pub state_bytes_written: u64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_slowest_feeds: Vec<FeedSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_error_feeds: Vec<FeedSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_new_item_feeds: Vec<FeedSummary>,

    /// Resident memory at the end of the run
    #[serde(default)]
    pub memory_usage: u64,

    #[serde(skip)]
    fetch_samples: Vec<Duration>,
    #[serde(skip)]
    send_samples: Vec<Duration>,
    #[serde(skip)]
    per_feed: HashMap<String, FeedSummary>,
}

/// Latency distribution in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PercentileStats {
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub max: u64,
}

impl PercentileStats {
    /// Nearest-rank percentiles over `samples`
    pub fn from_samples(samples: &[Duration]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut ms: Vec<u64> = samples
            .iter()
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .collect();
        ms.sort_unstable();

        Self {
            p50: percentile(&ms, 0.50),
            p90: percentile(&ms, 0.90),
            p99: percentile(&ms, 0.99),
            max: ms[ms.len() - 1],
        }
    }
}

fn percentile(sorted: &[u64], p: f64) -> u64 {
    let rank = (p * sorted.len() as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted[idx]
}

/// Per-feed numbers used for the top-N lists
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSummary {
    pub url: String,
    #[serde(default, with = "duration_nanos")]
    pub fetch_duration: Duration,
    #[serde(default)]
    pub failures: u64,
    #[serde(default)]
    pub items_enqueued: u64,
}

impl RunStats {
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            duration: Duration::ZERO,
            total_feeds: 0,
            success_feeds: 0,
            failed_feeds: 0,
            not_modified_feeds: 0,
            disabled_feeds: 0,
            total_items_parsed: 0,
            total_fetch_time: Duration::ZERO,
            avg_fetch_time: Duration::ZERO,
            fetch_latency_ms: PercentileStats::default(),
            send_latency_ms: PercentileStats::default(),
            items_seen_total: 0,
            items_deduped_total: 0,
            items_skipped_old_total: 0,
            items_enqueued_total: 0,
            messages_attempted: 0,
            messages_sent: 0,
            messages_failed: 0,
            seen_items_entries_total: 0,
            seen_items_pruned_total: 0,
            state_bytes_written: 0,
            top_slowest_feeds: Vec::new(),
            top_error_feeds: Vec::new(),
            top_new_item_feeds: Vec::new(),
            memory_usage: 0,
            fetch_samples: Vec::new(),
            send_samples: Vec::new(),
            per_feed: HashMap::new(),
        }
    }

    /// Count a fetch attempt of `url` that took `elapsed`
    pub fn record_fetch(&mut self, url: &str, elapsed: Duration, ok: bool) {
        self.total_fetch_time += elapsed;
        self.fetch_samples.push(elapsed);

        let feed = self.feed_mut(url);
        feed.fetch_duration += elapsed;
        if !ok {
            feed.failures += 1;
        }
    }

    /// Count a delivery attempt
    pub fn record_send(&mut self, url: &str, elapsed: Duration, ok: bool) {
        self.messages_attempted += 1;
        self.send_samples.push(elapsed);
        if ok {
            self.messages_sent += 1;
            self.feed_mut(url).items_enqueued += 1;
        } else {
            self.messages_failed += 1;
        }
    }

    fn feed_mut(&mut self, url: &str) -> &mut FeedSummary {
        self.per_feed
            .entry(url.to_string())
            .or_insert_with(|| FeedSummary {
                url: url.to_string(),
                ..FeedSummary::default()
            })
    }

    /// Close the record: derived timings, percentiles and top lists
    pub fn finish(&mut self, end: DateTime<Utc>) {
        self.duration = (end - self.start_time).to_std().unwrap_or(Duration::ZERO);

        let fetches = u32::try_from(self.fetch_samples.len()).unwrap_or(u32::MAX);
        self.avg_fetch_time = if fetches == 0 {
            Duration::ZERO
        } else {
            self.total_fetch_time / fetches
        };
        self.fetch_latency_ms = PercentileStats::from_samples(&self.fetch_samples);
        self.send_latency_ms = PercentileStats::from_samples(&self.send_samples);

        let feeds: Vec<&FeedSummary> = self.per_feed.values().collect();
        self.top_slowest_feeds = top_by(&feeds, |f| f.fetch_duration.as_nanos(), |_| true);
        self.top_error_feeds = top_by(&feeds, |f| u128::from(f.failures), |f| f.failures > 0);
        self.top_new_item_feeds =
            top_by(&feeds, |f| u128::from(f.items_enqueued), |f| f.items_enqueued > 0);
    }
}

fn top_by(
    feeds: &[&FeedSummary],
    key: impl Fn(&FeedSummary) -> u128,
    keep: impl Fn(&FeedSummary) -> bool,
) -> Vec<FeedSummary> {
    let mut ranked: Vec<&FeedSummary> = feeds.iter().copied().filter(|f| keep(f)).collect();
    // ties broken by URL for stable output
    ranked.sort_by(|a, b| key(b).cmp(&key(a)).then_with(|| a.url.cmp(&b.url)));
    ranked.into_iter().take(TOP_FEED_COUNT).cloned().collect()
}

// ============================================================================
// Aggregator
// ============================================================================

/// Reader and writer of the per-run records
#[derive(Debug, Clone)]
pub struct StatsAggregator {
    dir: StateDir,
}

/// A parsed record along with its raw JSON
#[derive(Debug, Clone)]
pub struct StatsEntry {
    pub name: String,
    pub stats: RunStats,
    pub raw: serde_json::Value,
}

impl StatsAggregator {
    pub fn new(dir: StateDir) -> Self {
        Self { dir }
    }

    /// All closed records, newest start time first.
    ///
    /// Fails with [`StoreError::NoStats`] when there are none; a record
    /// that cannot be read or parsed fails the whole call.
    pub async fn read_all(&self) -> Result<Vec<StatsEntry>, StoreError> {
        let stats_dir = self.dir.stats_dir();
        let mut entries = match tokio::fs::read_dir(&stats_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(StoreError::NoStats),
            Err(err) => return Err(StoreError::io("read stats directory", err)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io("read stats directory", e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| StoreError::io("read stats directory", e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if file_type.is_file() && is_record_name(&name) {
                names.push(name);
            }
        }
        names.sort();

        let mut records = Vec::with_capacity(names.len());
        for name in names {
            let path = stats_dir.join(&name);
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| StoreError::io(format!("read stats file {}", path.display()), e))?;
            let raw: serde_json::Value = serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::json(format!("parse stats file {}", path.display()), e))?;
            let stats: RunStats = serde_json::from_value(raw.clone())
                .map_err(|e| StoreError::json(format!("parse stats file {}", path.display()), e))?;
            records.push(StatsEntry { name, stats, raw });
        }

        if records.is_empty() {
            return Err(StoreError::NoStats);
        }

        records.sort_by(|a, b| b.stats.start_time.cmp(&a.stats.start_time));
        Ok(records)
    }

    /// Raw records, newest first, at most [`LIST_LIMIT`]
    pub async fn list(&self) -> Result<Vec<serde_json::Value>, StoreError> {
        let records = self.read_all().await?;
        Ok(records
            .into_iter()
            .take(LIST_LIMIT)
            .map(|entry| entry.raw)
            .collect())
    }

    /// All records as CSV, newest first
    pub async fn export(&self) -> Result<String, StoreError> {
        let records = self.read_all().await?;

        let mut out = String::new();
        write_csv_row(&mut out, CSV_HEADER.iter().map(|s| s.to_string()));
        for entry in &records {
            let s = &entry.stats;
            write_csv_row(
                &mut out,
                [
                    s.start_time.to_rfc3339_opts(SecondsFormat::Secs, true),
                    format_duration(s.duration),
                    s.total_feeds.to_string(),
                    s.success_feeds.to_string(),
                    s.failed_feeds.to_string(),
                    s.not_modified_feeds.to_string(),
                    s.total_items_parsed.to_string(),
                    format_duration(s.total_fetch_time),
                    format_duration(s.avg_fetch_time),
                    s.memory_usage.to_string(),
                ]
                .into_iter(),
            );
        }

        tracing::debug!(records = records.len(), "Stats exported");
        Ok(out)
    }

    /// Write a closed record. Existing records are never overwritten.
    pub async fn write(&self, stats: &RunStats) -> Result<PathBuf, StoreError> {
        let bytes =
            serde_json::to_vec_pretty(stats).map_err(|e| StoreError::json("encode stats", e))?;

        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let name = format!(
            "{}-{}.json",
            stats.start_time.format("%Y%m%d%H%M%S"),
            &run_id[..8]
        );
        let path = self.dir.stats_dir().join(name);

        atomic::write_new(&path, &bytes)
            .await
            .map_err(|e| StoreError::io("write stats record", e))?;

        tracing::info!(path = %path.display(), "Run stats written");
        Ok(path)
    }
}

fn is_record_name(name: &str) -> bool {
    !name.starts_with('.') && name.ends_with(".json")
}

fn write_csv_row(out: &mut String, fields: impl Iterator<Item = String>) {
    for (i, field) in fields.enumerate() {
        if i > 0 {
            out.push(',');
        }
        let needs_quotes = field.starts_with(' ')
            || field.contains(|c: char| matches!(c, ',' | '"' | '\n' | '\r'));
        if needs_quotes {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(&field);
        }
    }
    out.push('\n');
}

/// Human-readable duration: `0s`, `250ms`, `1.5s`, `2m3s`, `1h0m0s`
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos < 1_000 {
        return format!("{nanos}ns");
    }
    if nanos < 1_000_000 {
        return format!("{}µs", fraction(nanos, 1_000, 3));
    }
    if nanos < 1_000_000_000 {
        return format!("{}ms", fraction(nanos, 1_000_000, 6));
    }

    let secs = d.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs / 60) % 60, secs % 60);
    let seconds = fraction(
        u128::from(seconds) * 1_000_000_000 + u128::from(d.subsec_nanos()),
        1_000_000_000,
        9,
    );

    let mut out = String::new();
    if hours > 0 {
        let _ = write!(out, "{hours}h{minutes}m");
    } else if minutes > 0 {
        let _ = write!(out, "{minutes}m");
    }
    let _ = write!(out, "{seconds}s");
    out
}

fn fraction(value: u128, unit: u128, digits: usize) -> String {
    let whole = value / unit;
    let rem = value % unit;
    if rem == 0 {
        return whole.to_string();
    }
    let frac = format!("{rem:0digits$}");
    format!("{whole}.{}", frac.trim_end_matches('0'))
}

mod duration_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let nanos = i64::deserialize(d)?;
        Ok(Duration::from_nanos(u64::try_from(nanos).unwrap_or(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn aggregator(tmp: &TempDir) -> StatsAggregator {
        let dir = StateDir::new(tmp.path());
        dir.init().unwrap();
        StatsAggregator::new(dir)
    }

    fn write_raw(tmp: &TempDir, name: &str, body: &str) {
        std::fs::write(tmp.path().join("stats").join(name), body).unwrap();
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_nanos(42)), "42ns");
        assert_eq!(format_duration(Duration::from_micros(1500)), "1.5ms");
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(61)), "1m1s");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h0m0s");
        assert_eq!(format_duration(Duration::from_micros(2)), "2µs");
    }

    #[test]
    fn test_percentiles() {
        let samples: Vec<Duration> = (1..=100).map(Duration::from_millis).collect();
        let p = PercentileStats::from_samples(&samples);
        assert_eq!((p.p50, p.p90, p.p99, p.max), (50, 90, 99, 100));

        let p = PercentileStats::from_samples(&[Duration::from_millis(7)]);
        assert_eq!((p.p50, p.max), (7, 7));

        assert_eq!(PercentileStats::from_samples(&[]), PercentileStats::default());
    }

    #[test]
    fn test_finish_derives_fields() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let mut stats = RunStats::new(start);
        stats.record_fetch("https://a", Duration::from_millis(100), true);
        stats.record_fetch("https://b", Duration::from_millis(300), false);
        stats.record_send("https://a", Duration::from_millis(5), true);
        stats.record_send("https://a", Duration::from_millis(5), false);

        stats.finish(start + chrono::Duration::seconds(2));

        assert_eq!(stats.duration, Duration::from_secs(2));
        assert_eq!(stats.avg_fetch_time, Duration::from_millis(200));
        assert_eq!(stats.top_slowest_feeds[0].url, "https://b");
        assert_eq!(stats.top_error_feeds.len(), 1);
        assert_eq!(stats.top_new_item_feeds[0].url, "https://a");
        assert_eq!((stats.messages_sent, stats.messages_failed), (1, 1));
    }

    #[test]
    fn test_only_start_time_required() {
        let stats: RunStats =
            serde_json::from_str(r#"{"start_time":"2023-01-01T12:00:00Z"}"#).unwrap();
        assert_eq!(stats.total_feeds, 0);
        assert!(serde_json::from_str::<RunStats>(r#"{"total_feeds":1}"#).is_err());
    }

    #[tokio::test]
    async fn test_empty_and_missing_dir_is_no_stats() {
        let tmp = TempDir::new().unwrap();
        let agg = aggregator(&tmp);
        assert!(matches!(agg.export().await, Err(StoreError::NoStats)));

        std::fs::remove_dir(tmp.path().join("stats")).unwrap();
        assert!(matches!(agg.list().await, Err(StoreError::NoStats)));
    }

    #[tokio::test]
    async fn test_export_sorted_newest_first_and_ignores_others() {
        let tmp = TempDir::new().unwrap();
        let agg = aggregator(&tmp);
        write_raw(&tmp, "a.json", r#"{"start_time":"2023-01-01T12:00:00Z","total_feeds":1}"#);
        write_raw(&tmp, "b.json", r#"{"start_time":"2023-01-02T12:00:00Z","duration":1500000000}"#);
        write_raw(&tmp, "notes.txt", "ignored");
        write_raw(&tmp, ".c.json.1234.tmp", "{");
        std::fs::create_dir(tmp.path().join("stats").join("dir.json")).unwrap();

        let csv = agg.export().await.unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER.join(","));
        assert_eq!(lines[1], "2023-01-02T12:00:00Z,1.5s,0,0,0,0,0,0s,0s,0");
        assert_eq!(lines[2], "2023-01-01T12:00:00Z,0s,1,0,0,0,0,0s,0s,0");
    }

    #[tokio::test]
    async fn test_corrupt_record_fails() {
        let tmp = TempDir::new().unwrap();
        let agg = aggregator(&tmp);
        write_raw(&tmp, "a.json", r#"{"start_time":"2023-01-01T12:00:00Z"}"#);
        write_raw(&tmp, "b.json", "{not json");

        let err = agg.export().await.unwrap_err();
        assert!(matches!(err, StoreError::Json { .. }));
    }

    #[tokio::test]
    async fn test_write_then_list() {
        let tmp = TempDir::new().unwrap();
        let agg = aggregator(&tmp);

        let start = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let mut stats = RunStats::new(start);
        stats.total_feeds = 3;
        let path = agg.write(&stats).await.unwrap();

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("20240501100000-"));
        assert!(name.ends_with(".json"));

        let listed = agg.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["total_feeds"], 3);
    }

    #[test]
    fn test_csv_quoting() {
        let mut out = String::new();
        write_csv_row(
            &mut out,
            ["a,b".to_string(), "say \"hi\"".to_string(), "plain".to_string()].into_iter(),
        );
        assert_eq!(out, "\"a,b\",\"say \"\"hi\"\"\",plain\n");
    }
}
