//! Per-item dedup decisions
//!
//! Regular feeds use a time cursor: an item published before the feed's
//! `last_updated` was already delivered. Feeds with `always_send_new_items`
//! keep a seen-set keyed by guid (or link) instead, so items that appear
//! late with an old publication date still go out once.

use chrono::{DateTime, Duration, Utc};

use crate::models::FeedItem;
use crate::script::FeedDecl;
use crate::storage::FeedState;

/// Items older than this are ignored by seen-set feeds
pub const DEFAULT_LOOKBACK_DAYS: i64 = 14;

/// Seen-set entries older than this are forgotten
pub const DEFAULT_SEEN_ITEMS_CLEANUP_DAYS: i64 = 28;

/// Windows applied by the seen-set strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupWindows {
    pub lookback: Duration,
    pub cleanup: Duration,
}

impl Default for DedupWindows {
    fn default() -> Self {
        Self {
            lookback: Duration::days(DEFAULT_LOOKBACK_DAYS),
            cleanup: Duration::days(DEFAULT_SEEN_ITEMS_CLEANUP_DAYS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Published before the cursor or outside the lookback window
    Old,
    /// Already in the seen-set
    Seen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Skip(SkipReason),
    /// Remember the item without sending it
    MarkSeenOnly,
    Send,
}

/// Outcome of running dedup over one fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Items to deliver, in feed order
    pub accepted: Vec<FeedItem>,
    pub examined: u64,
    pub skipped_old: u64,
    pub deduped: u64,
    pub pruned: u64,
}

/// Decide for a regular feed
pub fn decide_regular(state: &FeedState, item: &FeedItem) -> Decision {
    match item.published {
        Some(published) if published < state.last_updated => Decision::Skip(SkipReason::Old),
        _ => Decision::Send,
    }
}

/// Decide for a seen-set feed and record the item as seen when new.
///
/// `silent` is set on the first fetch of a feed, or the fetch that created
/// the seen-set: everything is remembered, nothing is sent.
pub fn decide_always_send(
    state: &mut FeedState,
    item: &FeedItem,
    now: DateTime<Utc>,
    lookback: Duration,
    silent: bool,
) -> Decision {
    if let Some(published) = item.published {
        if now - published > lookback {
            return Decision::Skip(SkipReason::Old);
        }
    }

    let key = item.key();
    if state.is_seen(key) {
        return Decision::Skip(SkipReason::Seen);
    }
    state.mark_seen(key, now);

    if silent {
        Decision::MarkSeenOnly
    } else {
        Decision::Send
    }
}

/// Apply the feed's dedup strategy to a batch of fetched items.
///
/// `first_fetch` is true when the feed had no state before this run.
pub fn select(
    feed: &FeedDecl,
    state: &mut FeedState,
    items: Vec<FeedItem>,
    first_fetch: bool,
    now: DateTime<Utc>,
    windows: DedupWindows,
) -> Selection {
    let mut selection = Selection::default();

    let silent = if feed.always_send_new_items {
        let (created, pruned) = state.prepare_seen_items(now, windows.cleanup);
        selection.pruned = pruned as u64;
        first_fetch || created
    } else {
        false
    };

    for item in items {
        selection.examined += 1;
        let decision = if feed.always_send_new_items {
            decide_always_send(state, &item, now, windows.lookback, silent)
        } else {
            decide_regular(state, &item)
        };

        match decision {
            Decision::Send => selection.accepted.push(item),
            Decision::MarkSeenOnly => {}
            Decision::Skip(SkipReason::Old) => selection.skipped_old += 1,
            Decision::Skip(SkipReason::Seen) => selection.deduped += 1,
        }
    }

    selection
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn item(guid: &str, hours_ago: Option<i64>) -> FeedItem {
        FeedItem {
            guid: guid.to_string(),
            link: format!("https://e.com/{guid}"),
            title: guid.to_uppercase(),
            published: hours_ago.map(|h| now() - Duration::hours(h)),
            summary: String::new(),
        }
    }

    #[test]
    fn test_regular_feed_uses_cursor() {
        let feed = FeedDecl::new("https://e.com/feed");
        let mut state = FeedState::new(now() - Duration::hours(5));

        let selection = select(
            &feed,
            &mut state,
            vec![item("new", Some(1)), item("old", Some(10)), item("undated", None)],
            false,
            now(),
            DedupWindows::default(),
        );

        let keys: Vec<&str> = selection.accepted.iter().map(FeedItem::key).collect();
        assert_eq!(keys, vec!["new", "undated"]);
        assert_eq!(selection.skipped_old, 1);
        assert_eq!(selection.examined, 3);
    }

    #[test]
    fn test_seen_set_first_fetch_is_silent() {
        let mut feed = FeedDecl::new("https://e.com/feed");
        feed.always_send_new_items = true;
        let mut state = FeedState::new(now());

        let selection = select(
            &feed,
            &mut state,
            vec![item("a", Some(1)), item("b", Some(2))],
            true,
            now(),
            DedupWindows::default(),
        );

        assert!(selection.accepted.is_empty());
        assert!(state.is_seen("a"));
        assert!(state.is_seen("b"));
    }

    #[test]
    fn test_seen_set_enabled_on_existing_feed_is_silent_once() {
        let mut feed = FeedDecl::new("https://e.com/feed");
        feed.always_send_new_items = true;
        let mut state = FeedState::new(now() - Duration::days(3));

        let first = select(
            &feed,
            &mut state,
            vec![item("a", Some(100))],
            false,
            now(),
            DedupWindows::default(),
        );
        assert!(first.accepted.is_empty());

        // an item dated before the cursor still goes out once
        let second = select(
            &feed,
            &mut state,
            vec![item("a", Some(100)), item("late", Some(90))],
            false,
            now(),
            DedupWindows::default(),
        );
        let keys: Vec<&str> = second.accepted.iter().map(FeedItem::key).collect();
        assert_eq!(keys, vec!["late"]);
        assert_eq!(second.deduped, 1);
    }

    #[test]
    fn test_seen_set_lookback_and_cleanup() {
        let mut feed = FeedDecl::new("https://e.com/feed");
        feed.always_send_new_items = true;
        let mut state = FeedState::new(now());
        state.mark_seen("ancient", now() - Duration::days(40));
        state.mark_seen("recent", now() - Duration::days(1));

        let selection = select(
            &feed,
            &mut state,
            vec![item("stale", Some(24 * 20)), item("fresh", Some(2))],
            false,
            now(),
            DedupWindows::default(),
        );

        assert_eq!(selection.pruned, 1);
        assert_eq!(selection.skipped_old, 1);
        assert_eq!(selection.accepted.len(), 1);
        assert_eq!(selection.accepted[0].guid, "fresh");
        assert!(!state.is_seen("ancient"));
        assert!(!state.is_seen("stale"));
    }

    #[test]
    fn test_guid_falls_back_to_link() {
        let mut state = FeedState::new(now());
        let mut linked = item("x", Some(1));
        linked.guid.clear();

        let decision = decide_always_send(&mut state, &linked, now(), Duration::days(14), false);
        assert_eq!(decision, Decision::Send);
        assert!(state.is_seen("https://e.com/x"));
    }
}
