//! Time-weighted tag usage ranking.
//!
//! Every successful save feeds the engine a tag delta; the engine keeps
//! an append-only log of `{tag, score}` entries and republishes two
//! bounded, derived lists after each append: "most used" and "recently
//! added". Log and lists live under their own backend keys, independent
//! of the main store blob.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use tagmark_store::backend::{BackendError, KeyValueBackend};
use tagmark_store::record::now_millis;
use tagmark_store::store::UsageSink;

use crate::queue::SerialQueue;

/// Backend key for the usage log.
pub const RECENT_LOG_KEY: &str = "tagmark:ranking:log";
/// Backend key for the derived "most used" list.
pub const MOST_USED_KEY: &str = "tagmark:ranking:most-used";
/// Backend key for the derived "recently added" list.
pub const RECENTLY_ADDED_KEY: &str = "tagmark:ranking:recently-added";

/// Scores are measured from here so they stay small; any fixed point in
/// the past works, later uses always score higher.
const SCORE_EPOCH_MS: i64 = 1_577_836_800_000; // 2020-01-01T00:00:00Z

/// One logged tag use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentTagEntry {
    pub tag: String,
    pub score: f64,
}

/// Tunable ranking constants. The exact values are not load-bearing;
/// only "recent uses score higher" and the caps are contractual.
#[derive(Debug, Clone)]
pub struct RankingConfig {
    /// Log cap; exceeding it triggers a trim.
    pub max_log_entries: usize,
    /// How many of the oldest entries one trim removes.
    pub trim_count: usize,
    /// Cap on both derived lists.
    pub max_list_entries: usize,
    /// Minimum summed score for a tag to count as "most used".
    pub min_usage_score: f64,
    /// Milliseconds per score unit.
    pub score_unit_ms: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            max_log_entries: 1000,
            trim_count: 100,
            max_list_entries: 200,
            min_usage_score: 10.0,
            // One year per unit: a use today outscores one from last year
            // by 1.0, and a handful of recent uses clears the threshold.
            score_unit_ms: 31_536_000_000.0,
        }
    }
}

impl RankingConfig {
    /// Score of a use at the given wall-clock time.
    pub fn score_at(&self, now_ms: i64) -> f64 {
        (now_ms - SCORE_EPOCH_MS) as f64 / self.score_unit_ms
    }
}

/// Errors from ranking persistence.
#[derive(Debug, Error)]
pub enum RankingError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("failed to encode ranking data: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The ranking engine. Wire it to a [`tagmark_store::BookmarkStore`]
/// via [`set_usage_sink`](tagmark_store::BookmarkStore::set_usage_sink).
pub struct TagRanking {
    backend: Arc<dyn KeyValueBackend>,
    config: RankingConfig,
    queue: SerialQueue<Vec<String>>,
}

impl TagRanking {
    pub fn new(backend: Arc<dyn KeyValueBackend>, config: RankingConfig) -> Self {
        Self {
            backend,
            config,
            queue: SerialQueue::new(),
        }
    }

    /// Record a tag delta. Only tags present in `new_tags` but absent
    /// from `old_tags` count as new usage, so renames and no-op rewrites
    /// do not inflate the ranking. Updates are serialized in call order.
    pub fn add_usage(&self, new_tags: &[String], old_tags: &[String]) {
        let fresh: Vec<String> = new_tags
            .iter()
            .filter(|tag| !old_tags.contains(tag))
            .cloned()
            .collect();
        if fresh.is_empty() {
            return;
        }
        self.queue.run(fresh, |tags| {
            if let Err(error) = self.apply(tags) {
                warn!(%error, "ranking update failed");
            }
        });
    }

    /// Tags whose summed score clears the usage threshold, best first.
    pub fn most_used(&self) -> Result<Vec<String>, RankingError> {
        self.load_list(MOST_USED_KEY)
    }

    /// Distinct tags in reverse chronological order of last use.
    pub fn recently_added(&self) -> Result<Vec<String>, RankingError> {
        self.load_list(RECENTLY_ADDED_KEY)
    }

    /// The raw usage log.
    pub fn log(&self) -> Result<Vec<RecentTagEntry>, RankingError> {
        Ok(self.load_log())
    }

    fn apply(&self, tags: Vec<String>) -> Result<(), RankingError> {
        let mut log = self.load_log();
        let score = self.config.score_at(now_millis());
        for tag in tags {
            log.push(RecentTagEntry { tag, score });
        }
        // One delta can overflow the cap by more than a single trim.
        while log.len() > self.config.max_log_entries {
            log.drain(..self.config.trim_count.clamp(1, log.len()));
        }
        self.backend
            .set(RECENT_LOG_KEY, &serde_json::to_string(&log)?)?;
        self.rebuild_lists(&log)
    }

    fn rebuild_lists(&self, log: &[RecentTagEntry]) -> Result<(), RankingError> {
        let mut sums: BTreeMap<&str, f64> = BTreeMap::new();
        for entry in log {
            *sums.entry(entry.tag.as_str()).or_insert(0.0) += entry.score;
        }
        let mut most_used: Vec<(&str, f64)> = sums
            .into_iter()
            .filter(|(_, sum)| *sum >= self.config.min_usage_score)
            .collect();
        most_used.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        most_used.truncate(self.config.max_list_entries);
        let most_used: Vec<&str> = most_used.into_iter().map(|(tag, _)| tag).collect();

        let mut recently_added: Vec<&str> = Vec::new();
        for entry in log.iter().rev() {
            if !recently_added.contains(&entry.tag.as_str()) {
                recently_added.push(entry.tag.as_str());
                if recently_added.len() == self.config.max_list_entries {
                    break;
                }
            }
        }

        self.backend
            .set(MOST_USED_KEY, &serde_json::to_string(&most_used)?)?;
        self.backend
            .set(RECENTLY_ADDED_KEY, &serde_json::to_string(&recently_added)?)?;
        Ok(())
    }

    /// A corrupted or missing log starts over empty; it is derived data.
    fn load_log(&self) -> Vec<RecentTagEntry> {
        match self.backend.get(RECENT_LOG_KEY) {
            Ok(Some(blob)) => serde_json::from_str(&blob).unwrap_or_else(|error| {
                warn!(%error, "discarding corrupted ranking log");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(error) => {
                warn!(%error, "ranking log read failed");
                Vec::new()
            }
        }
    }

    fn load_list(&self, key: &str) -> Result<Vec<String>, RankingError> {
        match self.backend.get(key)? {
            Some(blob) => Ok(serde_json::from_str(&blob)?),
            None => Ok(Vec::new()),
        }
    }
}

impl UsageSink for TagRanking {
    fn add_usage(&self, new_tags: &[String], old_tags: &[String]) {
        TagRanking::add_usage(self, new_tags, old_tags);
    }
}
