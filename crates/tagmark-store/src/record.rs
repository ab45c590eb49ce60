//! Bookmark record and store envelope types.
//!
//! A record's sole identity is its URL; the store is one persisted JSON
//! blob mapping URL to record plus a version envelope. Wire field names
//! stay camelCase for compatibility with previously persisted data.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved tag marking a soft-deleted record on disk.
///
/// Newer producers stamp [`DeletedMeta`] as the explicit tombstone flag,
/// but the sentinel tag is still written (and recognized on read) so that
/// older readers keep filtering tombstones correctly.
pub const DELETED_TAG: &str = "_DELETED_";

/// Version string stamped into the store envelope by this producer.
pub const PRODUCER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Per-record metadata.
///
/// `created` and `updated` are epoch-millisecond timestamps; `0` means
/// "not yet established". Unrecognized keys are preserved round-trip in
/// `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub updated: i64,
    /// Bookkeeping timestamp touched by tombstoning, separate from `updated`.
    #[serde(rename = "updated2", default, skip_serializing_if = "Option::is_none")]
    pub updated2: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Deletion bookkeeping carried by tombstoned records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedMeta {
    /// Epoch-millisecond deletion time.
    pub deleted: i64,
    /// What kind of operation produced the tombstone (e.g. "save", "import").
    #[serde(rename = "actionType")]
    pub action: String,
}

/// One tagged URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookmarkRecord {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub meta: RecordMeta,
    #[serde(rename = "deletedMeta", default, skip_serializing_if = "Option::is_none")]
    pub deleted_meta: Option<DeletedMeta>,
}

impl BookmarkRecord {
    /// The "record of zeros" returned for unknown or tombstoned keys.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Whether this record is soft-deleted.
    ///
    /// Recognizes both the explicit `deletedMeta` flag and the legacy
    /// sentinel tag.
    pub fn is_tombstoned(&self) -> bool {
        self.deleted_meta.is_some() || self.tags.iter().any(|t| t == DELETED_TAG)
    }

    /// Tags excluding the tombstone sentinel.
    pub fn live_tags(&self) -> Vec<String> {
        self.tags
            .iter()
            .filter(|t| t.as_str() != DELETED_TAG)
            .cloned()
            .collect()
    }
}

/// Store-level version envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMeta {
    /// Integer schema version gating migrations.
    #[serde(rename = "databaseVersion")]
    pub database_version: u32,
    /// Version string of the producer that last wrote the store, kept for
    /// diagnostics and bug-specific point-fix migrations.
    #[serde(rename = "extensionVersion", default)]
    pub extension_version: String,
    /// Earliest record creation time, store-wide.
    #[serde(default)]
    pub created: i64,
    /// Last store-wide mutation time.
    #[serde(default)]
    pub updated: i64,
    /// Stamped on export blobs only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported: Option<i64>,
}

/// The whole persisted unit: URL-keyed records plus envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    #[serde(default)]
    pub data: BTreeMap<String, BookmarkRecord>,
    pub meta: StoreMeta,
}

impl Store {
    /// A fresh, empty store at the current schema version.
    pub fn empty(now: i64) -> Self {
        Self {
            data: BTreeMap::new(),
            meta: StoreMeta {
                database_version: crate::migration::CURRENT_VERSION,
                extension_version: PRODUCER_VERSION.to_string(),
                created: now,
                updated: now,
                exported: None,
            },
        }
    }

    /// The filtered, non-tombstoned view served to readers.
    pub fn live_view(&self) -> BTreeMap<String, BookmarkRecord> {
        self.data
            .iter()
            .filter(|(_, rec)| !rec.is_tombstoned())
            .map(|(url, rec)| (url.clone(), rec.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serde_round_trip() {
        let rec = BookmarkRecord {
            tags: vec!["reading".into(), "rust".into()],
            meta: RecordMeta {
                created: 1_700_000_000_000,
                updated: 1_700_000_100_000,
                title: Some("A Page".into()),
                ..Default::default()
            },
            deleted_meta: None,
        };
        let json = serde_json::to_string(&rec).unwrap();
        let back: BookmarkRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(rec, back);
    }

    #[test]
    fn wire_names_stay_camel_case() {
        let store = Store::empty(42);
        let json = serde_json::to_value(&store).unwrap();
        assert!(json["meta"]["databaseVersion"].is_number());
        assert!(json["meta"]["extensionVersion"].is_string());
        assert!(json["meta"].get("exported").is_none());
    }

    #[test]
    fn extra_meta_fields_round_trip() {
        let json = r#"{"tags":["a"],"meta":{"created":1,"updated":2,"favicon":"x.ico"}}"#;
        let rec: BookmarkRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.meta.extra["favicon"], "x.ico");
        let out = serde_json::to_value(&rec).unwrap();
        assert_eq!(out["meta"]["favicon"], "x.ico");
    }

    #[test]
    fn legacy_sentinel_tag_counts_as_tombstone() {
        let rec = BookmarkRecord {
            tags: vec!["old".into(), DELETED_TAG.into()],
            ..Default::default()
        };
        assert!(rec.is_tombstoned());
        assert_eq!(rec.live_tags(), vec!["old".to_string()]);
    }

    #[test]
    fn live_view_filters_tombstones() {
        let mut store = Store::empty(0);
        store.data.insert(
            "https://a.example".into(),
            BookmarkRecord {
                tags: vec!["keep".into()],
                ..Default::default()
            },
        );
        store.data.insert(
            "https://b.example".into(),
            BookmarkRecord {
                tags: vec!["gone".into()],
                deleted_meta: Some(DeletedMeta {
                    deleted: 1,
                    action: "save".into(),
                }),
                ..Default::default()
            },
        );
        let view = store.live_view();
        assert_eq!(view.len(), 1);
        assert!(view.contains_key("https://a.example"));
    }
}
