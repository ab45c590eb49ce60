//! Schema migration for persisted stores.
//!
//! The persisted blob carries an integer `databaseVersion`; this module
//! turns any supported on-disk layout into a [`Store`] at the current
//! version, or fails loudly. Migration is idempotent: re-running it over
//! its own output is a no-op.
//!
//! # Versions
//!
//! - 2: flat layout, records keyed at the top level next to a `meta` key
//! - 3 (current): `{ data, meta }` envelope

use serde_json::Value;
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::record::{BookmarkRecord, DeletedMeta, RecordMeta, Store, DELETED_TAG, PRODUCER_VERSION};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 3;

/// Oldest version a migration path exists for.
pub const MINIMUM_MIGRATABLE_VERSION: u32 = 2;

/// Producer release that overwrote `created` with "now" whenever it was
/// falsy (including a legitimate zero). Envelopes stamped with it get a
/// one-time point fix re-deriving `created` from `updated`.
pub const DEFECTIVE_PRODUCER_VERSION: &str = "0.2.6";

/// Errors raised while bringing a persisted blob to the current schema.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Written by a newer producer; the caller should trigger a full
    /// reload rather than attempt a downgrade.
    #[error("store schema v{0} is newer than supported v{CURRENT_VERSION}; reload required")]
    VersionTooNew(u32),

    /// Predates any supported migration path.
    #[error("store schema v{0} is older than the oldest supported v{MINIMUM_MIGRATABLE_VERSION}")]
    VersionTooOld(u32),

    /// The blob is not parseable as any known store layout.
    #[error("persisted store is corrupted: {0}")]
    Corrupted(String),
}

/// Compatibility classification of a raw version number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionCheck {
    Current,
    NeedsMigration { from: u32, to: u32 },
    NewerThanSupported(u32),
    TooOld(u32),
}

/// Classify a raw `databaseVersion` value.
pub fn check_version(raw: u32) -> VersionCheck {
    if raw == CURRENT_VERSION {
        VersionCheck::Current
    } else if raw > CURRENT_VERSION {
        VersionCheck::NewerThanSupported(raw)
    } else if raw >= MINIMUM_MIGRATABLE_VERSION {
        VersionCheck::NeedsMigration {
            from: raw,
            to: CURRENT_VERSION,
        }
    } else {
        VersionCheck::TooOld(raw)
    }
}

/// What [`migrate`] produced.
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationOutcome {
    /// No persisted blob existed; an empty store was synthesized.
    /// Must be persisted by the caller.
    Fresh(Store),
    /// Already at the current version; nothing to persist.
    Unchanged(Store),
    /// Reshaped or point-fixed; must be persisted by the caller.
    Migrated(Store),
}

impl MigrationOutcome {
    pub fn into_store(self) -> Store {
        match self {
            MigrationOutcome::Fresh(s)
            | MigrationOutcome::Unchanged(s)
            | MigrationOutcome::Migrated(s) => s,
        }
    }
}

/// Bring a raw persisted blob (or its absence) to the current schema.
pub fn migrate(raw: Option<&str>, now: i64) -> Result<MigrationOutcome, MigrationError> {
    let Some(blob) = raw else {
        return Ok(MigrationOutcome::Fresh(Store::empty(now)));
    };

    let value: Value = serde_json::from_str(blob)
        .map_err(|e| MigrationError::Corrupted(format!("not valid JSON: {e}")))?;

    let version = value
        .get("meta")
        .and_then(|m| m.get("databaseVersion"))
        .and_then(Value::as_u64)
        .ok_or_else(|| MigrationError::Corrupted("missing meta.databaseVersion".into()))?
        as u32;

    match check_version(version) {
        VersionCheck::NewerThanSupported(v) => Err(MigrationError::VersionTooNew(v)),
        VersionCheck::TooOld(v) => Err(MigrationError::VersionTooOld(v)),
        VersionCheck::Current => {
            let mut store: Store = serde_json::from_value(value)
                .map_err(|e| MigrationError::Corrupted(format!("bad envelope: {e}")))?;
            if apply_point_fix(&mut store) {
                Ok(MigrationOutcome::Migrated(store))
            } else {
                Ok(MigrationOutcome::Unchanged(store))
            }
        }
        VersionCheck::NeedsMigration { .. } => {
            let store = migrate_v2_to_v3(&value, now)?;
            Ok(MigrationOutcome::Migrated(store))
        }
    }
}

/// Re-derive `created` from `updated` for stores written by the defective
/// producer release, then stamp the current producer so the fix runs once.
fn apply_point_fix(store: &mut Store) -> bool {
    if store.meta.extension_version != DEFECTIVE_PRODUCER_VERSION {
        return false;
    }
    for rec in store.data.values_mut() {
        // The defect fired on any falsy `created`, so even `updated == 0`
        // means the stored `created` is fabricated. Zero is re-established
        // by the merge codec on the next write.
        if rec.meta.created > rec.meta.updated {
            rec.meta.created = rec.meta.updated;
        }
    }
    store.meta.extension_version = PRODUCER_VERSION.to_string();
    true
}

/// Reshape the flat v2 layout into the v3 `{ data, meta }` envelope.
///
/// Every record is validated; invalid ones are logged and skipped so a
/// single bad entry never takes down the migration.
fn migrate_v2_to_v3(value: &Value, now: i64) -> Result<Store, MigrationError> {
    let obj = value
        .as_object()
        .ok_or_else(|| MigrationError::Corrupted("v2 store is not an object".into()))?;

    let mut store = Store::empty(now);
    let mut earliest: Option<i64> = None;

    for (key, raw) in obj {
        if key == "meta" {
            continue;
        }
        match convert_v2_record(key, raw, now) {
            Some(rec) => {
                earliest = Some(earliest.map_or(rec.meta.created, |e| e.min(rec.meta.created)));
                store.data.insert(key.clone(), rec);
            }
            None => {
                warn!(%key, "skipping invalid record during v2 migration");
            }
        }
    }

    store.meta.created = earliest.unwrap_or(now);
    store.meta.updated = now;
    Ok(store)
}

/// Validate and convert one flat-layout record. `None` means skip.
fn convert_v2_record(key: &str, raw: &Value, now: i64) -> Option<BookmarkRecord> {
    if Url::parse(key).is_err() {
        return None;
    }
    let obj = raw.as_object()?;

    let raw_tags: Vec<&str> = obj
        .get("tags")?
        .as_array()?
        .iter()
        .map(Value::as_str)
        .collect::<Option<_>>()?;
    let tags = crate::codec::normalize_tags(raw_tags);
    // A live record cannot have an empty tag set; whitespace-only tags
    // collapsing to nothing mean the entry was never meaningful.
    if tags.is_empty() {
        return None;
    }

    let mut meta = RecordMeta::default();
    if let Some(raw_meta) = obj.get("meta") {
        let meta_obj = raw_meta.as_object()?;
        for (name, field) in meta_obj {
            match name.as_str() {
                "created" => meta.created = timestamp_field(field)?,
                "updated" => meta.updated = timestamp_field(field)?,
                "updated2" => meta.updated2 = Some(timestamp_field(field)?),
                "title" => meta.title = Some(field.as_str()?.trim().to_string()),
                "description" => meta.description = Some(field.as_str()?.to_string()),
                "note" => meta.note = Some(field.as_str()?.to_string()),
                _ => {
                    meta.extra.insert(name.clone(), field.clone());
                }
            }
        }
    }

    // Timestamp normalization: derive the missing one from the other,
    // or stamp both with now.
    if meta.created == 0 && meta.updated == 0 {
        meta.created = now;
        meta.updated = now;
    } else if meta.created == 0 {
        meta.created = meta.updated;
    } else if meta.updated == 0 {
        meta.updated = meta.created;
    }
    if meta.updated < meta.created {
        meta.updated = meta.created;
    }

    // Legacy tombstones carried only the sentinel tag.
    let deleted_meta = if tags.iter().any(|t| t == DELETED_TAG) {
        match obj.get("deletedMeta") {
            Some(dm) => serde_json::from_value(dm.clone()).ok(),
            None => Some(DeletedMeta {
                deleted: meta.updated,
                action: "legacy".to_string(),
            }),
        }
    } else {
        None
    };

    Some(BookmarkRecord {
        tags,
        meta,
        deleted_meta,
    })
}

/// Accept a numeric epoch-millisecond field; reject impossible types.
fn timestamp_field(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::Null => Some(0),
        _ => None,
    }
}
