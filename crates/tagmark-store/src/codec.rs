//! Record normalization and merge rules.
//!
//! Every write goes through [`merge`], which enforces the timestamp
//! invariants: `created` is established once and never recomputed, and
//! `updated` only advances when the record content actually changed.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::record::{BookmarkRecord, DeletedMeta, RecordMeta, DELETED_TAG};

/// Partial metadata supplied alongside a save.
#[derive(Debug, Clone, Default)]
pub struct MetaPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub note: Option<String>,
    pub extra: BTreeMap<String, Value>,
}

/// What a merge decided to do with the record.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// Record content changed; persist the new record.
    Changed(BookmarkRecord),
    /// Record was soft-deleted; persist the tombstone.
    Tombstoned(BookmarkRecord),
    /// Nothing changed; do not persist, do not notify.
    Unchanged,
}

/// Trim, drop empties, and deduplicate preserving first-seen order.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = Vec::new();
    for tag in tags {
        let trimmed = tag.as_ref().trim();
        if trimmed.is_empty() {
            continue;
        }
        if !seen.iter().any(|t: &String| t == trimmed) {
            seen.push(trimmed.to_string());
        }
    }
    seen
}

/// Union of two tag sources under the same normalization rules
/// (used when merging imported data into existing records).
pub fn merge_tags<'a, I, J>(a: I, b: J) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
    J: IntoIterator<Item = &'a str>,
{
    normalize_tags(a.into_iter().chain(b))
}

/// Merge a write into an existing record (or absence thereof).
///
/// An empty normalized tag set tombstones the record instead of erasing
/// it; tombstoning an already-tombstoned (or absent) record is a no-op.
/// A non-empty tag set over a tombstoned record starts fresh, which is
/// how tombstones are eventually purged from disk.
pub fn merge(
    existing: Option<&BookmarkRecord>,
    new_tags: &[String],
    patch: &MetaPatch,
    now: i64,
) -> MergeOutcome {
    let tags = normalize_tags(new_tags.iter().map(String::as_str));

    if tags.is_empty() {
        return match existing {
            Some(rec) if !rec.is_tombstoned() => MergeOutcome::Tombstoned(tombstone(rec, now)),
            _ => MergeOutcome::Unchanged,
        };
    }

    // A write over a tombstone replaces it wholesale.
    let base = existing.filter(|rec| !rec.is_tombstoned());

    let mut meta = base.map(|rec| rec.meta.clone()).unwrap_or_default();

    // Established once: prior `created`, else prior `updated`, else now.
    if meta.created == 0 {
        meta.created = if meta.updated != 0 { meta.updated } else { now };
    }

    apply_text_field(&mut meta.title, &patch.title);
    apply_text_field(&mut meta.description, &patch.description);
    apply_text_field(&mut meta.note, &patch.note);
    for (key, value) in &patch.extra {
        meta.extra.insert(key.clone(), value.clone());
    }

    let candidate = BookmarkRecord {
        tags,
        meta,
        deleted_meta: None,
    };

    if let Some(rec) = base {
        if candidate.tags == rec.tags && same_content(&candidate.meta, &rec.meta) {
            return MergeOutcome::Unchanged;
        }
    }

    let mut changed = candidate;
    changed.meta.updated = now.max(changed.meta.created);
    MergeOutcome::Changed(changed)
}

/// Build the tombstoned form of a live record.
fn tombstone(rec: &BookmarkRecord, now: i64) -> BookmarkRecord {
    let mut out = rec.clone();
    if !out.tags.iter().any(|t| t == DELETED_TAG) {
        out.tags.push(DELETED_TAG.to_string());
    }
    out.deleted_meta = Some(DeletedMeta {
        deleted: now,
        action: "save".to_string(),
    });
    out.meta.updated2 = Some(now);
    out
}

/// Set a trimmed text field; an empty incoming value never clobbers an
/// existing non-empty one.
fn apply_text_field(slot: &mut Option<String>, incoming: &Option<String>) {
    if let Some(value) = incoming {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            *slot = Some(trimmed.to_string());
        }
    }
}

/// Metadata equality ignoring the `updated` timestamp.
fn same_content(a: &RecordMeta, b: &RecordMeta) -> bool {
    a.created == b.created
        && a.updated2 == b.updated2
        && a.title == b.title
        && a.description == b.description
        && a.note == b.note
        && a.extra == b.extra
}
