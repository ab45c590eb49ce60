//! Integration tests for initialization-driven migration.

use std::sync::Arc;

use tagmark_store::backend::{KeyValueBackend, MemoryBackend};
use tagmark_store::codec::MetaPatch;
use tagmark_store::migration::{DEFECTIVE_PRODUCER_VERSION, CURRENT_VERSION};
use tagmark_store::record::Store;
use tagmark_store::store::{BookmarkStore, StoreError, STORE_KEY};

const LEGACY_V2: &str = r#"{
    "https://e.com": {"tags":["t"], "meta":{"created": 100, "updated": 200}},
    "https://later.example": {"tags":["u","v"], "meta":{"created": 400, "updated": 500}},
    "meta": {"databaseVersion": 2, "extensionVersion": "x"}
}"#;

fn seeded(blob: &str) -> (Arc<MemoryBackend>, BookmarkStore) {
    let backend = Arc::new(MemoryBackend::new());
    backend.set(STORE_KEY, blob).unwrap();
    let store = BookmarkStore::new(backend.clone());
    (backend, store)
}

fn persisted(backend: &MemoryBackend) -> Store {
    serde_json::from_str(&backend.get(STORE_KEY).unwrap().unwrap()).unwrap()
}

#[test]
fn legacy_blob_migrates_on_initialize() {
    let (backend, store) = seeded(LEGACY_V2);
    store.initialize().unwrap();

    let rec = store.get("https://e.com");
    assert_eq!(rec.tags, vec!["t"]);
    assert_eq!(rec.meta.created, 100);
    assert_eq!(rec.meta.updated, 200);

    let envelope = persisted(&backend);
    assert_eq!(envelope.meta.database_version, CURRENT_VERSION);
    assert_eq!(envelope.meta.created, 100);
    assert!(envelope.meta.updated > 200);
}

#[test]
fn initializing_twice_changes_nothing() {
    let (backend, store) = seeded(LEGACY_V2);
    store.initialize().unwrap();
    let first = backend.get(STORE_KEY).unwrap().unwrap();

    store.initialize().unwrap();
    let second = backend.get(STORE_KEY).unwrap().unwrap();
    assert_eq!(first, second);

    let envelope = persisted(&backend);
    assert_eq!(envelope.data.len(), 2);
}

#[test]
fn created_never_exceeds_updated_after_migration_and_saves() {
    let (backend, store) = seeded(LEGACY_V2);
    store.initialize().unwrap();
    store
        .save("https://fresh.example", &["new".into()], &MetaPatch::default())
        .unwrap();
    store
        .save("https://e.com", &["t".into(), "more".into()], &MetaPatch::default())
        .unwrap();

    let envelope = persisted(&backend);
    for (url, rec) in &envelope.data {
        assert!(
            rec.meta.created <= rec.meta.updated,
            "created > updated for {url}"
        );
    }
}

#[test]
fn newer_schema_fails_and_leaves_cache_empty() {
    let blob = r#"{"data":{"https://e.com":{"tags":["t"],"meta":{"created":1,"updated":2}}},
                   "meta":{"databaseVersion":4,"extensionVersion":"future"}}"#;
    let (backend, store) = seeded(blob);
    let err = store.initialize().unwrap_err();
    assert!(matches!(err, StoreError::Migration(_)));

    // Cache never left its last-known-good (empty) state, and the
    // persisted blob was not touched.
    assert!(store.get("https://e.com").tags.is_empty());
    assert_eq!(backend.get(STORE_KEY).unwrap().unwrap(), blob);
}

#[test]
fn unsupported_legacy_schema_is_fatal() {
    let (_backend, store) = seeded(r#"{"meta":{"databaseVersion":1}}"#);
    assert!(store.initialize().is_err());
}

#[test]
fn point_fix_applies_through_initialize() {
    let blob = format!(
        r#"{{"data":{{"https://e.com":{{"tags":["t"],"meta":{{"created":900,"updated":300}}}}}},
            "meta":{{"databaseVersion":3,"extensionVersion":"{DEFECTIVE_PRODUCER_VERSION}","created":300,"updated":900}}}}"#
    );
    let (backend, store) = seeded(&blob);
    store.initialize().unwrap();

    let envelope = persisted(&backend);
    assert_eq!(envelope.data["https://e.com"].meta.created, 300);
    assert_ne!(envelope.meta.extension_version, DEFECTIVE_PRODUCER_VERSION);

    // The fix is gated on the producer stamp, so it cannot run again.
    let after_fix = backend.get(STORE_KEY).unwrap().unwrap();
    store.initialize().unwrap();
    assert_eq!(backend.get(STORE_KEY).unwrap().unwrap(), after_fix);
}

#[test]
fn import_of_legacy_export_migrates() {
    let backend = Arc::new(MemoryBackend::new());
    let store = BookmarkStore::new(backend.clone());
    store.initialize().unwrap();

    store.deserialize(LEGACY_V2).unwrap();
    assert_eq!(store.get("https://e.com").tags, vec!["t"]);
    assert_eq!(persisted(&backend).meta.database_version, CURRENT_VERSION);
}
