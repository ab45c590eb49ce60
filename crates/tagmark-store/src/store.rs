//! Store access layer and cross-context synchronizer.
//!
//! [`BookmarkStore`] is the single handle owning the in-memory cache,
//! the backend reference, and observer registrations; there is no
//! module-level mutable state. Reads are always served from the cache,
//! which mirrors the filtered (non-tombstoned) view of the last
//! successfully persisted store.
//!
//! Writes are a fresh read-modify-write of the whole blob. Callers that
//! must avoid lost updates to the same URL serialize at the call site;
//! the ranking engine serializes its own updates internally.

use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::backend::{BackendError, ChangeNotice, KeyValueBackend};
use crate::codec::{merge, MergeOutcome, MetaPatch};
use crate::migration::{migrate, MigrationError, MigrationOutcome};
use crate::record::{now_millis, BookmarkRecord, Store};

/// Well-known backend key holding the whole store blob.
pub const STORE_KEY: &str = "tagmark:store";

/// Registered store-ready / data-changed callback.
pub type Observer = Box<dyn Fn() + Send + Sync>;

/// Consumer of post-normalization tag deltas after successful saves
/// (the ranking engine, in practice).
pub trait UsageSink: Send + Sync {
    fn add_usage(&self, new_tags: &[String], old_tags: &[String]);
}

/// Errors from the store access layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store has not been initialized")]
    NotInitialized,

    /// A persisted migration result must read back as current.
    #[error("migration did not converge to the current schema")]
    MigrationDiverged,

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("failed to encode store: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreState {
    Uninitialized,
    Ready,
}

/// Handle over one persisted bookmark store.
pub struct BookmarkStore {
    backend: Arc<dyn KeyValueBackend>,
    cache: Mutex<BTreeMap<String, BookmarkRecord>>,
    state: Mutex<StoreState>,
    changes: Mutex<Receiver<ChangeNotice>>,
    ready_observers: Mutex<Vec<Observer>>,
    data_observers: Mutex<Vec<Observer>>,
    usage_sink: Mutex<Option<Arc<dyn UsageSink>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl BookmarkStore {
    /// Create a handle over the given backend. No I/O happens until
    /// [`initialize`](Self::initialize) runs.
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        let changes = backend.subscribe(STORE_KEY);
        Self {
            backend,
            cache: Mutex::new(BTreeMap::new()),
            state: Mutex::new(StoreState::Uninitialized),
            changes: Mutex::new(changes),
            ready_observers: Mutex::new(Vec::new()),
            data_observers: Mutex::new(Vec::new()),
            usage_sink: Mutex::new(None),
        }
    }

    /// Wire the ranking engine (or any other delta consumer).
    pub fn set_usage_sink(&self, sink: Arc<dyn UsageSink>) {
        *lock(&self.usage_sink) = Some(sink);
    }

    /// Run the schema migrator and build the cache.
    ///
    /// Migration outcomes are persisted and initialization re-runs
    /// against the persisted blob, so dependent state always rebuilds
    /// from what is actually on disk. Idempotent; safe to call again on
    /// every change notice.
    pub fn initialize(&self) -> Result<(), StoreError> {
        for _ in 0..3 {
            let raw = self.backend.get(STORE_KEY)?;
            match migrate(raw.as_deref(), now_millis())? {
                MigrationOutcome::Unchanged(store) => {
                    self.rebuild_cache(&store);
                    let was_ready = {
                        let mut state = lock(&self.state);
                        let was = *state == StoreState::Ready;
                        *state = StoreState::Ready;
                        was
                    };
                    if !was_ready {
                        let observers = std::mem::take(&mut *lock(&self.ready_observers));
                        for cb in &observers {
                            cb();
                        }
                    }
                    return Ok(());
                }
                MigrationOutcome::Fresh(store) | MigrationOutcome::Migrated(store) => {
                    debug!(
                        version = store.meta.database_version,
                        records = store.data.len(),
                        "persisting migrated store"
                    );
                    self.persist(&store)?;
                }
            }
        }
        Err(StoreError::MigrationDiverged)
    }

    /// Look up a record. Never fails: unknown and tombstoned keys yield
    /// the record of zeros.
    pub fn get(&self, url: &str) -> BookmarkRecord {
        lock(&self.cache)
            .get(url)
            .cloned()
            .unwrap_or_else(BookmarkRecord::zero)
    }

    /// Write tags and metadata for a URL.
    ///
    /// Invalid URLs are logged and ignored. Saves that change nothing
    /// are no-ops: no persist, no cache refresh, no ranking update. An
    /// empty tag set tombstones the record.
    pub fn save(&self, url: &str, tags: &[String], patch: &MetaPatch) -> Result<(), StoreError> {
        self.ensure_ready()?;
        if Url::parse(url).is_err() {
            warn!(url, "ignoring save for invalid url");
            return Ok(());
        }

        let now = now_millis();
        let mut store = self.load_current(now)?;
        let existing = store.data.get(url).cloned();
        let old_tags = existing
            .as_ref()
            .filter(|rec| !rec.is_tombstoned())
            .map(BookmarkRecord::live_tags)
            .unwrap_or_default();

        match merge(existing.as_ref(), tags, patch, now) {
            MergeOutcome::Unchanged => Ok(()),
            MergeOutcome::Changed(rec) => {
                let new_tags = rec.tags.clone();
                if store.meta.created == 0 || rec.meta.created < store.meta.created {
                    store.meta.created = rec.meta.created;
                }
                store.meta.updated = now;
                store.data.insert(url.to_string(), rec);
                self.persist(&store)?;
                self.rebuild_cache(&store);
                let sink = lock(&self.usage_sink).clone();
                if let Some(sink) = sink {
                    sink.add_usage(&new_tags, &old_tags);
                }
                Ok(())
            }
            MergeOutcome::Tombstoned(rec) => {
                store.meta.updated = now;
                store.data.insert(url.to_string(), rec);
                self.persist(&store)?;
                self.rebuild_cache(&store);
                Ok(())
            }
        }
    }

    /// Export the full store as a JSON blob, stamped with `exported`.
    pub fn serialize(&self) -> Result<String, StoreError> {
        self.ensure_ready()?;
        let now = now_millis();
        let mut store = self.load_current(now)?;
        store.meta.exported = Some(now);
        Ok(serde_json::to_string(&store)?)
    }

    /// Import a full store blob, replacing the persisted store wholesale.
    ///
    /// The blob goes through the schema migrator, so exports from older
    /// producers import cleanly.
    pub fn deserialize(&self, blob: &str) -> Result<(), StoreError> {
        self.ensure_ready()?;
        let store = migrate(Some(blob), now_millis())?.into_store();
        self.persist(&store)?;
        self.rebuild_cache(&store);
        Ok(())
    }

    /// Drain pending change notices from the backend.
    ///
    /// Each notice (own write or another context's) clears the cache,
    /// re-runs initialization, and fires the data-changed observers
    /// exactly once. Returns how many notices were handled. Hosts with
    /// unreliable push delivery call this on a timer; duplicate delivery
    /// is harmless because initialization is idempotent.
    pub fn poll_changes(&self) -> Result<usize, StoreError> {
        let notices: Vec<ChangeNotice> = lock(&self.changes).try_iter().collect();
        for _notice in &notices {
            lock(&self.cache).clear();
            self.initialize()?;
            for cb in lock(&self.data_observers).iter() {
                cb();
            }
        }
        Ok(notices.len())
    }

    /// Register a callback fired once the store is ready. Fires
    /// immediately if initialization already succeeded.
    pub fn on_store_ready(&self, cb: Observer) {
        if *lock(&self.state) == StoreState::Ready {
            cb();
        } else {
            lock(&self.ready_observers).push(cb);
        }
    }

    /// Register a callback fired after every observed store change.
    pub fn on_data_changed(&self, cb: Observer) {
        lock(&self.data_observers).push(cb);
    }

    fn ensure_ready(&self) -> Result<(), StoreError> {
        if *lock(&self.state) == StoreState::Ready {
            Ok(())
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    /// Read the persisted store at the current schema, persisting any
    /// migration the read required.
    fn load_current(&self, now: i64) -> Result<Store, StoreError> {
        let raw = self.backend.get(STORE_KEY)?;
        match migrate(raw.as_deref(), now)? {
            MigrationOutcome::Unchanged(store) => Ok(store),
            MigrationOutcome::Fresh(store) | MigrationOutcome::Migrated(store) => {
                self.persist(&store)?;
                Ok(store)
            }
        }
    }

    fn persist(&self, store: &Store) -> Result<(), StoreError> {
        let blob = serde_json::to_string(store)?;
        self.backend.set(STORE_KEY, &blob)?;
        Ok(())
    }

    fn rebuild_cache(&self, store: &Store) {
        *lock(&self.cache) = store.live_view();
    }
}
