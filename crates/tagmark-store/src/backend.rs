//! Key-value persistence primitive.
//!
//! The host environment supplies a generic string-keyed store with change
//! notification; everything tagmark persists goes through this trait as
//! whole-value reads and writes. Change notices fire for every write,
//! including the caller's own, which is how cross-context modification is
//! observed: two logical contexts sharing one backend each see the
//! other's writes.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use thiserror::Error;

/// Errors from the underlying persistence primitive.
///
/// Never retried automatically; the caller decides.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend read failed: {0}")]
    Read(String),
    #[error("backend write failed: {0}")]
    Write(String),
}

/// A key changed, by this context or another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    pub key: String,
}

/// The persistence contract supplied by the host environment.
pub trait KeyValueBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    fn set(&self, key: &str, value: &str) -> Result<(), BackendError>;

    /// Subscribe to changes of one key. Returns a channel of notices;
    /// delivery is at-least-once, so consumers must be idempotent.
    fn subscribe(&self, key: &str) -> Receiver<ChangeNotice>;
}

/// In-memory backend, shared via `Arc` across logical contexts.
#[derive(Default)]
pub struct MemoryBackend {
    values: Mutex<BTreeMap<String, String>>,
    subscribers: Mutex<Vec<(String, Sender<ChangeNotice>)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let values = self
            .values
            .lock()
            .map_err(|e| BackendError::Read(e.to_string()))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
        {
            let mut values = self
                .values
                .lock()
                .map_err(|e| BackendError::Write(e.to_string()))?;
            values.insert(key.to_string(), value.to_string());
        }
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|e| BackendError::Write(e.to_string()))?;
        // Drop subscribers whose receiving end has gone away.
        subscribers.retain(|(watched, tx)| {
            watched != key
                || tx
                    .send(ChangeNotice {
                        key: key.to_string(),
                    })
                    .is_ok()
        });
        Ok(())
    }

    fn subscribe(&self, key: &str) -> Receiver<ChangeNotice> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push((key.to_string(), tx));
        }
        rx
    }
}
