//! FIFO serialization of ranking updates.
//!
//! Ranking writes are read-modify-write over shared backend keys, so
//! they must run strictly one at a time, in call order. [`SerialQueue`]
//! is the explicit form of the usual in-flight-flag-plus-array idiom:
//! the first caller drains the queue; anyone arriving while a drain is
//! in progress (including re-entrant calls from inside a job) only
//! enqueues, and the draining caller picks the job up in order.

use std::collections::VecDeque;
use std::sync::Mutex;

struct QueueInner<T> {
    pending: VecDeque<T>,
    busy: bool,
}

/// One-at-a-time job queue.
pub struct SerialQueue<T> {
    inner: Mutex<QueueInner<T>>,
}

impl<T> SerialQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                pending: VecDeque::new(),
                busy: false,
            }),
        }
    }

    /// Enqueue a job; drain the queue unless a drain is already running.
    ///
    /// Jobs enqueued mid-drain are processed by the draining caller's
    /// handler, so every enqueuer must supply the same handling logic.
    pub fn run<F>(&self, job: T, mut handler: F)
    where
        F: FnMut(T),
    {
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.pending.push_back(job);
            if inner.busy {
                return;
            }
            inner.busy = true;
        }
        loop {
            let next = {
                let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                match inner.pending.pop_front() {
                    Some(job) => job,
                    None => {
                        inner.busy = false;
                        return;
                    }
                }
            };
            handler(next);
        }
    }
}

impl<T> Default for SerialQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
