//! Per-key FIFO lock queue.
//!
//! At most one holder per key; waiters are resumed in arrival order. Keys are
//! independent of each other. A key's entry exists only while it is held and
//! is removed when the last holder releases it.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::trace;

type Waiters = VecDeque<oneshot::Sender<()>>;

#[derive(Debug, Default)]
struct Inner {
    /// Present while the key is held; the deque holds waiters behind the holder.
    queues: Mutex<HashMap<String, Waiters>>,
}

impl Inner {
    /// Hand the lock to the next live waiter, or drop the key entry.
    fn release(&self, key: &str) {
        let mut queues = self.queues.lock();
        let Some(waiters) = queues.get_mut(key) else {
            return;
        };

        while let Some(next) = waiters.pop_front() {
            if next.send(()).is_ok() {
                trace!(key = %key, "Key lock handed over");
                return;
            }
            // waiter gave up; try the one behind it
        }

        queues.remove(key);
        trace!(key = %key, "Key lock released");
    }
}

/// FIFO serialization primitive keyed by string.
#[derive(Clone, Default)]
pub struct KeyLockQueue {
    inner: Arc<Inner>,
}

impl KeyLockQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a place in the key's queue.
    ///
    /// The position is fixed at call time, so callers that need arrival order
    /// call this synchronously and await [`PendingLock::wait`] later.
    pub fn acquire(&self, key: &str) -> PendingLock {
        let mut queues = self.inner.queues.lock();
        let waiter = match queues.get_mut(key) {
            Some(waiters) => {
                let (tx, rx) = oneshot::channel();
                waiters.push_back(tx);
                Some(rx)
            }
            None => {
                queues.insert(key.to_string(), VecDeque::new());
                None
            }
        };

        PendingLock {
            inner: self.inner.clone(),
            key: key.to_string(),
            waiter,
            acquired: false,
        }
    }

    /// Acquire and wait in one step.
    pub async fn lock(&self, key: &str) -> KeyLockGuard {
        self.acquire(key).wait().await
    }

    /// Release a key held without a guard. No-op for keys that are not held.
    pub fn release(&self, key: &str) {
        self.inner.release(key);
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.inner.queues.lock().contains_key(key)
    }

    /// Number of waiters queued behind the current holder.
    pub fn waiting(&self, key: &str) -> usize {
        self.inner.queues.lock().get(key).map_or(0, VecDeque::len)
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.inner.queues.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.queues.lock().is_empty()
    }
}

/// A queued lock request.
///
/// Dropping it before the lock is obtained gives up the place in line; if the
/// lock was already handed over, dropping passes it on.
pub struct PendingLock {
    inner: Arc<Inner>,
    key: String,
    waiter: Option<oneshot::Receiver<()>>,
    acquired: bool,
}

impl PendingLock {
    /// Wait until every earlier holder of the key has released it.
    pub async fn wait(mut self) -> KeyLockGuard {
        if let Some(rx) = self.waiter.as_mut() {
            // A closed sender only happens when the queue itself went away,
            // in which case nobody else holds the key either.
            let _ = rx.await;
        }
        self.waiter = None;
        self.acquired = true;

        KeyLockGuard {
            inner: self.inner.clone(),
            key: self.key.clone(),
        }
    }
}

impl Drop for PendingLock {
    fn drop(&mut self) {
        if self.acquired {
            return;
        }

        match self.waiter.take() {
            // granted immediately but never awaited
            None => self.inner.release(&self.key),
            Some(mut rx) => {
                rx.close();
                if rx.try_recv().is_ok() {
                    self.inner.release(&self.key);
                }
            }
        }
    }
}

/// Held lock; releases on drop.
#[derive(Debug)]
pub struct KeyLockGuard {
    inner: Arc<Inner>,
    key: String,
}

impl KeyLockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyLockGuard {
    fn drop(&mut self) {
        self.inner.release(&self.key);
    }
}
