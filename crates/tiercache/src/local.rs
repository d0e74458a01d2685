//! In-process store with per-key expiration timers.

use crate::registry::TypeRegistry;
use crate::value::{CacheValue, ValueType};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

struct LocalEntry {
    value: CacheValue,
    /// Bumped on every write so a stale timer never removes a newer value.
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl LocalEntry {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct Inner {
    entries: Mutex<HashMap<String, LocalEntry>>,
    registry: Arc<TypeRegistry>,
    generation: AtomicU64,
}

/// Local (in-memory) tier.
///
/// Expiry removes both the value and its type tag. Writing with a TTL must
/// happen inside a Tokio runtime since the timer is a spawned task.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<Inner>,
}

impl LocalStore {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                registry,
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<CacheValue> {
        self.inner
            .entries
            .lock()
            .get(key)
            .map(|entry| entry.value.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.entries.lock().contains_key(key)
    }

    /// Store a value, replacing any previous value and timer.
    ///
    /// A zero TTL keeps the value until it is deleted or overwritten.
    pub fn set(&self, key: &str, value: CacheValue, ttl: Duration) {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;

        let timer = if ttl.is_zero() {
            None
        } else {
            Some(Self::arm_timer(
                Arc::downgrade(&self.inner),
                key.to_string(),
                generation,
                ttl,
            ))
        };

        let mut entries = self.inner.entries.lock();
        if let Some(mut previous) = entries.insert(
            key.to_string(),
            LocalEntry {
                value,
                generation,
                timer,
            },
        ) {
            previous.cancel_timer();
        }
    }

    /// Record a key's type tag, ordered against expiry of the key's timer.
    pub fn tag(&self, key: &str, value_type: ValueType) {
        let _entries = self.inner.entries.lock();
        self.inner.registry.record(key, value_type);
    }

    /// Remove the value, its type tag and any timer. Idempotent.
    pub fn delete(&self, key: &str) {
        let mut entries = self.inner.entries.lock();
        if let Some(mut entry) = entries.remove(key) {
            entry.cancel_timer();
        }
        self.inner.registry.clear(key);
    }

    /// Cancel all timers and drop every value.
    pub fn clear(&self) {
        let mut entries = self.inner.entries.lock();
        for (_, mut entry) in entries.drain() {
            entry.cancel_timer();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }

    fn arm_timer(
        inner: Weak<Inner>,
        key: String,
        generation: u64,
        ttl: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;

            let Some(inner) = inner.upgrade() else {
                return;
            };

            let mut entries = inner.entries.lock();
            let current = entries.get(&key).map(|entry| entry.generation);
            if current == Some(generation) {
                entries.remove(&key);
                // tag cleared under the entries lock, ordered against `tag`
                inner.registry.clear(&key);
                drop(entries);
                debug!(key = %key, "Local entry expired");
            }
        })
    }
}
