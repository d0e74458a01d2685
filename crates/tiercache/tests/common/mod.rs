//! Common test infrastructure: an in-memory remote store that publishes
//! keyspace notifications the way Redis does.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tiercache::{CacheError, CacheResult, Notification, RemoteStore, Subscriber, TieredCache};
use tokio::sync::mpsc;

struct SubscriberHandle {
    channels: Arc<Mutex<HashSet<String>>>,
    tx: mpsc::UnboundedSender<Notification>,
}

#[derive(Default)]
struct State {
    scalars: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
    subscribers: Vec<SubscriberHandle>,
    fetch_delays: HashMap<String, VecDeque<Duration>>,
    enable_calls: usize,
    subscribe_calls: usize,
    closed: bool,
}

impl State {
    fn publish(&mut self, key: &str, event: &str) {
        let channel = format!("__keyspace@0__:{}", key);
        self.subscribers.retain(|sub| !sub.tx.is_closed());
        for sub in &self.subscribers {
            if sub.channels.lock().contains(&channel) {
                let _ = sub.tx.send(Notification::new(channel.clone(), event));
            }
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        let existed =
            self.scalars.remove(key).is_some() | self.hashes.remove(key).is_some();
        if existed {
            self.publish(key, "del");
        }
        existed
    }
}

/// In-memory stand-in for a shared Redis instance.
#[derive(Clone, Default)]
pub struct FakeRemote {
    state: Arc<Mutex<State>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine backed by this store.
    pub fn cache(&self, instance: &str) -> TieredCache {
        TieredCache::new(instance, Some(Arc::new(self.clone()) as Arc<dyn RemoteStore>))
    }

    /// Write a scalar as another process would.
    pub fn external_set(&self, key: &str, value: &str) {
        let mut state = self.state.lock();
        state.remove(key);
        state.scalars.insert(key.to_string(), value.to_string());
        state.publish(key, "set");
    }

    /// Write hash fields as another process would.
    pub fn external_hset(&self, key: &str, fields: &[(&str, &str)]) {
        let mut state = self.state.lock();
        let hash = state.hashes.entry(key.to_string()).or_default();
        for (name, value) in fields {
            hash.insert((*name).to_string(), (*value).to_string());
        }
        state.publish(key, "hset");
    }

    /// Delete a key as another process would.
    pub fn external_del(&self, key: &str) {
        self.state.lock().remove(key);
    }

    /// Drop a key as if its remote TTL elapsed.
    pub fn expire_now(&self, key: &str) {
        let mut state = self.state.lock();
        let existed =
            state.scalars.remove(key).is_some() | state.hashes.remove(key).is_some();
        if existed {
            state.publish(key, "expired");
        }
    }

    /// Make the next fetch of `key` take `delay`; the value is read before the delay.
    pub fn delay_next_fetch(&self, key: &str, delay: Duration) {
        self.state
            .lock()
            .fetch_delays
            .entry(key.to_string())
            .or_default()
            .push_back(delay);
    }

    /// End every open subscriber stream, as a dropped pub/sub connection would.
    pub fn end_subscriptions(&self) {
        self.state.lock().subscribers.clear();
    }

    pub fn scalar(&self, key: &str) -> Option<String> {
        self.state.lock().scalars.get(key).cloned()
    }

    pub fn hash(&self, key: &str) -> Option<HashMap<String, String>> {
        self.state.lock().hashes.get(key).cloned()
    }

    pub fn enable_calls(&self) -> usize {
        self.state.lock().enable_calls
    }

    pub fn subscribe_calls(&self) -> usize {
        self.state.lock().subscribe_calls
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn take_delay(&self, key: &str) -> Option<Duration> {
        self.state
            .lock()
            .fetch_delays
            .get_mut(key)
            .and_then(VecDeque::pop_front)
    }

    fn check_open(&self) -> CacheResult<()> {
        if self.state.lock().closed {
            Err(CacheError::Disposed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn get_scalar(&self, key: &str) -> CacheResult<Option<String>> {
        self.check_open()?;
        let value = {
            let state = self.state.lock();
            if state.hashes.contains_key(key) {
                return Err(CacheError::WrongType(key.to_string()));
            }
            state.scalars.get(key).cloned()
        };

        if let Some(delay) = self.take_delay(key) {
            tokio::time::sleep(delay).await;
        }
        Ok(value)
    }

    async fn get_hash(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        self.check_open()?;
        let value = {
            let state = self.state.lock();
            if state.scalars.contains_key(key) {
                return Err(CacheError::WrongType(key.to_string()));
            }
            state.hashes.get(key).cloned().unwrap_or_default()
        };

        if let Some(delay) = self.take_delay(key) {
            tokio::time::sleep(delay).await;
        }
        Ok(value)
    }

    async fn set_scalar(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.check_open()?;
        let mut state = self.state.lock();
        state.remove(key);
        state.scalars.insert(key.to_string(), value.to_string());
        state.publish(key, "set");
        if !ttl.is_zero() {
            state.publish(key, "expire");
        }
        Ok(())
    }

    async fn set_hash(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> CacheResult<()> {
        self.check_open()?;
        let mut state = self.state.lock();
        state.remove(key);
        state
            .hashes
            .insert(key.to_string(), fields.iter().cloned().collect());
        state.publish(key, "hset");
        if !ttl.is_zero() {
            state.publish(key, "expire");
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.check_open()?;
        self.state.lock().remove(key);
        Ok(())
    }

    async fn enable_notifications(&self) -> CacheResult<()> {
        self.check_open()?;
        self.state.lock().enable_calls += 1;
        Ok(())
    }

    async fn subscriber(&self) -> CacheResult<Box<dyn Subscriber>> {
        self.check_open()?;
        let channels = Arc::new(Mutex::new(HashSet::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().subscribers.push(SubscriberHandle {
            channels: channels.clone(),
            tx,
        });

        Ok(Box::new(FakeSubscriber {
            remote: self.clone(),
            channels,
            rx,
        }))
    }

    async fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.subscribers.clear();
    }
}

struct FakeSubscriber {
    remote: FakeRemote,
    channels: Arc<Mutex<HashSet<String>>>,
    rx: mpsc::UnboundedReceiver<Notification>,
}

#[async_trait]
impl Subscriber for FakeSubscriber {
    async fn subscribe(&mut self, channel: &str) -> CacheResult<()> {
        self.remote.state.lock().subscribe_calls += 1;
        self.channels.lock().insert(channel.to_string());
        Ok(())
    }

    async fn unsubscribe(&mut self, channel: &str) -> CacheResult<()> {
        self.channels.lock().remove(channel);
        Ok(())
    }

    async fn next_notification(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Run a future with a test timeout.
pub async fn within<T>(timeout: Duration, fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(timeout, fut)
        .await
        .expect("operation timed out")
}
