//! Remote client adapter interface.
//!
//! The engine talks to the shared store only through [`RemoteStore`]. Failures
//! are returned unchanged; retry policy belongs to the underlying client.

use crate::error::CacheResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// A change notification received on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Channel the message arrived on.
    pub channel: String,
    /// Event name, e.g. `set`, `hset`, `del`.
    pub event: String,
}

impl Notification {
    pub fn new(channel: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            event: event.into(),
        }
    }
}

/// Commands the engine needs from the remote key-value store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// `GET key`.
    async fn get_scalar(&self, key: &str) -> CacheResult<Option<String>>;

    /// `HGETALL key`. An absent key yields an empty map.
    async fn get_hash(&self, key: &str) -> CacheResult<HashMap<String, String>>;

    /// Atomic `DEL`, `SET` and, for a non-zero TTL, `EXPIRE`.
    async fn set_scalar(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// Atomic `DEL`, `HSET` and, for a non-zero TTL, `EXPIRE`.
    async fn set_hash(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> CacheResult<()>;

    /// `DEL key`.
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Enable keyspace notifications. Idempotent.
    async fn enable_notifications(&self) -> CacheResult<()>;

    /// Open a dedicated subscriber connection.
    async fn subscriber(&self) -> CacheResult<Box<dyn Subscriber>>;

    /// Logical database index notifications are published for.
    fn database(&self) -> i64 {
        0
    }

    /// Close all connections owned by the adapter.
    async fn close(&self);
}

/// A dedicated publish/subscribe connection.
#[async_trait]
pub trait Subscriber: Send {
    async fn subscribe(&mut self, channel: &str) -> CacheResult<()>;

    async fn unsubscribe(&mut self, channel: &str) -> CacheResult<()>;

    /// Next notification; `None` once the connection is gone.
    ///
    /// Must be cancel-safe: it is raced against subscription commands.
    async fn next_notification(&mut self) -> Option<Notification>;
}
