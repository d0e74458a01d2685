//! Redis implementation of the remote client adapter.

use super::{create_cluster, create_pool, node_url, RedisConnection};
use crate::config::RemoteConfig;
use crate::error::{CacheError, CacheResult};
use crate::metrics::CacheMetrics;
use crate::remote::{Notification, RemoteStore, Subscriber};
use async_trait::async_trait;
use deadpool_redis::Pool;
use futures::StreamExt;
use parking_lot::RwLock;
use redis::aio::PubSub;
use redis::cluster_async::ClusterConnection;
use redis::{AsyncCommands, RedisError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Shared handle that hands out clones until it is closed.
///
/// Closing drops the held value; outstanding clones live until their users
/// finish.
struct Closable<T: Clone> {
    slot: RwLock<Option<T>>,
}

impl<T: Clone> Closable<T> {
    fn new(value: T) -> Self {
        Self {
            slot: RwLock::new(Some(value)),
        }
    }

    fn get(&self) -> Option<T> {
        self.slot.read().clone()
    }

    fn close(&self) {
        drop(self.slot.write().take());
    }
}

enum Backend {
    Single { client: redis::Client, pool: Pool },
    Cluster {
        conn: Closable<ClusterConnection>,
        /// Node used for the dedicated subscriber connection.
        subscriber_client: redis::Client,
    },
}

/// Redis-backed remote store.
pub struct RedisStore {
    backend: Backend,
    database: i64,
    notify_keyspace_events: String,
    closed: AtomicBool,
}

impl RedisStore {
    /// Connect according to the remote configuration.
    pub async fn connect(config: &RemoteConfig) -> CacheResult<Self> {
        let first = config.endpoints.first().ok_or_else(|| {
            CacheError::Configuration("At least one Redis endpoint is required".to_string())
        })?;

        let backend = if config.is_cluster() {
            Backend::Cluster {
                conn: Closable::new(create_cluster(config).await?),
                subscriber_client: redis::Client::open(first.as_str())?,
            }
        } else {
            let url = node_url(first, config.database);
            Backend::Single {
                client: redis::Client::open(url.as_str())?,
                pool: create_pool(&url, config).await?,
            }
        };

        Ok(Self {
            backend,
            database: config.database,
            notify_keyspace_events: config.notify_keyspace_events.clone(),
            closed: AtomicBool::new(false),
        })
    }

    /// Get a connection.
    async fn conn(&self) -> CacheResult<RedisConnection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Disposed);
        }

        match &self.backend {
            Backend::Single { pool, .. } => Ok(RedisConnection::Pooled(pool.get().await?)),
            Backend::Cluster { conn, .. } => conn
                .get()
                .map(RedisConnection::Cluster)
                .ok_or(CacheError::Disposed),
        }
    }

    fn map_wrong_type(key: &str, err: RedisError) -> CacheError {
        if err.code() == Some("WRONGTYPE") {
            CacheError::WrongType(key.to_string())
        } else {
            CacheError::Redis(err)
        }
    }

    fn ttl_secs(ttl: Duration) -> i64 {
        i64::try_from(ttl.as_secs().max(1)).unwrap_or(i64::MAX)
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get_scalar(&self, key: &str) -> CacheResult<Option<String>> {
        let started = Instant::now();
        let mut conn = self.conn().await?;
        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| Self::map_wrong_type(key, e))?;

        CacheMetrics::remote_operation("get", started.elapsed());
        Ok(value)
    }

    async fn get_hash(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        let started = Instant::now();
        let mut conn = self.conn().await?;
        let fields: HashMap<String, String> = conn
            .hgetall(key)
            .await
            .map_err(|e| Self::map_wrong_type(key, e))?;

        CacheMetrics::remote_operation("hgetall", started.elapsed());
        Ok(fields)
    }

    async fn set_scalar(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let started = Instant::now();
        let mut conn = self.conn().await?;

        let mut pipe = redis::pipe();
        pipe.atomic().del(key).ignore().set(key, value).ignore();
        if !ttl.is_zero() {
            pipe.expire(key, Self::ttl_secs(ttl)).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;

        CacheMetrics::remote_operation("set", started.elapsed());
        debug!(key = %key, ttl_secs = ttl.as_secs(), "Wrote remote scalar");
        Ok(())
    }

    async fn set_hash(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> CacheResult<()> {
        let started = Instant::now();
        let mut conn = self.conn().await?;

        let mut pipe = redis::pipe();
        pipe.atomic().del(key).ignore().hset_multiple(key, fields).ignore();
        if !ttl.is_zero() {
            pipe.expire(key, Self::ttl_secs(ttl)).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;

        CacheMetrics::remote_operation("hset", started.elapsed());
        debug!(key = %key, fields = fields.len(), ttl_secs = ttl.as_secs(), "Wrote remote hash");
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let started = Instant::now();
        let mut conn = self.conn().await?;
        let deleted: i64 = conn.del(key).await?;

        CacheMetrics::remote_operation("del", started.elapsed());
        debug!(key = %key, deleted = deleted > 0, "Deleted remote key");
        Ok(())
    }

    async fn enable_notifications(&self) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        let _: () = redis::cmd("CONFIG")
            .arg("SET")
            .arg("notify-keyspace-events")
            .arg(&self.notify_keyspace_events)
            .query_async(&mut conn)
            .await?;

        info!(events = %self.notify_keyspace_events, "Enabled keyspace notifications");
        Ok(())
    }

    async fn subscriber(&self) -> CacheResult<Box<dyn Subscriber>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Disposed);
        }

        let client = match &self.backend {
            Backend::Single { client, .. } => client,
            Backend::Cluster {
                subscriber_client, ..
            } => subscriber_client,
        };

        let pubsub = client.get_async_pubsub().await?;
        info!("Opened dedicated subscriber connection");
        Ok(Box::new(RedisSubscriber { pubsub }))
    }

    fn database(&self) -> i64 {
        self.database
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        match &self.backend {
            Backend::Single { pool, .. } => pool.close(),
            Backend::Cluster { conn, .. } => conn.close(),
        }
        info!("Closed Redis connections");
    }
}

/// Dedicated pub/sub connection.
pub struct RedisSubscriber {
    pubsub: PubSub,
}

#[async_trait]
impl Subscriber for RedisSubscriber {
    async fn subscribe(&mut self, channel: &str) -> CacheResult<()> {
        self.pubsub.subscribe(channel).await?;
        Ok(())
    }

    async fn unsubscribe(&mut self, channel: &str) -> CacheResult<()> {
        self.pubsub.unsubscribe(channel).await?;
        Ok(())
    }

    async fn next_notification(&mut self) -> Option<Notification> {
        let mut messages = self.pubsub.on_message();
        loop {
            let msg = messages.next().await?;
            match msg.get_payload::<String>() {
                Ok(event) => {
                    return Some(Notification::new(msg.get_channel_name(), event));
                }
                Err(e) => {
                    warn!(
                        channel = %msg.get_channel_name(),
                        error = %e,
                        "Dropping notification with unreadable payload"
                    );
                }
            }
        }
    }
}
