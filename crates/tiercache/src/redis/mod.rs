//! Redis-backed remote store.

mod connection;
mod store;

pub use connection::RedisConnection;
pub use store::{RedisStore, RedisSubscriber};

use crate::config::RemoteConfig;
use crate::error::{CacheError, CacheResult};
use deadpool_redis::{Config, Pool, Runtime};
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use tracing::info;

/// Create a Redis connection pool for a single node.
pub async fn create_pool(url: &str, config: &RemoteConfig) -> CacheResult<Pool> {
    info!(url = %url, "Creating Redis connection pool for cache...");

    let cfg = Config::from_url(url);

    let pool = cfg
        .builder()
        .map_err(|e| CacheError::Configuration(format!("Invalid Redis config: {}", e)))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .create_timeout(Some(config.connect_timeout()))
        .build()
        .map_err(|e| CacheError::Configuration(format!("Failed to create pool: {}", e)))?;

    // Test connection
    let mut conn = pool.get().await?;
    redis::cmd("PING")
        .query_async::<String>(&mut *conn)
        .await?;

    info!("Redis connection pool created successfully");

    Ok(pool)
}

/// Point a node URL at the given logical database, keeping any query string.
pub fn node_url(url: &str, database: i64) -> String {
    if database == 0 {
        return url.to_string();
    }

    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (url, None),
    };
    let authority = base.find("://").map_or(0, |i| i + 3);
    let root = match base[authority..].find('/') {
        Some(i) => &base[..authority + i],
        None => base,
    };

    let mut node = format!("{}/{}", root, database);
    if let Some(query) = query {
        node.push('?');
        node.push_str(query);
    }
    node
}

/// Connect to a Redis cluster.
pub async fn create_cluster(config: &RemoteConfig) -> CacheResult<ClusterConnection> {
    info!(nodes = ?config.endpoints, "Connecting to Redis cluster for cache...");

    let client = ClusterClient::builder(config.endpoints.clone())
        .connection_timeout(config.connect_timeout())
        .build()?;
    let mut conn = client.get_async_connection().await?;

    redis::cmd("PING")
        .query_async::<String>(&mut conn)
        .await?;

    info!("Redis cluster connection established");

    Ok(conn)
}
