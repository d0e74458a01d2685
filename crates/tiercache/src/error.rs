//! Cache error types.

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-related errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Redis pool error.
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A remote level was requested but no remote store is configured.
    #[error("No remote store configured")]
    RemoteUnavailable,

    /// The remote store holds a value of a different shape under this key.
    #[error("Wrong value type for key '{0}'")]
    WrongType(String),

    /// Subscription or notification listener failure.
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// The engine has been disposed.
    #[error("Cache engine disposed")]
    Disposed,
}

impl CacheError {
    /// Returns true if this error comes from the transport and may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CacheError::Redis(_) | CacheError::Pool(_) | CacheError::Subscription(_)
        )
    }
}
