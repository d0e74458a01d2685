//! Tiercache - Dual-Tier Cache Engine
//!
//! An in-process cache optionally backed by a shared Redis store:
//! - Three caching levels: local only, remote only, or both with sync
//! - Local per-key TTL timers independent of remote expiration
//! - Type registry guarding reads of primitives, arrays and objects
//! - Keyspace-notification sync so `BOTH`-level keys follow writes made by
//!   other processes
//! - Per-key FIFO serialization of notification replay
//! - Single node and cluster deployments
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        TieredCache                           │
//! │   get_* / set_* / delete / dispose                           │
//! │      │                         │                             │
//! │      ▼                         ▼                             │
//! │  ┌────────────┐  ┌──────────────┐   ┌────────────────────┐   │
//! │  │ LocalStore │  │ TypeRegistry │   │    RemoteStore     │   │
//! │  │ (+ timers) │  │              │   │ (Redis / cluster)  │   │
//! │  └─────▲──────┘  └──────▲───────┘   └─────────┬──────────┘   │
//! │        │                │                     │ keyspace     │
//! │        │   ┌────────────┴─────────┐           │ events       │
//! │        └───┤      SyncEngine      │◄──────────┘              │
//! │            │  listener task       │                          │
//! │            │  + KeyLockQueue      │                          │
//! │            └──────────────────────┘                          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use tiercache::{CacheConfig, Level, TieredCache};
//!
//! let cache = TieredCache::connect(&CacheConfig::single("orders", "redis://localhost:6379")).await?;
//!
//! cache.set_primitive("greeting", Some("hello"), 60, Some(Level::BOTH)).await?;
//! let value = cache.get_primitive("greeting", false, true).await?;
//!
//! cache.dispose().await;
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod keys;
pub mod level;
pub mod local;
pub mod lock;
pub mod metrics;
pub mod redis;
pub mod registry;
pub mod remote;
pub mod sync;
pub mod value;

pub use cache::TieredCache;
pub use config::{CacheConfig, RemoteConfig};
pub use error::{CacheError, CacheResult};
pub use keys::KeyNamespace;
pub use level::Level;
pub use local::LocalStore;
pub use lock::{KeyLockGuard, KeyLockQueue, PendingLock};
pub use metrics::{register_metrics, CacheMetrics};
pub use registry::TypeRegistry;
pub use remote::{Notification, RemoteStore, Subscriber};
pub use self::redis::{RedisStore, RedisSubscriber};
pub use sync::{SyncEngine, SyncState};
pub use value::{CacheValue, Object, Primitive, ValueType};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cache::TieredCache;
    pub use crate::level::Level;
    pub use crate::value::{CacheValue, Object, Primitive, ValueType};
    pub use crate::{CacheConfig, CacheError, CacheResult};
}
