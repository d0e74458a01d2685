//! Public cache facade combining the local and remote tiers.

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::keys::KeyNamespace;
use crate::level::Level;
use crate::local::LocalStore;
use crate::lock::KeyLockQueue;
use crate::metrics::CacheMetrics;
use crate::redis::RedisStore;
use crate::registry::TypeRegistry;
use crate::remote::RemoteStore;
use crate::sync::{SyncEngine, SyncState};
use crate::value::{
    decode_array, decode_object, encode_array, encode_object, CacheValue, Object, Primitive,
    ValueType,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Remote representation of a write.
enum Encoded {
    Scalar(String),
    Hash(Vec<(String, String)>),
}

/// Dual-tier cache.
///
/// Reads are served from the local tier when possible and fall back to the
/// remote store. Writes go to the tiers selected by their [`Level`]; `BOTH`
/// writes also subscribe the key to remote change notifications so the local
/// copy follows writes made by other processes.
pub struct TieredCache {
    namespace: KeyNamespace,
    local: LocalStore,
    registry: Arc<TypeRegistry>,
    remote: Option<Arc<dyn RemoteStore>>,
    sync: Option<SyncEngine>,
    disposed: AtomicBool,
}

impl TieredCache {
    /// Create an engine over an optional remote store.
    ///
    /// Without a remote store the engine runs local-only.
    pub fn new(instance_name: impl Into<String>, remote: Option<Arc<dyn RemoteStore>>) -> Self {
        let mut namespace = KeyNamespace::new(instance_name);
        if let Some(remote) = &remote {
            namespace = namespace.with_database(remote.database());
        }

        let registry = Arc::new(TypeRegistry::new());
        let local = LocalStore::new(registry.clone());

        let sync = remote.as_ref().map(|remote| {
            SyncEngine::new(
                namespace.clone(),
                remote.clone(),
                local.clone(),
                KeyLockQueue::new(),
            )
        });

        Self {
            namespace,
            local,
            registry,
            remote,
            sync,
            disposed: AtomicBool::new(false),
        }
    }

    /// Build an engine from configuration, connecting to Redis if endpoints are set.
    pub async fn connect(config: &CacheConfig) -> CacheResult<Self> {
        config.validate()?;

        let remote: Option<Arc<dyn RemoteStore>> = match config.active_remote() {
            Some(remote_config) => Some(Arc::new(RedisStore::connect(remote_config).await?)),
            None => {
                info!(instance = %config.instance_name, "No remote store configured, running local-only");
                None
            }
        };

        Ok(Self::new(config.instance_name.clone(), remote))
    }

    pub fn namespace(&self) -> &KeyNamespace {
        &self.namespace
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Synchronization state of a logical key.
    pub fn sync_state(&self, key: &str) -> SyncState {
        self.sync.as_ref().map_or(SyncState::Unsynced, |sync| {
            sync.state(&self.namespace.real_key(key))
        })
    }

    /// Remote notifications that failed to apply.
    pub fn sync_failures(&self) -> u64 {
        self.sync
            .as_ref()
            .map_or(0, SyncEngine::failed_notifications)
    }

    /// Local copy of a logical key, without falling back to the remote store.
    pub fn peek_local(&self, key: &str) -> Option<CacheValue> {
        self.local.get(&self.namespace.real_key(key))
    }

    /// Type tag currently recorded for a logical key.
    pub fn value_type(&self, key: &str) -> Option<ValueType> {
        self.registry.type_of(&self.namespace.real_key(key))
    }

    /// Read a scalar.
    ///
    /// `parse_type` coerces a remotely fetched string to a boolean or number
    /// when it looks like one.
    pub async fn get_primitive(
        &self,
        key: &str,
        force_remote: bool,
        parse_type: bool,
    ) -> CacheResult<Option<Primitive>> {
        self.ensure_active()?;
        let real_key = self.namespace.real_key(key);

        if !self.permits(&real_key, ValueType::Primitive) {
            return Ok(None);
        }

        if !force_remote {
            if let Some(value) = self.local.get(&real_key).and_then(CacheValue::into_primitive) {
                CacheMetrics::hit("local");
                return Ok(Some(value));
            }
            CacheMetrics::miss("local");
        }

        let Some(remote) = &self.remote else {
            return Ok(None);
        };

        match remote.get_scalar(&real_key).await {
            Ok(Some(raw)) => {
                CacheMetrics::hit("remote");
                Ok(Some(Primitive::decode(raw, parse_type)))
            }
            Ok(None) => {
                CacheMetrics::miss("remote");
                Ok(None)
            }
            Err(CacheError::WrongType(_)) => {
                CacheMetrics::type_mismatch();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Read an array.
    pub async fn get_array(
        &self,
        key: &str,
        force_remote: bool,
    ) -> CacheResult<Option<Vec<Primitive>>> {
        self.ensure_active()?;
        let real_key = self.namespace.real_key(key);

        if !self.permits(&real_key, ValueType::Array) {
            return Ok(None);
        }

        if !force_remote {
            if let Some(values) = self.local.get(&real_key).and_then(CacheValue::into_array) {
                CacheMetrics::hit("local");
                return Ok(Some(values));
            }
            CacheMetrics::miss("local");
        }

        let Some(remote) = &self.remote else {
            return Ok(None);
        };

        let raw = match remote.get_scalar(&real_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                CacheMetrics::miss("remote");
                return Ok(None);
            }
            Err(CacheError::WrongType(_)) => {
                CacheMetrics::type_mismatch();
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        match decode_array(&raw) {
            Ok(values) => {
                CacheMetrics::hit("remote");
                Ok(Some(values))
            }
            Err(e) => {
                debug!(key = %real_key, error = %e, "Remote value is not an array");
                CacheMetrics::type_mismatch();
                Ok(None)
            }
        }
    }

    /// Read a flat object.
    pub async fn get_object(
        &self,
        key: &str,
        force_remote: bool,
        parse_type: bool,
    ) -> CacheResult<Option<Object>> {
        self.ensure_active()?;
        let real_key = self.namespace.real_key(key);

        if !self.permits(&real_key, ValueType::Object) {
            return Ok(None);
        }

        if !force_remote {
            if let Some(fields) = self.local.get(&real_key).and_then(CacheValue::into_object) {
                CacheMetrics::hit("local");
                return Ok(Some(fields));
            }
            CacheMetrics::miss("local");
        }

        let Some(remote) = &self.remote else {
            return Ok(None);
        };

        match remote.get_hash(&real_key).await {
            Ok(fields) if fields.is_empty() => {
                CacheMetrics::miss("remote");
                Ok(None)
            }
            Ok(fields) => {
                CacheMetrics::hit("remote");
                Ok(Some(decode_object(fields, parse_type)))
            }
            Err(CacheError::WrongType(_)) => {
                CacheMetrics::type_mismatch();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Write a scalar. `None` is a no-op; a zero TTL never expires.
    pub async fn set_primitive<V: Into<Primitive>>(
        &self,
        key: &str,
        value: Option<V>,
        ttl_secs: u64,
        level: Option<Level>,
    ) -> CacheResult<()> {
        self.ensure_active()?;
        let Some(value) = value else {
            return Ok(());
        };

        let value = value.into();
        let encoded = Encoded::Scalar(value.encode());
        self.write(key, CacheValue::Primitive(value), encoded, ttl_secs, level)
            .await
    }

    /// Write an array. Stored remotely as a serialized scalar.
    pub async fn set_array(
        &self,
        key: &str,
        values: &[Primitive],
        ttl_secs: u64,
        level: Option<Level>,
    ) -> CacheResult<()> {
        self.ensure_active()?;
        let encoded = Encoded::Scalar(encode_array(values)?);
        self.write(key, CacheValue::Array(values.to_vec()), encoded, ttl_secs, level)
            .await
    }

    /// Write a flat object. Stored remotely as a hash; an empty object is a no-op.
    pub async fn set_object(
        &self,
        key: &str,
        fields: &Object,
        ttl_secs: u64,
        level: Option<Level>,
    ) -> CacheResult<()> {
        self.ensure_active()?;
        if fields.is_empty() {
            debug!(key = %key, "Skipping write of empty object");
            return Ok(());
        }

        let encoded = Encoded::Hash(encode_object(fields));
        self.write(key, CacheValue::Object(fields.clone()), encoded, ttl_secs, level)
            .await
    }

    /// Remove a key from both tiers and stop synchronizing it. Idempotent.
    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        self.ensure_active()?;
        let real_key = self.namespace.real_key(key);

        // unsubscribe first so an in-flight replay cannot restore the value
        let unsubscribed = match &self.sync {
            Some(sync) => sync.remove(&real_key).await,
            None => Ok(()),
        };

        self.local.delete(&real_key);
        unsubscribed?;

        if let Some(remote) = &self.remote {
            remote.delete(&real_key).await?;
        }

        debug!(key = %real_key, "Deleted key");
        Ok(())
    }

    /// Stop synchronization, cancel local timers, drop all local state and
    /// close remote connections. Later calls are no-ops; every other
    /// operation fails with [`CacheError::Disposed`] afterwards.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(sync) = &self.sync {
            sync.shutdown().await;
        }

        self.local.clear();
        self.registry.clear_all();

        if let Some(remote) = &self.remote {
            remote.close().await;
        }

        info!(instance = %self.namespace.instance(), "Cache engine disposed");
    }

    async fn write(
        &self,
        key: &str,
        value: CacheValue,
        encoded: Encoded,
        ttl_secs: u64,
        level: Option<Level>,
    ) -> CacheResult<()> {
        let level = Level::resolve(level, self.remote.is_some());
        let remote = if level.is_remote() {
            Some(self.remote.as_ref().ok_or(CacheError::RemoteUnavailable)?)
        } else {
            None
        };

        let real_key = self.namespace.real_key(key);
        let shape = value.value_type();
        let ttl = Duration::from_secs(ttl_secs);
        let sync = self.sync.as_ref().filter(|_| level.is_synced());

        if let Some(sync) = sync {
            // replay of this write's own notifications must see the new shape and TTL
            sync.track(&real_key, shape, ttl);
        }

        if level.is_local() {
            self.local.set(&real_key, value, ttl);
        }
        self.local.tag(&real_key, shape);

        if let Some(remote) = remote {
            match &encoded {
                Encoded::Scalar(raw) => remote.set_scalar(&real_key, raw, ttl).await?,
                Encoded::Hash(fields) => remote.set_hash(&real_key, fields, ttl).await?,
            }
        }

        if let Some(sync) = sync {
            sync.ensure_synced(&real_key, shape, ttl).await?;
        }

        CacheMetrics::write(&level.to_string());
        debug!(key = %real_key, level = %level, value_type = %shape, ttl_secs, "Cached value");
        Ok(())
    }

    fn permits(&self, real_key: &str, requested: ValueType) -> bool {
        let permitted = self.registry.permits(real_key, requested);
        if !permitted {
            CacheMetrics::type_mismatch();
            debug!(key = %real_key, requested = %requested, "Type mismatch");
        }
        permitted
    }

    fn ensure_active(&self) -> CacheResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(CacheError::Disposed)
        } else {
            Ok(())
        }
    }
}
