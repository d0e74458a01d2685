//! Sync engine: replays remote change notifications into the local tier.
//!
//! Per key the engine moves `Unsynced -> Subscribing -> Synced` on the first
//! `BOTH`-level write and back to unsynced on delete. A single listener task
//! owns the dedicated subscriber connection; each notification is applied
//! under the key's lock so updates for one key land in arrival order while
//! different keys proceed concurrently.

use crate::error::{CacheError, CacheResult};
use crate::keys::KeyNamespace;
use crate::local::LocalStore;
use crate::lock::KeyLockQueue;
use crate::metrics::CacheMetrics;
use crate::remote::{Notification, RemoteStore, Subscriber};
use crate::value::{decode_array, decode_object, CacheValue, Primitive, ValueType};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Synchronization state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Unsynced,
    Subscribing,
    Synced,
}

#[derive(Debug, Clone, Copy)]
struct Subscription {
    state: SyncState,
    /// Shape of the last `BOTH` write; decides how a `set` event is decoded.
    shape: ValueType,
    /// Local expiry of the last `BOTH` write, kept across replays.
    deadline: Option<Instant>,
}

fn deadline_after(ttl: Duration) -> Option<Instant> {
    (!ttl.is_zero()).then(|| Instant::now() + ttl)
}

/// Local effect of a replayed notification.
enum Replay {
    Store(CacheValue),
    Clear,
}

enum Command {
    Subscribe {
        channel: String,
        reply: oneshot::Sender<CacheResult<()>>,
    },
    Unsubscribe {
        channel: String,
        reply: oneshot::Sender<CacheResult<()>>,
    },
}

struct Listener {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

/// State shared between the engine and its listener task.
struct Shared {
    namespace: KeyNamespace,
    remote: Arc<dyn RemoteStore>,
    local: LocalStore,
    locks: KeyLockQueue,
    subscriptions: Mutex<HashMap<String, Subscription>>,
    failures: AtomicU64,
}

impl Shared {
    /// Apply a replay to the local tier if the key is still subscribed.
    ///
    /// Runs under the subscription map lock; an unsubscribe that lands first
    /// drops the replay.
    fn commit(&self, key: &str, replay: Replay) -> bool {
        let subscriptions = self.subscriptions.lock();
        let Some(subscription) = subscriptions.get(key) else {
            return false;
        };

        match replay {
            Replay::Clear => self.local.delete(key),
            Replay::Store(value) => {
                let ttl = match subscription.deadline {
                    None => Duration::ZERO,
                    Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                };
                if subscription.deadline.is_some() && ttl.is_zero() {
                    // local lifetime already over
                    self.local.delete(key);
                } else {
                    let value_type = value.value_type();
                    self.local.set(key, value, ttl);
                    self.local.tag(key, value_type);
                }
            }
        }
        true
    }

    /// Re-fetch the key and write the result into the local tier.
    async fn apply(&self, key: &str, event: &str) -> CacheResult<()> {
        let (replay, failure) = match event {
            "set" => {
                let shape = self.subscriptions.lock().get(key).map(|s| s.shape);
                match self.remote.get_scalar(key).await? {
                    None => (Replay::Clear, None),
                    Some(raw) if shape == Some(ValueType::Array) => match decode_array(&raw) {
                        Ok(values) => (Replay::Store(CacheValue::Array(values)), None),
                        Err(e) => (Replay::Clear, Some(e)),
                    },
                    Some(raw) => (
                        Replay::Store(CacheValue::Primitive(Primitive::parse(&raw))),
                        None,
                    ),
                }
            }
            "hset" => {
                let fields = self.remote.get_hash(key).await?;
                if fields.is_empty() {
                    (Replay::Clear, None)
                } else {
                    (Replay::Store(CacheValue::Object(decode_object(fields, true))), None)
                }
            }
            "del" | "expired" | "evicted" => (Replay::Clear, None),
            _ => {
                trace!(key = %key, event = %event, "Ignoring notification event");
                return Ok(());
            }
        };

        if !self.commit(key, replay) {
            trace!(key = %key, event = %event, "Dropping replay for unsubscribed key");
            return Ok(());
        }
        if let Some(e) = failure {
            return Err(e);
        }

        CacheMetrics::notification_applied(event);
        debug!(key = %key, event = %event, "Applied remote notification");
        Ok(())
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        CacheMetrics::notification_failed();
    }

    /// Drop local copies of every subscribed key; nothing keeps them fresh.
    fn drop_local_copies(&self) {
        let subscriptions = self.subscriptions.lock();
        for key in subscriptions.keys() {
            self.local.delete(key);
        }
        warn!(keys = subscriptions.len(), "Dropped local copies of synced keys");
    }

    /// Queue a notification behind earlier ones for the same key.
    fn dispatch(self: &Arc<Self>, tasks: &mut JoinSet<()>, notification: Notification) {
        let Some(key) = self.namespace.key_from_channel(&notification.channel) else {
            warn!(channel = %notification.channel, "Ignoring notification on unexpected channel");
            self.record_failure();
            return;
        };
        let key = key.to_string();

        if !self.subscriptions.lock().contains_key(&key) {
            trace!(key = %key, "Ignoring notification for unsubscribed key");
            return;
        }

        // the queue position is taken here, in arrival order
        let pending = self.locks.acquire(&key);
        let shared = self.clone();
        tasks.spawn(async move {
            let _guard = pending.wait().await;
            if let Err(e) = shared.apply(&key, &notification.event).await {
                shared.record_failure();
                warn!(
                    key = %key,
                    event = %notification.event,
                    error = %e,
                    "Failed to apply remote notification"
                );
            }
        });
    }

    fn publish_gauge(&self) {
        CacheMetrics::subscriptions_active(self.subscriptions.lock().len());
    }
}

/// Keeps subscribed keys of the local tier consistent with the remote store.
pub struct SyncEngine {
    shared: Arc<Shared>,
    listener: tokio::sync::Mutex<Option<Listener>>,
    notifications_enabled: AtomicBool,
}

impl SyncEngine {
    pub fn new(
        namespace: KeyNamespace,
        remote: Arc<dyn RemoteStore>,
        local: LocalStore,
        locks: KeyLockQueue,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                namespace,
                remote,
                local,
                locks,
                subscriptions: Mutex::new(HashMap::new()),
                failures: AtomicU64::new(0),
            }),
            listener: tokio::sync::Mutex::new(None),
            notifications_enabled: AtomicBool::new(false),
        }
    }

    /// Current state of a key.
    pub fn state(&self, key: &str) -> SyncState {
        self.shared
            .subscriptions
            .lock()
            .get(key)
            .map_or(SyncState::Unsynced, |s| s.state)
    }

    /// Number of keys subscribed or subscribing.
    pub fn subscription_count(&self) -> usize {
        self.shared.subscriptions.lock().len()
    }

    /// Notifications that could not be applied since the engine started.
    pub fn failed_notifications(&self) -> u64 {
        self.shared.failures.load(Ordering::Relaxed)
    }

    /// Note the shape and local TTL of a `BOTH` write on an already
    /// subscribed key. Call before the write reaches the remote store.
    pub fn track(&self, key: &str, shape: ValueType, ttl: Duration) {
        if let Some(subscription) = self.shared.subscriptions.lock().get_mut(key) {
            subscription.shape = shape;
            subscription.deadline = deadline_after(ttl);
        }
    }

    /// Subscribe to a key's change channel unless already subscribed.
    ///
    /// Resolves once the subscription is acknowledged. A caller that finds
    /// the key already subscribing shares that subscription and returns at
    /// once. For a synced key the listener is restarted if it has died.
    pub async fn ensure_synced(
        &self,
        key: &str,
        shape: ValueType,
        ttl: Duration,
    ) -> CacheResult<()> {
        let existing = {
            let mut subscriptions = self.shared.subscriptions.lock();
            match subscriptions.get_mut(key) {
                Some(subscription) => {
                    subscription.shape = shape;
                    subscription.deadline = deadline_after(ttl);
                    Some(subscription.state)
                }
                None => {
                    subscriptions.insert(
                        key.to_string(),
                        Subscription {
                            state: SyncState::Subscribing,
                            shape,
                            deadline: deadline_after(ttl),
                        },
                    );
                    None
                }
            }
        };

        match existing {
            Some(SyncState::Synced) => {
                // a restarted listener resubscribes every synced key
                self.commands().await?;
                return Ok(());
            }
            Some(_) => return Ok(()),
            None => {}
        }

        let channel = self.shared.namespace.channel(key);
        let result = self
            .request(|reply| Command::Subscribe {
                channel: channel.clone(),
                reply,
            })
            .await;

        let still_wanted = {
            let mut subscriptions = self.shared.subscriptions.lock();
            match (&result, subscriptions.get_mut(key)) {
                (Ok(()), Some(subscription)) => {
                    subscription.state = SyncState::Synced;
                    true
                }
                (Err(_), Some(_)) => {
                    subscriptions.remove(key);
                    true
                }
                (_, None) => false,
            }
        };
        self.shared.publish_gauge();

        if result.is_ok() && !still_wanted {
            // deleted while the subscribe was in flight
            self.request(|reply| Command::Unsubscribe { channel, reply })
                .await?;
            return Ok(());
        }

        if result.is_ok() {
            debug!(key = %key, "Key synchronized");
        }
        result
    }

    /// Drop a key's subscription. No-op for keys that are not subscribed.
    pub async fn remove(&self, key: &str) -> CacheResult<()> {
        let existed = self.shared.subscriptions.lock().remove(key).is_some();
        if !existed {
            return Ok(());
        }
        self.shared.publish_gauge();

        let commands = match self.listener.lock().await.as_ref() {
            Some(listener) if !listener.task.is_finished() => listener.commands.clone(),
            _ => return Ok(()),
        };

        let channel = self.shared.namespace.channel(key);
        let (reply, rx) = oneshot::channel();
        if commands.send(Command::Unsubscribe { channel, reply }).is_err() {
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))?;

        debug!(key = %key, "Key unsubscribed");
        Ok(())
    }

    /// Stop the listener, abort in-flight notification work and forget all
    /// subscriptions. Safe to call more than once.
    pub async fn shutdown(&self) {
        if let Some(listener) = self.listener.lock().await.take() {
            drop(listener.commands);
            listener.task.abort();
            let _ = listener.task.await;
            info!("Sync listener stopped");
        }

        self.shared.subscriptions.lock().clear();
        self.shared.publish_gauge();
    }

    /// Send a command to the listener, starting it first if needed.
    async fn request<F>(&self, build: F) -> CacheResult<()>
    where
        F: FnOnce(oneshot::Sender<CacheResult<()>>) -> Command,
    {
        let commands = self.commands().await?;

        let (reply, rx) = oneshot::channel();
        commands
            .send(build(reply))
            .map_err(|_| CacheError::Subscription("listener stopped".into()))?;

        rx.await
            .map_err(|_| CacheError::Subscription("listener dropped the request".into()))?
    }

    /// Command channel of a live listener, starting or restarting it if needed.
    async fn commands(&self) -> CacheResult<mpsc::UnboundedSender<Command>> {
        let mut listener = self.listener.lock().await;
        let alive = listener
            .as_ref()
            .map_or(false, |l| !l.task.is_finished() && !l.commands.is_closed());

        if !alive {
            if listener.is_some() {
                warn!("Sync listener stopped unexpectedly, restarting");
            }
            *listener = Some(self.start_listener().await?);
        }

        match listener.as_ref() {
            Some(l) => Ok(l.commands.clone()),
            None => Err(CacheError::Subscription("listener not running".into())),
        }
    }

    async fn start_listener(&self) -> CacheResult<Listener> {
        if !self.notifications_enabled.load(Ordering::Acquire) {
            self.shared.remote.enable_notifications().await?;
            self.notifications_enabled.store(true, Ordering::Release);
        }

        let mut subscriber = self.shared.remote.subscriber().await?;

        // after a restart, resubscribe keys that were already synced
        let channels: Vec<String> = self
            .shared
            .subscriptions
            .lock()
            .iter()
            .filter(|(_, s)| s.state == SyncState::Synced)
            .map(|(key, _)| self.shared.namespace.channel(key))
            .collect();
        for channel in &channels {
            subscriber.subscribe(channel).await?;
        }

        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(Self::run(self.shared.clone(), subscriber, rx));

        info!(resubscribed = channels.len(), "Sync listener started");
        Ok(Listener { commands, task })
    }

    async fn run(
        shared: Arc<Shared>,
        mut subscriber: Box<dyn Subscriber>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        let mut tasks = JoinSet::new();
        let mut subscriber_lost = false;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Subscribe { channel, reply }) => {
                        let result = subscriber.subscribe(&channel).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Unsubscribe { channel, reply }) => {
                        let result = subscriber.unsubscribe(&channel).await;
                        let _ = reply.send(result);
                    }
                    None => {
                        debug!("Sync command channel closed");
                        break;
                    }
                },

                notification = subscriber.next_notification() => match notification {
                    Some(notification) => shared.dispatch(&mut tasks, notification),
                    None => {
                        error!("Subscriber connection closed");
                        subscriber_lost = true;
                        break;
                    }
                },

                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = result {
                        if e.is_panic() {
                            error!(error = %e, "Notification task panicked");
                        }
                    }
                }
            }
        }

        tasks.shutdown().await;
        if subscriber_lost {
            shared.drop_local_copies();
        }
    }
}
