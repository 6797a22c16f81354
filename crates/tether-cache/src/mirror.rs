//! The local cache mirror.
//!
//! A mirror keeps decoded copies of the volatile-store values this process
//! has touched, so repeated reads cost nothing. Coherence comes from
//! keyspace events: a remote SET re-reads the key into the mirror, a DEL
//! or expiry evicts it. Only keys the mirror has already seen are tracked;
//! the rest of the keyspace is ignored.
//!
//! Update handlers fire on every mirror change, local- or remote-
//! originated, as independent spawned tasks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use fred::interfaces::{ClientLike, EventInterface, PubsubInterface};
use serde_json::Value as Json;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::CacheError;
use crate::volatile::VolatilePool;

const RECONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// Handler fired with the key and its new mirrored value (`None` on
/// eviction).
pub type MirrorUpdateHandler = Arc<dyn Fn(&str, Option<&Json>) + Send + Sync>;

fn read_unpoisoned<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_unpoisoned<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// One mirrored value and when it was captured.
#[derive(Debug, Clone)]
struct MirrorEntry {
    value: Json,
    captured_at: Instant,
}

/// Shared mirror state.
struct MirrorShared {
    entries: RwLock<HashMap<String, MirrorEntry>>,
    handlers: Mutex<Vec<MirrorUpdateHandler>>,
}

/// A local decoded mirror of volatile-store values.
///
/// Cheap to clone; clones share the map, the handlers, and the pool.
#[derive(Clone)]
pub struct CacheMirror {
    pool: VolatilePool,
    shared: Arc<MirrorShared>,
}

impl CacheMirror {
    /// Create a mirror over a connected pool. The mirror starts empty and
    /// passive; call [`Self::start_listener`] to track remote changes.
    pub fn new(pool: VolatilePool) -> Self {
        Self {
            pool,
            shared: Arc::new(MirrorShared {
                entries: RwLock::new(HashMap::new()),
                handlers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The underlying pool.
    pub const fn pool(&self) -> &VolatilePool {
        &self.pool
    }

    /// Register a handler fired on every mirror change.
    pub fn on_update<H>(&self, handler: H)
    where
        H: Fn(&str, Option<&Json>) + Send + Sync + 'static,
    {
        lock_unpoisoned(&self.shared.handlers).push(Arc::new(handler));
    }

    /// The mirrored value for `key`, if present and no older than
    /// `max_age`.
    pub fn get(&self, key: &str, max_age: Option<Duration>) -> Option<Json> {
        let entries = read_unpoisoned(&self.shared.entries);
        let entry = entries.get(key)?;
        if let Some(max_age) = max_age {
            if entry.captured_at.elapsed() > max_age {
                return None;
            }
        }
        Some(entry.value.clone())
    }

    /// Whether `key` is currently mirrored, regardless of age.
    pub fn is_tracked(&self, key: &str) -> bool {
        read_unpoisoned(&self.shared.entries).contains_key(key)
    }

    /// Number of mirrored keys.
    pub fn len(&self) -> usize {
        read_unpoisoned(&self.shared.entries).len()
    }

    /// Whether the mirror tracks no keys.
    pub fn is_empty(&self) -> bool {
        read_unpoisoned(&self.shared.entries).is_empty()
    }

    /// Store a value in the mirror and fire the update handlers. Used for
    /// local writes (before the write-through lands) and by the listener
    /// when a remote SET has been re-read.
    pub fn put(&self, key: &str, value: Json) {
        write_unpoisoned(&self.shared.entries).insert(
            key.to_owned(),
            MirrorEntry {
                value: value.clone(),
                captured_at: Instant::now(),
            },
        );
        self.fire(key, Some(value));
    }

    /// Drop a key from the mirror and fire the update handlers. A miss is
    /// a no-op and fires nothing.
    pub fn evict(&self, key: &str) {
        let removed = write_unpoisoned(&self.shared.entries).remove(key);
        if removed.is_some() {
            self.fire(key, None);
        }
    }

    fn fire(&self, key: &str, value: Option<Json>) {
        let handlers = lock_unpoisoned(&self.shared.handlers).clone();
        for handler in handlers {
            let key = key.to_owned();
            let value = value.clone();
            tokio::spawn(async move {
                handler(&key, value.as_ref());
            });
        }
    }

    /// Start tracking remote changes through keyspace events.
    ///
    /// Subscribes to the `set`, `del`, and `expired` keyevent channels of
    /// the pool's database. A SET on a tracked key re-reads it into the
    /// mirror; DEL and expiry evict. Untracked keys are ignored. The
    /// subscription reconnects with backoff on failure; malformed events
    /// are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Volatile`] if enabling keyspace events or
    /// subscribing fails.
    pub async fn start_listener(&self) -> Result<MirrorListener, CacheError> {
        self.pool.enable_key_events().await?;
        let subscriber = self.pool.subscriber().await?;
        let db = self.pool.database();
        let channels = vec![
            format!("__keyevent@{db}__:set"),
            format!("__keyevent@{db}__:del"),
            format!("__keyevent@{db}__:expired"),
        ];
        subscriber.subscribe(channels).await?;
        let mut messages = subscriber.message_rx();
        tracing::info!(db, "Cache mirror listener started");

        let (shutdown, mut stop) = watch::channel(false);
        let mirror = self.clone();
        let worker = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                    received = messages.recv() => match received {
                        Ok(message) => {
                            let channel = message.channel.to_string();
                            let Some(key) = message.value.into_string() else {
                                tracing::warn!(
                                    channel = channel.as_str(),
                                    "Discarding keyspace event with non-string key"
                                );
                                continue;
                            };
                            mirror.apply_key_event(&channel, &key).await;
                        }
                        Err(e) => {
                            tracing::warn!(
                                error = %e,
                                "Keyspace event stream lagged or closed; continuing"
                            );
                            tokio::time::sleep(RECONNECT_BACKOFF).await;
                        }
                    }
                }
            }
            if let Err(e) = subscriber.quit().await {
                tracing::warn!(error = %e, "Subscriber shutdown failed");
            }
            tracing::debug!("Cache mirror listener stopped");
        });

        Ok(MirrorListener { shutdown, worker })
    }

    /// React to one keyspace event for a tracked key.
    async fn apply_key_event(&self, channel: &str, key: &str) {
        if !self.is_tracked(key) {
            return;
        }
        if channel.ends_with(":set") {
            match self.pool.get_raw(key).await {
                Ok(Some(raw)) => match serde_json::from_str::<Json>(&raw) {
                    Ok(value) => self.put(key, value),
                    Err(e) => {
                        tracing::warn!(key, error = %e, "Evicting undecodable mirrored value");
                        self.evict(key);
                    }
                },
                // The key vanished between the event and the re-read.
                Ok(None) => self.evict(key),
                Err(e) => {
                    tracing::warn!(key, error = %e, "Evicting after failed re-read");
                    self.evict(key);
                }
            }
        } else if channel.ends_with(":del") || channel.ends_with(":expired") {
            self.evict(key);
        }
    }
}

/// Handle to a running mirror listener. Dropping it does not stop the
/// listener; call [`Self::shutdown`].
pub struct MirrorListener {
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

impl MirrorListener {
    /// Stop the listener and wait for its worker to exit.
    pub async fn shutdown(self) {
        if self.shutdown.send(true).is_err() {
            return;
        }
        if let Err(e) = self.worker.await {
            tracing::warn!(error = %e, "Mirror listener worker join failed");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use serde_json::json;

    use super::*;

    // Mirror map operations never touch the pool, so a dead pool config is
    // fine for these tests: the client is built lazily on first command.
    fn mirror() -> CacheMirror {
        let config = fred::prelude::Config::default();
        let client = fred::prelude::Builder::from_config(config.clone())
            .build()
            .expect("client");
        CacheMirror::new(crate::volatile::VolatilePool::from_parts(client, config))
    }

    #[tokio::test]
    async fn entries_respect_max_age() {
        let mirror = mirror();
        mirror.put("a", json!(1));

        assert_eq!(mirror.get("a", None), Some(json!(1)));
        assert_eq!(mirror.get("a", Some(Duration::from_secs(60))), Some(json!(1)));
        assert_eq!(mirror.get("a", Some(Duration::ZERO)), None);
        assert_eq!(mirror.get("missing", None), None);
    }

    #[tokio::test]
    async fn eviction_drops_tracked_entries() {
        let mirror = mirror();
        mirror.put("a", json!("x"));
        assert!(mirror.is_tracked("a"));

        mirror.evict("a");
        assert!(!mirror.is_tracked("a"));
        assert!(mirror.is_empty());

        // Evicting an absent key is a no-op.
        mirror.evict("a");
    }

    #[tokio::test]
    async fn handlers_observe_puts_and_evictions() {
        let mirror = mirror();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        mirror.on_update(move |key, value| {
            let _ = tx.send((key.to_owned(), value.cloned()));
        });

        mirror.put("a", json!(7));
        mirror.evict("a");

        let (key, value) = rx.recv().await.expect("put event");
        assert_eq!(key, "a");
        assert_eq!(value, Some(json!(7)));
        let (key, value) = rx.recv().await.expect("evict event");
        assert_eq!(key, "a");
        assert_eq!(value, None);
    }
}
