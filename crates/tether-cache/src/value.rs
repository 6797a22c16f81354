//! Typed cached-value handles.
//!
//! A [`CachedValue`] binds one volatile-store key to a Rust type and a
//! mirror. Reads prefer the mirror (respecting the handle's max age), fall
//! back to the store, and finally to an optional supplier whose result is
//! returned but never cached. Writes land in the mirror synchronously so
//! local readers see them immediately; the store write-through runs as a
//! background task unless [`CachedValue::set_now`] is used.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as Json;

use crate::error::CacheError;
use crate::mirror::CacheMirror;

/// Lazy supplier used when neither the mirror nor the store has the key.
type Fallback<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// A typed handle to one volatile-store key.
///
/// Cheap to clone; clones share the mirror and the fallback.
#[derive(Clone)]
pub struct CachedValue<T> {
    key: String,
    mirror: CacheMirror,
    ttl: Option<Duration>,
    fallback: Option<Fallback<T>>,
}

impl<T> CachedValue<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Bind `key` to a mirror, with no expiry and no fallback.
    pub const fn new(key: String, mirror: CacheMirror) -> Self {
        Self {
            key,
            mirror,
            ttl: None,
            fallback: None,
        }
    }

    /// Set the store-side expiry and the mirror-side max age.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Supply a value when neither the mirror nor the store has the key.
    /// The supplier runs lazily and its result is never written back.
    #[must_use]
    pub fn with_fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    /// The bound key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read the value: mirror first (entries older than the TTL are
    /// ignored), then the store (refreshing the mirror on a hit), then the
    /// fallback supplier. `None` only when all three miss.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Serialization`] if a stored value does not
    /// decode as `T`, or [`CacheError::Volatile`] on store failure.
    pub async fn get(&self) -> Result<Option<T>, CacheError> {
        if let Some(json) = self.mirror.get(&self.key, self.ttl) {
            return Ok(Some(serde_json::from_value(json)?));
        }

        if let Some(raw) = self.mirror.pool().get_raw(&self.key).await? {
            let json: Json = serde_json::from_str(&raw)?;
            self.mirror.put(&self.key, json.clone());
            return Ok(Some(serde_json::from_value(json)?));
        }

        Ok(self.fallback.as_ref().map(|supply| supply()))
    }

    /// Write the value: the mirror is updated synchronously, then the
    /// store write-through runs as a background task. A failed
    /// write-through is logged; the mirror keeps the new value and the
    /// keyspace listener reconciles on the next remote change.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Serialization`] if the value cannot be
    /// encoded.
    pub fn set(&self, value: &T) -> Result<(), CacheError> {
        let json = serde_json::to_value(value)?;
        self.mirror.put(&self.key, json.clone());

        let pool = self.mirror.pool().clone();
        let key = self.key.clone();
        let ttl = self.ttl;
        tokio::spawn(async move {
            if let Err(e) = pool.set_raw(&key, &json.to_string(), ttl).await {
                tracing::warn!(key = key.as_str(), error = %e, "Cache write-through failed");
            }
        });
        Ok(())
    }

    /// Write the value and wait for the store write-through to land.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Serialization`] if the value cannot be
    /// encoded, or [`CacheError::Volatile`] if the store write fails.
    pub async fn set_now(&self, value: &T) -> Result<(), CacheError> {
        let json = serde_json::to_value(value)?;
        self.mirror.put(&self.key, json.clone());
        self.mirror
            .pool()
            .set_raw(&self.key, &json.to_string(), self.ttl)
            .await
    }

    /// Delete the key from the mirror and the store.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Volatile`] if the store delete fails; the
    /// mirror entry is gone either way.
    pub async fn delete(&self) -> Result<(), CacheError> {
        self.mirror.evict(&self.key);
        self.mirror.pool().delete(&self.key).await
    }
}
