//! Volatile (Redis-compatible) store operations.
//!
//! The volatile store holds JSON-encoded values under flat string keys with
//! optional expiry. Cross-process invalidation rides on keyspace
//! notifications: [`VolatilePool::enable_key_events`] turns them on and
//! [`VolatilePool::subscriber`] builds the client the mirror listens with.

use fred::clients::SubscriberClient;
use fred::prelude::*;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::CacheError;

/// Connection handle to a volatile (Redis-compatible) store.
///
/// Wraps a [`fred::prelude::Client`] and provides JSON-typed operations
/// plus the subscription plumbing for keyspace events.
#[derive(Clone)]
pub struct VolatilePool {
    client: Client,
    config: Config,
}

impl VolatilePool {
    /// Connect to the volatile store at the given URL.
    ///
    /// The URL should follow the Redis URL scheme:
    /// `redis://host:port` or `redis://host:port/db`
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] if the URL cannot be parsed.
    /// Returns [`CacheError::Volatile`] if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let config = Config::from_url(url)
            .map_err(|e| CacheError::Config(format!("Invalid volatile store URL: {e}")))?;

        let client = Builder::from_config(config.clone()).build()?;
        client.init().await?;

        tracing::info!("Connected to volatile store");
        Ok(Self { client, config })
    }

    /// Wrap an already-built client. Test-oriented; [`Self::connect`] is
    /// the production path.
    pub(crate) const fn from_parts(client: Client, config: Config) -> Self {
        Self { client, config }
    }

    /// The logical database index this pool is connected to.
    pub fn database(&self) -> u8 {
        self.config.database.unwrap_or(0)
    }

    // =========================================================================
    // Raw string get/set/delete/expire
    // =========================================================================

    /// Read the raw string at `key`, if present.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Volatile`] if the read fails.
    pub async fn get_raw(&self, key: &str) -> Result<Option<String>, CacheError> {
        let value: Option<String> = self.client.get(key).await?;
        Ok(value)
    }

    /// Store a raw string at `key`, with an optional expiry.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Volatile`] if the write fails.
    pub async fn set_raw(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let expiration = ttl.map(|d| Expiration::EX(expiry_seconds(d)));
        let _: () = self.client.set(key, value, expiration, None, false).await?;
        Ok(())
    }

    /// Delete a key. Deleting an absent key is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Volatile`] if the delete fails.
    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let _: u32 = self.client.del(key).await?;
        Ok(())
    }

    /// Set or replace the expiry on an existing key.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Volatile`] if the write fails.
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        let _: bool = self.client.expire(key, expiry_seconds(ttl), None).await?;
        Ok(())
    }

    // =========================================================================
    // JSON typed helpers
    // =========================================================================

    /// Serialize `value` as JSON and store it at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Serialization`] if serialization fails.
    /// Returns [`CacheError::Volatile`] if the write fails.
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let json = serde_json::to_string(value)?;
        self.set_raw(key, &json, ttl).await
    }

    /// Read the value at `key` and deserialize from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::KeyNotFound`] if the key does not exist.
    /// Returns [`CacheError::Serialization`] if deserialization fails.
    /// Returns [`CacheError::Volatile`] if the read fails.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<T, CacheError> {
        let value = self.get_raw(key).await?;
        value.map_or_else(
            || Err(CacheError::KeyNotFound(key.to_owned())),
            |s| Ok(serde_json::from_str(&s)?),
        )
    }

    /// Read the value at `key` and deserialize from JSON, mapping an
    /// absent key to `None`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Serialization`] if deserialization fails.
    /// Returns [`CacheError::Volatile`] if the read fails.
    pub async fn get_json_opt<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        match self.get_raw(key).await? {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Keyspace events
    // =========================================================================

    /// Turn on keyspace-event notifications (`notify-keyspace-events`) so
    /// set/del/expired events are published on the `__keyevent@<db>__`
    /// channels. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Volatile`] if the CONFIG SET fails.
    pub async fn enable_key_events(&self) -> Result<(), CacheError> {
        let _: () = self
            .client
            .config_set("notify-keyspace-events", "KEA")
            .await?;
        Ok(())
    }

    /// Build and connect a subscriber client sharing this pool's
    /// configuration, for keyspace-event subscriptions.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Volatile`] if the connection fails.
    pub async fn subscriber(&self) -> Result<SubscriberClient, CacheError> {
        let subscriber = Builder::from_config(self.config.clone()).build_subscriber_client()?;
        subscriber.init().await?;
        Ok(subscriber)
    }

    /// Flush all keys from the volatile store.
    ///
    /// **WARNING:** This deletes all data. Only use for testing.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Volatile`] if the flush fails.
    pub async fn flush_all(&self) -> Result<(), CacheError> {
        let _: () = self.client.flushall(false).await?;
        Ok(())
    }

    /// Return a reference to the underlying [`Client`].
    pub const fn client(&self) -> &Client {
        &self.client
    }
}

/// Whole seconds for an EXPIRE-style command. Sub-second durations round
/// up to one second; zero is an invalid expire the store rejects.
fn expiry_seconds(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_seconds_never_emits_zero() {
        assert_eq!(expiry_seconds(Duration::from_millis(200)), 1);
        assert_eq!(expiry_seconds(Duration::ZERO), 1);
        assert_eq!(expiry_seconds(Duration::from_secs(90)), 90);
        assert_eq!(expiry_seconds(Duration::from_secs(u64::MAX)), i64::MAX);
    }
}
