//! Integration tests for the `tether-cache` volatile layer.
//!
//! These tests require a live Redis-compatible instance. Run with:
//!
//! ```bash
//! docker compose up -d
//! cargo test -p tether-cache -- --ignored
//! docker compose down
//! ```
//!
//! All tests are marked `#[ignore]` so they are skipped during normal
//! `cargo test` runs. Keys are prefixed per test to stay independent
//! under parallel execution.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::items_after_statements,
    clippy::missing_panics_doc,
    clippy::too_many_lines
)]

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_cache::{CacheMirror, CachedValue, VolatilePool};

/// Volatile store connection URL for the local Docker instance.
const VOLATILE_URL: &str = "redis://localhost:6379";

const DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Settings {
    theme: String,
    page_size: u32,
}

fn settings() -> Settings {
    Settings {
        theme: "dark".to_owned(),
        page_size: 25,
    }
}

async fn setup_pool() -> VolatilePool {
    VolatilePool::connect(VOLATILE_URL)
        .await
        .expect("Failed to connect to volatile store -- is Docker running?")
}

/// Poll until `probe` returns true or the deadline passes.
async fn wait_until<F>(mut probe: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + DEADLINE;
    while tokio::time::Instant::now() < deadline {
        if probe() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
#[ignore = "requires live Redis-compatible instance (docker compose up -d)"]
async fn json_roundtrip_and_expiry() {
    let pool = setup_pool().await;
    let key = "it:roundtrip";
    pool.delete(key).await.expect("clean");

    pool.set_json(key, &settings(), None).await.expect("set");
    let read: Settings = pool.get_json(key).await.expect("get");
    assert_eq!(read, settings());

    pool.expire(key, Duration::from_secs(1)).await.expect("expire");
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let gone: Result<Settings, _> = pool.get_json(key).await;
    assert!(gone.is_err(), "expired key should be absent");
}

#[tokio::test]
#[ignore = "requires live Redis-compatible instance (docker compose up -d)"]
async fn mirror_tracks_remote_sets_and_deletes() {
    let pool = setup_pool().await;
    let key = "it:mirror";
    pool.delete(key).await.expect("clean");

    let mirror = CacheMirror::new(pool.clone());
    let listener = mirror.start_listener().await.expect("listener");

    // Seed the mirror through a local read path.
    pool.set_json(key, &settings(), None).await.expect("seed");
    let value: CachedValue<Settings> = CachedValue::new(key.to_owned(), mirror.clone());
    assert_eq!(value.get().await.expect("get"), Some(settings()));
    assert!(mirror.is_tracked(key));

    // Another process overwrites the key; the mirror re-reads it.
    let other = setup_pool().await;
    other
        .set_json(
            key,
            &Settings {
                theme: "light".to_owned(),
                page_size: 50,
            },
            None,
        )
        .await
        .expect("remote set");

    // The mirror side of the read path is synchronous, so a plain probe
    // on the mirror sees the re-read land.
    let refreshed = {
        let mirror = mirror.clone();
        wait_until(move || {
            mirror
                .get(key, None)
                .and_then(|json| serde_json::from_value::<Settings>(json).ok())
                .is_some_and(|s| s.theme == "light")
        })
        .await
    };
    assert!(refreshed, "mirror should pick up the remote write");
    assert_eq!(
        value.get().await.expect("get").map(|s| s.page_size),
        Some(50)
    );

    // A remote delete evicts the mirrored entry.
    other.delete(key).await.expect("remote delete");
    let evicted = {
        let mirror = mirror.clone();
        wait_until(move || !mirror.is_tracked(key)).await
    };
    assert!(evicted, "mirror should evict on remote delete");

    listener.shutdown().await;
}

#[tokio::test]
#[ignore = "requires live Redis-compatible instance (docker compose up -d)"]
async fn cached_values_fall_back_after_external_delete() {
    let pool = setup_pool().await;
    let key = "it:fallback";
    pool.delete(key).await.expect("clean");

    let mirror = CacheMirror::new(pool.clone());
    let listener = mirror.start_listener().await.expect("listener");

    let value: CachedValue<Settings> = CachedValue::new(key.to_owned(), mirror.clone())
        .with_fallback(settings);

    // Nothing stored yet: the fallback answers, and is not cached.
    assert_eq!(value.get().await.expect("get"), Some(settings()));
    assert!(!mirror.is_tracked(key));

    // A durable write makes the store the source of truth.
    let stored = Settings {
        theme: "light".to_owned(),
        page_size: 10,
    };
    value.set_now(&stored).await.expect("set_now");
    assert_eq!(value.get().await.expect("get"), Some(stored.clone()));

    // An external delete evicts the mirror; reads fall back again.
    let other = setup_pool().await;
    other.delete(key).await.expect("external delete");
    let evicted = {
        let mirror = mirror.clone();
        wait_until(move || !mirror.is_tracked(key)).await
    };
    assert!(evicted);
    assert_eq!(value.get().await.expect("get"), Some(settings()));

    listener.shutdown().await;
}

#[tokio::test]
#[ignore = "requires live Redis-compatible instance (docker compose up -d)"]
async fn mirror_respects_value_ttl() {
    let pool = setup_pool().await;
    let key = "it:ttl";
    pool.delete(key).await.expect("clean");

    let mirror = CacheMirror::new(pool.clone());
    let value: CachedValue<Settings> = CachedValue::new(key.to_owned(), mirror.clone())
        .with_ttl(Duration::from_secs(1));

    value.set_now(&settings()).await.expect("set_now");
    assert_eq!(value.get().await.expect("fresh get"), Some(settings()));

    // Once the mirror entry ages past the TTL the store answers instead
    // (and the store-side expiry removes the key shortly after).
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(mirror.get(key, Some(Duration::from_secs(1))).is_none());
    assert_eq!(value.get().await.expect("aged get"), None);
}
