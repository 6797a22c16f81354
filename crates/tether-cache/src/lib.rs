//! Volatile store accessor and local cache mirror.
//!
//! This crate keeps a process-local, decoded mirror of the volatile
//! (Redis-compatible) store coherent across processes: every tracked key is
//! re-read or evicted as keyspace events report remote writes and expiry.
//! Typed [`CachedValue`] handles layer TTLs and lazy fallbacks on top.
//!
//! # Modules
//!
//! - [`volatile`] -- Connection pool and JSON-typed store operations
//! - [`mirror`] -- The local mirror and its keyspace-event listener
//! - [`value`] -- Typed cached-value handles
//! - [`error`] -- Shared error types

pub mod error;
pub mod mirror;
pub mod value;
pub mod volatile;

// Re-export primary types for convenience.
pub use error::CacheError;
pub use mirror::{CacheMirror, MirrorListener, MirrorUpdateHandler};
pub use value::CachedValue;
pub use volatile::VolatilePool;
