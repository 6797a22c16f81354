//! Multi-process coherence engine over the relational store.
//!
//! The engine keeps every process's view of shared entities consistent:
//! one live instance per (type, identity tuple) per context, lazy
//! store-backed field proxies, and a change-notification pipeline that
//! re-keys, deletes, and fires update handlers as other processes commit.
//!
//! # Modules
//!
//! - [`context`] -- The engine context: store, types, identity map, tasks
//! - [`entity`] -- Live instances and handles
//! - [`fields`] -- Entity types and two-phase field declarations
//! - [`proxy`] -- Store-backed value, reference, and collection proxies
//! - [`notify`] -- The change-notification listener
//! - [`registry`] -- Update-handler registry
//! - [`tasks`] -- FIFO task queue for deferred work
//! - [`error`] -- Shared error types

pub mod context;
pub mod entity;
pub mod error;
pub mod fields;
mod identity_map;
pub mod notify;
pub mod proxy;
pub mod registry;
pub mod tasks;

// Re-export primary types for convenience.
pub use context::EngineContext;
pub use entity::EntityHandle;
pub use error::EngineError;
pub use fields::{CollectionField, EntityType, ReferenceField, ValueField};
pub use notify::ChangeListener;
pub use proxy::{CollectionCursor, CollectionProxy, ReferenceProxy, ValueProxy};
pub use registry::{CollectionEntryHandler, HandlerRegistry, ValueChange, ValueUpdateHandler};
pub use tasks::TaskQueue;
