//! Shared type definitions for the Tether coherence engine.
//!
//! This crate is the single source of truth for the data model used across
//! the Tether workspace: decoded cell values, column and table descriptors,
//! entity metadata, identity tuples, and change notifications. Everything
//! here is plain data: no store connections, no I/O.
//!
//! # Modules
//!
//! - [`value`] -- Decoded scalar values and their JSON wire encoding
//! - [`schema`] -- Tables, columns, links, and entity descriptors
//! - [`identity`] -- Ordered identity tuples keying entity instances
//! - [`change`] -- Decoded change notifications from the relational store
//! - [`error`] -- Shared error types

pub mod change;
pub mod error;
pub mod identity;
pub mod schema;
pub mod value;

// Re-export all public types at crate root for convenience.
pub use change::{ChangeEvent, ChangeOp};
pub use error::TypeError;
pub use identity::IdentityTuple;
pub use schema::{
    CollectionDescriptor, CollectionKind, ColumnDescriptor, ColumnKind, ColumnRef,
    EntityDescriptor, InsertStrategy, JoinTable, Link, LinkPair, OnDelete, ReferenceDescriptor,
    TableRef,
};
pub use value::{ColumnType, ScalarValue};
