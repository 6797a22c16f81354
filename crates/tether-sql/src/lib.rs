//! Relational store access and transactional write orchestration.
//!
//! This crate owns every byte of SQL the engine speaks: the low-level
//! statement assembly helpers, the `PostgreSQL` accessor (pooled
//! connections, parameterized queries, atomic multi-statement
//! transactions), idempotent installation of per-table change-notification
//! triggers, and the dependency-ordered multi-table upsert orchestrator.
//!
//! Uses [`sqlx`] with runtime query construction (not compile-time checked)
//! to avoid requiring a live database at build time. All queries are
//! parameterized to prevent SQL injection.
//!
//! # Modules
//!
//! - [`statement`] -- Parameterized statement assembly helpers
//! - [`postgres`] -- Connection pool, query execution, trigger installation
//! - [`graph`] -- Table dependency graph and topological ordering
//! - [`orchestrator`] -- Dependency-ordered multi-table upsert
//! - [`error`] -- Shared error types

pub mod error;
pub mod graph;
pub mod orchestrator;
pub mod postgres;
pub mod statement;

// Re-export primary types for convenience.
pub use error::SqlError;
pub use graph::DependencyGraph;
pub use orchestrator::{InsertContext, TableCatalog, WritePlan};
pub use postgres::{PgStore, PostgresConfig, CHANGE_CHANNEL};
pub use statement::Statement;
