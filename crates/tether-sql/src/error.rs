//! Error types for the SQL layer.
//!
//! All errors are propagated via [`SqlError`] which wraps the underlying
//! [`sqlx`] errors with additional context about which operation failed.

use tether_types::{TableRef, TypeError};

/// Errors that can occur in the SQL layer.
#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A value failed to decode under its declared column type.
    #[error("decode error: {0}")]
    Type(#[from] TypeError),

    /// The write orchestrator found a foreign-key cycle among the target
    /// tables. Detected before any statement executes.
    #[error("dependency cycle among tables: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> "))]
    DependencyCycle(Vec<TableRef>),

    /// A target table is not described by the catalog handed to the
    /// orchestrator.
    #[error("table {0} is not in the catalog")]
    UnknownTable(TableRef),

    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}
