//! Error types for the coherence engine.

use tether_types::{IdentityTuple, TypeError};

/// Errors that can occur in the coherence engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A SQL-layer operation failed.
    #[error("store error: {0}")]
    Sql(#[from] tether_sql::SqlError),

    /// A value failed to decode under its declared column type.
    #[error("decode error: {0}")]
    Type(#[from] TypeError),

    /// A proxy operation was attempted before the entity type was bound to
    /// the store.
    #[error("field `{field}` on `{type_tag}` is not bound to the store yet")]
    NotBound {
        /// The entity type tag.
        type_tag: String,
        /// The field name.
        field: String,
    },

    /// Handler registration was attempted after binding. Registration is a
    /// construction-time contract, never a runtime reconfiguration.
    #[error("field `{field}` on `{type_tag}` is already bound; handlers must be registered first")]
    AlreadyBound {
        /// The entity type tag.
        type_tag: String,
        /// The field name.
        field: String,
    },

    /// An operation was attempted on an entity already marked deleted.
    #[error("entity `{type_tag}` {identity} is deleted")]
    Deleted {
        /// The entity type tag.
        type_tag: String,
        /// The instance's identity tuple.
        identity: IdentityTuple,
    },

    /// No entity type with this tag is bound to the context.
    #[error("unknown entity type `{0}`")]
    UnknownType(String),

    /// An entity type with this tag is already bound to the context.
    #[error("entity type `{0}` is already bound")]
    DuplicateType(String),

    /// A row expected to exist was not found in the store.
    #[error("no row for `{type_tag}` {identity}")]
    MissingRow {
        /// The entity type tag.
        type_tag: String,
        /// The identity tuple that resolved to nothing.
        identity: IdentityTuple,
    },

    /// The entity type declares no such field.
    #[error("entity `{type_tag}` has no field `{field}`")]
    UnknownField {
        /// The entity type tag.
        type_tag: String,
        /// The requested field name.
        field: String,
    },

    /// A task queue submission could not complete.
    #[error("task queue error: {0}")]
    TaskQueue(String),
}
