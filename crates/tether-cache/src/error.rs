//! Error types for the volatile cache layer.

/// Errors that can occur in the volatile cache layer.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A volatile-store operation failed.
    #[error("volatile store error: {0}")]
    Volatile(#[from] fred::error::Error),

    /// A serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A key was not found in the volatile store.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}
