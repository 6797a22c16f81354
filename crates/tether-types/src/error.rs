//! Error types for the data model.
//!
//! Decode failures carry enough context to identify the offending column
//! so listeners can skip the individual value and keep running.

/// Errors that can occur while decoding or describing data.
#[derive(Debug, thiserror::Error)]
pub enum TypeError {
    /// An encoded value did not match the column's declared type.
    #[error("cannot decode column `{column}` as {expected}: got {found}")]
    Decode {
        /// The column whose value failed to decode.
        column: String,
        /// The declared semantic type.
        expected: &'static str,
        /// A short rendering of the offending encoded value.
        found: String,
    },

    /// A required column was absent from a row or event payload.
    #[error("column `{0}` missing from payload")]
    MissingColumn(String),

    /// An entity descriptor is structurally invalid.
    #[error("invalid descriptor: {0}")]
    Descriptor(String),
}
