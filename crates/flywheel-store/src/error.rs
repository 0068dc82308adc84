//! Error types for store operations.

use thiserror::Error;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record not found.
    #[error("record not found: {0}")]
    RecordNotFound(String),

    /// The record carries no schedule under the requested field name.
    #[error("record {id} has no schedule field {field}")]
    UnknownField {
        /// Record id.
        id: String,
        /// Requested schedule field name.
        field: String,
    },

    /// Slot list violates the strictly-ascending invariant.
    #[error("invalid slot list for record {0}: slots must be strictly ascending")]
    InvalidSlots(String),

    /// Backend unavailable or rejected the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
