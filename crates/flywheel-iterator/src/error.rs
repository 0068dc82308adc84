//! Error types for the iterator engine.

use thiserror::Error;

use crate::recurrence::RecurrenceError;
use flywheel_store::StoreError;

/// Errors that can occur in iterator operations.
#[derive(Debug, Error)]
pub enum IteratorError {
    /// Store gateway error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Recurrence evaluation error.
    #[error("recurrence error: {0}")]
    Recurrence(#[from] RecurrenceError),

    /// Invalid iterator configuration.
    #[error("invalid iterator configuration: {0}")]
    InvalidConfig(String),

    /// An iterator for this entity type and field is already running.
    #[error("iterator already running for {entity_type}.{field}")]
    AlreadyRunning {
        /// Entity type of the running iterator.
        entity_type: String,
        /// Schedule field of the running iterator.
        field: String,
    },
}
