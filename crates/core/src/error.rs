//! Error type shared by every index operation.

use thiserror::Error;

/// Errors returned by [`VectorIndex`](crate::storage::VectorIndex) operations.
///
/// Every mutation validates its input before touching the graph, so an error
/// never leaves partially written edges behind.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Unknown space type, zero dimension, degenerate graph parameters.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Insert beyond `max_elements`. Call `resize` and retry.
    #[error("index is full: capacity of {capacity} elements reached")]
    CapacityExceeded { capacity: usize },

    /// The label is already bound to a live element and replacement was not requested.
    #[error("label {0} already exists")]
    DuplicateLabel(u64),

    /// The label is unknown or already deleted.
    #[error("label {0} not found")]
    NotFound(u64),

    /// The label was deleted and its slot now holds another label.
    #[error("label {0} cannot be restored: its slot has been reused")]
    AlreadyReused(u64),

    /// Vector length disagrees with the index dimension.
    #[error("dimension mismatch: index has {expected} dimensions, vector has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Resize target smaller than the number of stored elements.
    #[error("invalid capacity {requested}: index already holds {current} elements")]
    InvalidCapacity { requested: usize, current: usize },

    /// Fewer than `k` eligible elements were reachable. Retry with a larger ef.
    #[error("insufficient results: requested {requested}, found {found}")]
    InsufficientResults { requested: usize, found: usize },

    /// Header or data segment failed validation on load.
    #[error("corrupt persisted state: {0}")]
    CorruptPersistedState(String),

    /// The index was opened read-only.
    #[error("index is read only")]
    ReadOnly,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IndexError>;

impl From<bincode::Error> for IndexError {
    fn from(e: bincode::Error) -> Self {
        IndexError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(e: serde_json::Error) -> Self {
        IndexError::Serialization(e.to_string())
    }
}
