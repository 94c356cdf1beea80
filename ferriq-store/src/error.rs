//! Error types for the storage layer.

use thiserror::Error;

use ferriq_common::QueueError;

/// Failure in the embedded key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying sled database reported an error.
    #[error("database error: {0}")]
    Backend(#[from] sled::Error),

    /// A batch could not be applied.
    #[error("batch write failed: {0}")]
    Batch(String),
}

impl From<StoreError> for QueueError {
    fn from(e: StoreError) -> Self {
        Self::Storage(e.to_string())
    }
}
