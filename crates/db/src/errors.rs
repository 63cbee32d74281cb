//! Errors raised by the outbound stores.

use thiserror::Error;

use crate::persistent::errors::StorageError;

/// Errors that can occur when reading or writing outbound items.
#[derive(Debug, Error)]
pub enum DbError {
    /// The persistent storage layer failed.
    #[error("sqlite: {0}")]
    Storage(#[from] StorageError),

    /// The store has been closed.
    #[error("store is closed")]
    Closed,
}

/// Result of an outbound store operation.
pub type DbResult<T> = Result<T, DbError>;
