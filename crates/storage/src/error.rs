//! Storage error types.

use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid input: {0}")]
    InvalidInput(#[from] pyre_core::Error),

    #[error("{what} of {size} bytes exceeds limit of {limit} bytes")]
    TooLarge {
        what: &'static str,
        size: u64,
        limit: u64,
    },

    #[error("chunk {chunk_number} of upload {upload_id} is missing")]
    MissingChunk {
        upload_id: String,
        chunk_number: u32,
    },

    #[error("inconsistent upload state: {0}")]
    Inconsistent(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
