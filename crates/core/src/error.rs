//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid upload ID: {0}")]
    InvalidUploadId(String),

    #[error("invalid artifact ID: {0}")]
    InvalidArtifactId(String),

    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("invalid duration {input:?}: {reason}")]
    InvalidDuration { input: String, reason: String },
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
