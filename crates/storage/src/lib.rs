//! Filesystem side of pyre.
//!
//! This crate provides:
//! - Chunk reception with atomic writes
//! - Serialized, idempotent merging of completed uploads
//! - Upload status derived from directory shape
//! - Burning every stored trace of an artifact

pub mod burn;
pub mod chunks;
pub mod error;
pub mod files;
pub mod merge;
pub mod status;

pub use burn::{BurnReport, Burner, RetryPolicy};
pub use chunks::{ChunkReceipt, ChunkReceiver, ChunkTally, UploadLimits};
pub use error::{StorageError, StorageResult};
pub use files::{ensure_directories, write_atomic};
pub use merge::{MergeEngine, MergeJob, MergeOutcome};
pub use status::UploadTracker;
