//! Core domain types and shared logic for pyre, a burn-after-read blob service.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Upload and artifact identifiers
//! - The artifact metadata record and its expiry deadlines
//! - Derived upload status
//! - Duration strings and the expiration policy
//! - On-disk layout naming and configuration

pub mod artifact;
pub mod config;
pub mod duration;
pub mod error;
pub mod expiration;
pub mod layout;
pub mod upload;

pub use artifact::{
    ArtifactId, ArtifactKind, ArtifactRecord, ExpiryFields, ExpiryReason, PasswordProtection,
};
pub use duration::parse_duration;
pub use error::{Error, Result};
pub use expiration::ExpirationPolicy;
pub use layout::StorageLayout;
pub use upload::{ChunkDescriptor, UploadId, UploadStatus, sanitize_file_name};

/// Length of an upload ID in hex characters.
pub const UPLOAD_ID_LEN: usize = 32;

/// Empty marker written once a merge has fully completed.
pub const COMPLETE_MARKER: &str = ".complete";

/// Marker holding the merged file's name.
pub const FILENAME_MARKER: &str = ".filename";

/// Content type recorded for text artifacts that do not name one.
pub const DEFAULT_TEXT_CONTENT_TYPE: &str = "text/plain";

/// Maximum chunk size: 32 MiB
pub const MAX_CHUNK_SIZE: u64 = 32 * 1024 * 1024;
