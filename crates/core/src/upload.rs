//! Chunked upload identifiers, chunk descriptors and derived upload status.

use crate::{COMPLETE_MARKER, FILENAME_MARKER, UPLOAD_ID_LEN};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Identifier of an in-progress chunked upload.
///
/// Always exactly 32 hex characters, stored lowercase. The value doubles as a
/// directory name under the temp and final upload roots, so the format check is
/// also the path traversal guard.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UploadId(String);

impl UploadId {
    /// Generate a new random upload ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.len() != UPLOAD_ID_LEN {
            return Err(crate::Error::InvalidUploadId(format!(
                "expected {UPLOAD_ID_LEN} characters, got {}",
                s.len()
            )));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(crate::Error::InvalidUploadId(
                "must contain only hex characters".to_string(),
            ));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<String> for UploadId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<UploadId> for String {
    fn from(id: UploadId) -> Self {
        id.0
    }
}

impl fmt::Debug for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadId({})", self.0)
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reduce a client-supplied file name to its final path component.
///
/// Rejects names that would resolve to the upload directory itself or to one of
/// the completion markers stored next to the merged file.
pub fn sanitize_file_name(raw: &str) -> crate::Result<String> {
    let trimmed = raw.trim_end_matches(['/', '\\']);
    let base = trimmed.rsplit(['/', '\\']).next().unwrap_or_default();

    match base {
        "" | "." | ".." => Err(crate::Error::InvalidFileName(format!(
            "{raw:?} has no usable base name"
        ))),
        COMPLETE_MARKER | FILENAME_MARKER => Err(crate::Error::InvalidFileName(format!(
            "{base:?} is reserved"
        ))),
        _ => Ok(base.to_string()),
    }
}

/// One numbered chunk of an upload, as described by the client.
#[derive(Clone, Debug)]
pub struct ChunkDescriptor {
    pub upload_id: UploadId,
    /// 1-based position of this chunk.
    pub chunk_number: u32,
    pub total_chunks: u32,
    /// Sanitized base name of the file being assembled.
    pub file_name: String,
    /// Size the client declared for the whole file.
    pub file_size: u64,
}

impl ChunkDescriptor {
    /// Build a descriptor, sanitizing the file name and checking chunk bounds.
    pub fn new(
        upload_id: UploadId,
        chunk_number: u32,
        total_chunks: u32,
        file_name: &str,
        file_size: u64,
    ) -> crate::Result<Self> {
        if total_chunks == 0 {
            return Err(crate::Error::InvalidChunk(
                "totalChunks must be at least 1".to_string(),
            ));
        }
        if chunk_number == 0 || chunk_number > total_chunks {
            return Err(crate::Error::InvalidChunk(format!(
                "chunk {chunk_number} outside 1..={total_chunks}"
            )));
        }

        Ok(Self {
            upload_id,
            chunk_number,
            total_chunks,
            file_name: sanitize_file_name(file_name)?,
            file_size,
        })
    }
}

/// Upload state derived from the shape of the temp and final directories.
///
/// Transitions only move forward: `NotFound -> InProgress -> Completed`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadStatus {
    /// Neither a chunk directory nor a completion marker exists.
    NotFound,
    /// Chunks are arriving or a merge is running (or a merge aborted).
    InProgress,
    /// The merged file exists at `file_path`.
    Completed { file_path: PathBuf },
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::InProgress => "in_progress",
            Self::Completed { .. } => "completed",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}
