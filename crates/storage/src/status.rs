//! Derives upload status from what is on disk.

use crate::error::{StorageError, StorageResult};
use pyre_core::{StorageLayout, UploadId, UploadStatus, sanitize_file_name};
use std::sync::Arc;
use tokio::fs;
use tracing::instrument;

pub struct UploadTracker {
    layout: Arc<StorageLayout>,
}

impl UploadTracker {
    pub fn new(layout: Arc<StorageLayout>) -> Self {
        Self { layout }
    }

    /// `Completed` once the completion marker exists, `InProgress` while the
    /// chunk directory exists, `NotFound` otherwise.
    #[instrument(skip(self), fields(upload_id = %upload_id))]
    pub async fn status(&self, upload_id: &UploadId) -> StorageResult<UploadStatus> {
        if fs::try_exists(self.layout.complete_marker(upload_id)).await? {
            let raw = fs::read_to_string(self.layout.filename_marker(upload_id))
                .await
                .map_err(|e| {
                    StorageError::Inconsistent(format!(
                        "upload {upload_id} is complete but its file name is unreadable: {e}"
                    ))
                })?;
            let file_name = sanitize_file_name(&raw)
                .ok()
                .filter(|name| *name == raw)
                .ok_or_else(|| {
                    StorageError::Inconsistent(format!(
                        "upload {upload_id} has an invalid file name marker"
                    ))
                })?;
            return Ok(UploadStatus::Completed {
                file_path: self.layout.merged_file(upload_id, &file_name),
            });
        }

        if fs::try_exists(self.layout.chunk_dir(upload_id)).await? {
            Ok(UploadStatus::InProgress)
        } else {
            Ok(UploadStatus::NotFound)
        }
    }
}
