//! On-disk naming for metadata documents, chunk files and merged uploads.

use crate::artifact::ArtifactId;
use crate::config::StorageConfig;
use crate::upload::UploadId;
use crate::{COMPLETE_MARKER, FILENAME_MARKER};
use std::path::{Path, PathBuf};

/// Resolves every path the service reads or writes.
///
/// Components are ids that have already passed format validation and sanitized
/// file names, so joined paths never leave their root.
#[derive(Clone, Debug)]
pub struct StorageLayout {
    data_dir: PathBuf,
    temp_dir: PathBuf,
    final_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            temp_dir: config.temp_chunk_dir.clone(),
            final_dir: config.final_upload_dir.clone(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn final_dir(&self) -> &Path {
        &self.final_dir
    }

    /// `data_dir/<id>.json`
    pub fn metadata_path(&self, id: &ArtifactId) -> PathBuf {
        self.data_dir.join(format!("{id}.json"))
    }

    /// `temp_dir/<upload_id>`
    pub fn chunk_dir(&self, upload_id: &UploadId) -> PathBuf {
        self.temp_dir.join(upload_id.as_str())
    }

    /// `temp_dir/<upload_id>/<chunk_number>`
    pub fn chunk_path(&self, upload_id: &UploadId, chunk_number: u32) -> PathBuf {
        self.chunk_dir(upload_id).join(chunk_number.to_string())
    }

    /// `final_dir/<upload_id>`
    pub fn upload_dir(&self, upload_id: &UploadId) -> PathBuf {
        self.final_dir.join(upload_id.as_str())
    }

    /// `final_dir/<upload_id>/<file_name>`
    pub fn merged_file(&self, upload_id: &UploadId, file_name: &str) -> PathBuf {
        self.upload_dir(upload_id).join(file_name)
    }

    pub fn complete_marker(&self, upload_id: &UploadId) -> PathBuf {
        self.upload_dir(upload_id).join(COMPLETE_MARKER)
    }

    pub fn filename_marker(&self, upload_id: &UploadId) -> PathBuf {
        self.upload_dir(upload_id).join(FILENAME_MARKER)
    }

    /// Merged-file directory of an artifact (same name as its upload).
    pub fn artifact_upload_dir(&self, id: &ArtifactId) -> PathBuf {
        self.final_dir.join(id.to_string())
    }

    /// Leftover chunk directory of an artifact (same name as its upload).
    pub fn artifact_chunk_dir(&self, id: &ArtifactId) -> PathBuf {
        self.temp_dir.join(id.to_string())
    }

    /// Merged file of a file-mode artifact.
    pub fn artifact_file(&self, id: &ArtifactId, file_name: &str) -> PathBuf {
        self.artifact_upload_dir(id).join(file_name)
    }
}
