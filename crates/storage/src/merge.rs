//! Assembles a completed upload's chunks into the final file.

use crate::error::{StorageError, StorageResult};
use crate::files::{remove_dir_if_exists, remove_file_if_exists, write_atomic};
use dashmap::DashSet;
use pyre_core::{ChunkDescriptor, StorageLayout, UploadId};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Everything a merge needs to know about an upload.
#[derive(Clone, Debug)]
pub struct MergeJob {
    pub upload_id: UploadId,
    pub file_name: String,
    pub total_chunks: u32,
    /// Size the client declared. A mismatch is logged, not fatal.
    pub expected_size: u64,
}

impl From<&ChunkDescriptor> for MergeJob {
    fn from(chunk: &ChunkDescriptor) -> Self {
        Self {
            upload_id: chunk.upload_id.clone(),
            file_name: chunk.file_name.clone(),
            total_chunks: chunk.total_chunks,
            expected_size: chunk.file_size,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Chunks were concatenated into `path`.
    Merged { path: PathBuf, bytes: u64 },
    /// The completion marker already existed.
    AlreadyComplete,
    /// Another merge of the same upload is running.
    AlreadyRunning,
}

/// Serializes merges and guards each upload against being merged twice.
///
/// One merge runs at a time across the process. Merges of the same upload
/// that race past the completion check collapse into a single run.
pub struct MergeEngine {
    layout: Arc<StorageLayout>,
    lock: Mutex<()>,
    in_flight: DashSet<UploadId>,
}

/// Removes the upload from the in-flight set when the merge ends.
struct InFlightClaim<'a> {
    set: &'a DashSet<UploadId>,
    upload_id: UploadId,
}

impl<'a> InFlightClaim<'a> {
    fn acquire(set: &'a DashSet<UploadId>, upload_id: &UploadId) -> Option<Self> {
        set.insert(upload_id.clone()).then(|| Self {
            set,
            upload_id: upload_id.clone(),
        })
    }
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.upload_id);
    }
}

impl MergeEngine {
    pub fn new(layout: Arc<StorageLayout>) -> Self {
        Self {
            layout,
            lock: Mutex::new(()),
            in_flight: DashSet::new(),
        }
    }

    /// Start a merge in the background.
    ///
    /// Failures are logged here; the handle also carries them for callers
    /// that want to wait.
    pub fn trigger(self: &Arc<Self>, job: MergeJob) -> JoinHandle<StorageResult<MergeOutcome>> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let upload_id = job.upload_id.clone();
            let result = engine.merge(job).await;
            if let Err(e) = &result {
                error!(upload_id = %upload_id, error = %e, "Merge failed, upload stays in progress");
            }
            result
        })
    }

    /// Whether an upload is currently being merged.
    pub fn is_running(&self, upload_id: &UploadId) -> bool {
        self.in_flight.contains(upload_id)
    }

    #[instrument(skip(self, job), fields(upload_id = %job.upload_id, total_chunks = job.total_chunks))]
    pub async fn merge(&self, job: MergeJob) -> StorageResult<MergeOutcome> {
        if self.is_complete(&job.upload_id).await? {
            debug!("Upload already merged");
            return Ok(MergeOutcome::AlreadyComplete);
        }

        let Some(_claim) = InFlightClaim::acquire(&self.in_flight, &job.upload_id) else {
            debug!("Merge already running");
            return Ok(MergeOutcome::AlreadyRunning);
        };

        let _guard = self.lock.lock().await;

        // A merge may have finished while this one waited for the lock.
        if self.is_complete(&job.upload_id).await? {
            return Ok(MergeOutcome::AlreadyComplete);
        }

        fs::create_dir_all(self.layout.upload_dir(&job.upload_id)).await?;
        let output_path = self.layout.merged_file(&job.upload_id, &job.file_name);

        let bytes = match self.concatenate(&job, &output_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.discard_output(&job.upload_id, &output_path).await;
                return Err(e);
            }
        };

        if bytes != job.expected_size {
            warn!(
                expected = job.expected_size,
                actual = bytes,
                "Merged size differs from declared size"
            );
        }

        // The name must be readable before the upload reports completed.
        let marked = async {
            write_atomic(
                &self.layout.filename_marker(&job.upload_id),
                job.file_name.as_bytes(),
            )
            .await?;
            write_atomic(&self.layout.complete_marker(&job.upload_id), b"").await
        }
        .await;
        if let Err(e) = marked {
            self.discard_output(&job.upload_id, &output_path).await;
            return Err(e.into());
        }

        if let Err(e) = remove_dir_if_exists(&self.layout.chunk_dir(&job.upload_id)).await {
            warn!(error = %e, "Failed to remove chunk directory after merge");
        }

        info!(bytes, path = %output_path.display(), "Upload merged");
        Ok(MergeOutcome::Merged {
            path: output_path,
            bytes,
        })
    }

    async fn is_complete(&self, upload_id: &UploadId) -> StorageResult<bool> {
        Ok(fs::try_exists(self.layout.complete_marker(upload_id)).await?)
    }

    async fn concatenate(&self, job: &MergeJob, output_path: &Path) -> StorageResult<u64> {
        let mut output = fs::File::create(output_path).await?;
        let mut bytes = 0u64;

        for chunk_number in 1..=job.total_chunks {
            let path = self.layout.chunk_path(&job.upload_id, chunk_number);
            let mut chunk = fs::File::open(&path).await.map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    StorageError::MissingChunk {
                        upload_id: job.upload_id.to_string(),
                        chunk_number,
                    }
                } else {
                    StorageError::Io(e)
                }
            })?;
            bytes += tokio::io::copy(&mut chunk, &mut output).await?;
        }

        output.flush().await?;
        output.sync_all().await?;
        Ok(bytes)
    }

    async fn discard_output(&self, upload_id: &UploadId, output_path: &Path) {
        for path in [
            output_path.to_path_buf(),
            self.layout.filename_marker(upload_id),
        ] {
            if let Err(e) = remove_file_if_exists(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove partial merge output");
            }
        }
    }
}
