//! Persists numbered chunks and triggers the merge once all have arrived.

use crate::error::{StorageError, StorageResult};
use crate::files::{remove_file_if_exists, write_atomic};
use crate::merge::{MergeEngine, MergeJob, MergeOutcome};
use bytes::Bytes;
use pyre_core::config::ServerConfig;
use pyre_core::{ChunkDescriptor, StorageLayout};
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

/// Size ceilings enforced on incoming chunks.
#[derive(Clone, Copy, Debug)]
pub struct UploadLimits {
    /// Largest whole file a client may declare or send.
    pub max_upload_size: u64,
    /// Largest single chunk body.
    pub max_chunk_size: u64,
}

impl From<&ServerConfig> for UploadLimits {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_upload_size: config.max_upload_size,
            max_chunk_size: config.max_chunk_size,
        }
    }
}

/// Result of storing one chunk.
#[derive(Debug)]
pub struct ChunkReceipt {
    /// Chunks of this upload now on disk.
    pub received: u32,
    pub total_chunks: u32,
    /// Set when this chunk completed the upload and a merge was started.
    pub merge: Option<JoinHandle<StorageResult<MergeOutcome>>>,
    /// The merged file already existed when the chunk arrived.
    pub already_merged: bool,
}

impl ChunkReceipt {
    pub fn is_complete(&self) -> bool {
        self.received >= self.total_chunks
    }
}

pub struct ChunkReceiver {
    layout: Arc<StorageLayout>,
    merges: Arc<MergeEngine>,
    limits: UploadLimits,
}

impl ChunkReceiver {
    pub fn new(layout: Arc<StorageLayout>, merges: Arc<MergeEngine>, limits: UploadLimits) -> Self {
        Self {
            layout,
            merges,
            limits,
        }
    }

    pub fn limits(&self) -> UploadLimits {
        self.limits
    }

    /// Store a chunk, then start the merge if every chunk is present.
    ///
    /// Re-sending a chunk overwrites it. Chunks for an upload that has
    /// already been merged are accepted and dropped.
    #[instrument(
        skip(self, chunk, data),
        fields(upload_id = %chunk.upload_id, chunk = chunk.chunk_number, total = chunk.total_chunks, size = data.len())
    )]
    pub async fn receive(&self, chunk: &ChunkDescriptor, data: Bytes) -> StorageResult<ChunkReceipt> {
        self.check_limits(chunk, data.len() as u64)?;

        if fs::try_exists(self.layout.complete_marker(&chunk.upload_id)).await? {
            debug!("Chunk for an already merged upload, ignoring");
            return Ok(ChunkReceipt {
                received: chunk.total_chunks,
                total_chunks: chunk.total_chunks,
                merge: None,
                already_merged: true,
            });
        }

        let dir = self.layout.chunk_dir(&chunk.upload_id);
        fs::create_dir_all(&dir).await?;
        write_atomic(
            &self.layout.chunk_path(&chunk.upload_id, chunk.chunk_number),
            &data,
        )
        .await?;

        let tally = tally_chunks(&dir, chunk.total_chunks).await?;
        if tally.bytes > self.limits.max_upload_size {
            warn!(
                bytes = tally.bytes,
                limit = self.limits.max_upload_size,
                "Chunks on disk exceed the upload limit, dropping chunk"
            );
            remove_file_if_exists(&self.layout.chunk_path(&chunk.upload_id, chunk.chunk_number))
                .await?;
            return Err(StorageError::TooLarge {
                what: "upload",
                size: tally.bytes,
                limit: self.limits.max_upload_size,
            });
        }
        debug!(received = tally.count, bytes = tally.bytes, "Chunk stored");

        let merge = (tally.count == chunk.total_chunks)
            .then(|| self.merges.trigger(MergeJob::from(chunk)));

        Ok(ChunkReceipt {
            received: tally.count,
            total_chunks: chunk.total_chunks,
            merge,
            already_merged: false,
        })
    }

    fn check_limits(&self, chunk: &ChunkDescriptor, chunk_len: u64) -> StorageResult<()> {
        if chunk.file_size > self.limits.max_upload_size {
            return Err(StorageError::TooLarge {
                what: "upload",
                size: chunk.file_size,
                limit: self.limits.max_upload_size,
            });
        }
        if chunk_len > self.limits.max_chunk_size {
            return Err(StorageError::TooLarge {
                what: "chunk",
                size: chunk_len,
                limit: self.limits.max_chunk_size,
            });
        }
        Ok(())
    }
}

/// Chunk files present for one upload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkTally {
    pub count: u32,
    pub bytes: u64,
}

/// Count chunk files in `dir` whose names are chunk numbers in `1..=total`,
/// and sum their sizes.
///
/// Temp files from in-progress atomic writes are not counted.
pub async fn tally_chunks(dir: &Path, total: u32) -> StorageResult<ChunkTally> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ChunkTally::default()),
        Err(e) => return Err(e.into()),
    };

    let mut tally = ChunkTally::default();
    while let Some(entry) = entries.next_entry().await? {
        let is_chunk = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
            .is_some_and(|n| (1..=total).contains(&n));
        if !is_chunk {
            continue;
        }
        let metadata = entry.metadata().await?;
        if metadata.is_file() {
            tally.count += 1;
            tally.bytes = tally.bytes.saturating_add(metadata.len());
        }
    }
    Ok(tally)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyre_core::UploadId;
    use pyre_core::config::StorageConfig;

    fn receiver(root: &Path, limits: UploadLimits) -> (Arc<StorageLayout>, ChunkReceiver) {
        let layout = Arc::new(StorageLayout::new(&StorageConfig::rooted_at(root)));
        let merges = Arc::new(MergeEngine::new(Arc::clone(&layout)));
        (Arc::clone(&layout), ChunkReceiver::new(layout, merges, limits))
    }

    fn limits() -> UploadLimits {
        UploadLimits {
            max_upload_size: 1024,
            max_chunk_size: 64,
        }
    }

    fn chunk(id: &UploadId, n: u32, total: u32) -> ChunkDescriptor {
        ChunkDescriptor::new(id.clone(), n, total, "notes.txt", 6).unwrap()
    }

    #[tokio::test]
    async fn counts_until_complete_then_merges() {
        let dir = tempfile::tempdir().unwrap();
        let (layout, receiver) = receiver(dir.path(), limits());
        let id = UploadId::new();

        let first = receiver.receive(&chunk(&id, 2, 2), Bytes::from_static(b"def")).await.unwrap();
        assert_eq!(first.received, 1);
        assert!(first.merge.is_none());

        let resent = receiver.receive(&chunk(&id, 2, 2), Bytes::from_static(b"def")).await.unwrap();
        assert_eq!(resent.received, 1);

        let last = receiver.receive(&chunk(&id, 1, 2), Bytes::from_static(b"abc")).await.unwrap();
        assert!(last.is_complete());
        assert!(!last.already_merged);
        let outcome = last.merge.unwrap().await.unwrap().unwrap();
        assert!(matches!(outcome, MergeOutcome::Merged { bytes: 6, .. }));
        assert_eq!(std::fs::read(layout.merged_file(&id, "notes.txt")).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn late_chunk_after_merge_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (layout, receiver) = receiver(dir.path(), limits());
        let id = UploadId::new();

        let receipt = receiver.receive(&chunk(&id, 1, 1), Bytes::from_static(b"abcdef")).await.unwrap();
        receipt.merge.unwrap().await.unwrap().unwrap();

        let late = receiver.receive(&chunk(&id, 1, 1), Bytes::from_static(b"zzz")).await.unwrap();
        assert!(late.merge.is_none());
        assert!(late.already_merged);
        assert!(!layout.chunk_dir(&id).exists());
        assert_eq!(std::fs::read(layout.merged_file(&id, "notes.txt")).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn rejects_oversized_chunk_and_upload() {
        let dir = tempfile::tempdir().unwrap();
        let (layout, receiver) = receiver(dir.path(), limits());
        let id = UploadId::new();

        let big_chunk = Bytes::from(vec![0u8; 65]);
        let err = receiver.receive(&chunk(&id, 1, 2), big_chunk).await.unwrap_err();
        assert!(matches!(err, StorageError::TooLarge { what: "chunk", .. }));

        let big_file = ChunkDescriptor::new(id.clone(), 1, 2, "notes.txt", 4096).unwrap();
        let err = receiver.receive(&big_file, Bytes::from_static(b"a")).await.unwrap_err();
        assert!(matches!(err, StorageError::TooLarge { what: "upload", .. }));

        assert!(!layout.chunk_dir(&id).exists());
    }

    #[tokio::test]
    async fn rejects_chunks_beyond_upload_limit_despite_small_declared_size() {
        let dir = tempfile::tempdir().unwrap();
        let (layout, receiver) = receiver(
            dir.path(),
            UploadLimits {
                max_upload_size: 128,
                max_chunk_size: 64,
            },
        );
        let id = UploadId::new();
        let piece = || Bytes::from(vec![7u8; 64]);

        for n in 1..=2 {
            let receipt = receiver.receive(&chunk(&id, n, 4), piece()).await.unwrap();
            assert_eq!(receipt.received, n);
        }

        let err = receiver.receive(&chunk(&id, 3, 4), piece()).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::TooLarge { what: "upload", size: 192, limit: 128 }
        ));
        assert!(!layout.chunk_path(&id, 3).exists());

        let err = receiver.receive(&chunk(&id, 4, 4), piece()).await.unwrap_err();
        assert!(matches!(err, StorageError::TooLarge { what: "upload", .. }));

        let tally = tally_chunks(&layout.chunk_dir(&id), 4).await.unwrap();
        assert_eq!(tally, ChunkTally { count: 2, bytes: 128 });
        assert!(!layout.complete_marker(&id).exists());
    }

    #[tokio::test]
    async fn count_ignores_temp_and_out_of_range_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("1"), b"a").unwrap();
        std::fs::write(dir.path().join("3"), b"a").unwrap();
        std::fs::write(dir.path().join("9"), b"a").unwrap();
        std::fs::write(dir.path().join(".2.tmp.abc"), b"a").unwrap();
        std::fs::create_dir(dir.path().join("2")).unwrap();

        std::fs::write(dir.path().join("1"), b"ab").unwrap();

        let tally = tally_chunks(dir.path(), 3).await.unwrap();
        assert_eq!(tally, ChunkTally { count: 2, bytes: 3 });
        let absent = tally_chunks(&dir.path().join("absent"), 3).await.unwrap();
        assert_eq!(absent, ChunkTally::default());
    }
}
