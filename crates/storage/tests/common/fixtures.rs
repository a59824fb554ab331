use bytes::Bytes;
use pyre_core::StorageLayout;
use pyre_core::config::StorageConfig;
use pyre_storage::{
    Burner, ChunkReceiver, MergeEngine, RetryPolicy, UploadLimits, UploadTracker,
    ensure_directories,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Compute SHA-256 hash of data as hex string
pub fn sha256_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    result.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Generate deterministic test data using a seeded pseudo-random generator
/// Same seed produces same output (reproducible tests)
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Split `data` into chunks of at most `size` bytes.
pub fn split_chunks(data: &Bytes, size: usize) -> Vec<Bytes> {
    (0..data.len())
        .step_by(size)
        .map(|start| data.slice(start..(start + size).min(data.len())))
        .collect()
}

/// Storage components wired over a temporary directory.
#[allow(dead_code)]
pub struct TestStorage {
    pub layout: Arc<StorageLayout>,
    pub merges: Arc<MergeEngine>,
    pub receiver: ChunkReceiver,
    pub tracker: UploadTracker,
    pub burner: Burner,
    _temp_dir: TempDir,
}

impl TestStorage {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let layout = Arc::new(StorageLayout::new(&StorageConfig::rooted_at(temp_dir.path())));
        ensure_directories(&layout).await.expect("Failed to create roots");

        let merges = Arc::new(MergeEngine::new(Arc::clone(&layout)));
        let limits = UploadLimits {
            max_upload_size: 64 * 1024 * 1024,
            max_chunk_size: 1024 * 1024,
        };
        let retry = RetryPolicy {
            attempts: 2,
            delay: Duration::from_millis(5),
        };

        Self {
            receiver: ChunkReceiver::new(Arc::clone(&layout), Arc::clone(&merges), limits),
            tracker: UploadTracker::new(Arc::clone(&layout)),
            burner: Burner::new(Arc::clone(&layout), retry),
            merges,
            layout,
            _temp_dir: temp_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_bytes_deterministic() {
        assert_eq!(seeded_bytes(42, 1000), seeded_bytes(42, 1000));
        assert_ne!(seeded_bytes(42, 1000), seeded_bytes(43, 1000));
    }

    #[test]
    fn test_split_chunks_covers_input() {
        let data = seeded_bytes(7, 10);
        let chunks = split_chunks(&data, 4);
        assert_eq!(chunks.iter().map(Bytes::len).collect::<Vec<_>>(), vec![4, 4, 2]);
    }
}
