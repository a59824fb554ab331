//! Irreversible removal of everything stored for an artifact.

use crate::error::{StorageError, StorageResult};
use crate::files::{remove_dir_if_exists, remove_file_if_exists};
use pyre_core::config::BurnConfig;
use pyre_core::{ArtifactId, StorageLayout};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// How hard to try removing a merged-file directory.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &BurnConfig) -> Self {
        Self {
            attempts: config.retry_attempts.max(1),
            delay: config.retry_delay(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&BurnConfig::default())
    }
}

/// What a burn actually found and removed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BurnReport {
    pub metadata_removed: bool,
    pub upload_dir_removed: bool,
    pub temp_dir_removed: bool,
}

impl BurnReport {
    pub fn removed_anything(&self) -> bool {
        self.metadata_removed || self.upload_dir_removed || self.temp_dir_removed
    }
}

pub struct Burner {
    layout: Arc<StorageLayout>,
    retry: RetryPolicy,
}

impl Burner {
    pub fn new(layout: Arc<StorageLayout>, retry: RetryPolicy) -> Self {
        Self { layout, retry }
    }

    /// Remove the metadata document, the merged-file directory and any
    /// leftover chunk directory.
    ///
    /// Burning an artifact that is already gone succeeds. Every step is
    /// attempted even when an earlier one fails; the first failure is
    /// returned.
    #[instrument(skip(self), fields(artifact_id = %id))]
    pub async fn burn(&self, id: &ArtifactId) -> StorageResult<BurnReport> {
        let mut report = BurnReport::default();
        let mut first_error: Option<StorageError> = None;

        match remove_file_if_exists(&self.layout.metadata_path(id)).await {
            Ok(removed) => report.metadata_removed = removed,
            Err(e) => {
                error!(error = %e, "Failed to remove metadata");
                first_error = first_error.or(Some(e.into()));
            }
        }

        match self.remove_with_retry(&self.layout.artifact_upload_dir(id)).await {
            Ok(removed) => report.upload_dir_removed = removed,
            Err(e) => {
                error!(error = %e, "Failed to remove upload directory");
                first_error = first_error.or(Some(e.into()));
            }
        }

        match remove_dir_if_exists(&self.layout.artifact_chunk_dir(id)).await {
            Ok(removed) => report.temp_dir_removed = removed,
            Err(e) => {
                error!(error = %e, "Failed to remove chunk directory");
                first_error = first_error.or(Some(e.into()));
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if report.removed_anything() {
            info!(
                metadata = report.metadata_removed,
                upload_dir = report.upload_dir_removed,
                temp_dir = report.temp_dir_removed,
                "Artifact burned"
            );
        }
        Ok(report)
    }

    async fn remove_with_retry(&self, path: &Path) -> std::io::Result<bool> {
        let mut attempt = 1;
        loop {
            match remove_dir_if_exists(path).await {
                Ok(removed) => return Ok(removed),
                Err(e) if attempt < self.retry.attempts => {
                    warn!(
                        attempt,
                        attempts = self.retry.attempts,
                        error = %e,
                        "Directory removal failed, retrying"
                    );
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyre_core::config::StorageConfig;

    fn burner(root: &Path) -> (Arc<StorageLayout>, Burner) {
        let layout = Arc::new(StorageLayout::new(&StorageConfig::rooted_at(root)));
        let retry = RetryPolicy {
            attempts: 2,
            delay: Duration::from_millis(1),
        };
        (Arc::clone(&layout), Burner::new(layout, retry))
    }

    #[tokio::test]
    async fn removes_all_three_locations() {
        let dir = tempfile::tempdir().unwrap();
        let (layout, burner) = burner(dir.path());
        let id = ArtifactId::new();

        std::fs::create_dir_all(layout.data_dir()).unwrap();
        std::fs::write(layout.metadata_path(&id), "{}").unwrap();
        std::fs::create_dir_all(layout.artifact_upload_dir(&id)).unwrap();
        std::fs::write(layout.artifact_file(&id, "a.bin"), b"x").unwrap();
        std::fs::create_dir_all(layout.artifact_chunk_dir(&id)).unwrap();

        let report = burner.burn(&id).await.unwrap();
        assert_eq!(
            report,
            BurnReport {
                metadata_removed: true,
                upload_dir_removed: true,
                temp_dir_removed: true,
            }
        );
        assert!(!layout.metadata_path(&id).exists());
        assert!(!layout.artifact_upload_dir(&id).exists());
        assert!(!layout.artifact_chunk_dir(&id).exists());
    }

    #[tokio::test]
    async fn burning_twice_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let (layout, burner) = burner(dir.path());
        let id = ArtifactId::new();
        std::fs::create_dir_all(layout.data_dir()).unwrap();
        std::fs::write(layout.metadata_path(&id), "{}").unwrap();

        assert!(burner.burn(&id).await.unwrap().metadata_removed);
        let second = burner.burn(&id).await.unwrap();
        assert!(!second.removed_anything());
    }

    #[tokio::test]
    async fn leaves_other_artifacts_alone() {
        let dir = tempfile::tempdir().unwrap();
        let (layout, burner) = burner(dir.path());
        let doomed = ArtifactId::new();
        let kept = ArtifactId::new();
        std::fs::create_dir_all(layout.data_dir()).unwrap();
        std::fs::write(layout.metadata_path(&doomed), "{}").unwrap();
        std::fs::write(layout.metadata_path(&kept), "{}").unwrap();

        burner.burn(&doomed).await.unwrap();
        assert!(layout.metadata_path(&kept).exists());
    }

    #[tokio::test]
    async fn hard_metadata_failure_still_removes_directories() {
        let dir = tempfile::tempdir().unwrap();
        let (layout, burner) = burner(dir.path());
        let id = ArtifactId::new();

        // A non-empty directory where the metadata file should be cannot be
        // removed with remove_file.
        std::fs::create_dir_all(layout.metadata_path(&id)).unwrap();
        std::fs::write(layout.metadata_path(&id).join("stray"), b"x").unwrap();
        std::fs::create_dir_all(layout.artifact_upload_dir(&id)).unwrap();
        std::fs::write(layout.artifact_file(&id, "a.bin"), b"x").unwrap();
        std::fs::create_dir_all(layout.artifact_chunk_dir(&id)).unwrap();

        let err = burner.burn(&id).await.unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));

        assert!(layout.metadata_path(&id).exists());
        assert!(!layout.artifact_upload_dir(&id).exists());
        assert!(!layout.artifact_chunk_dir(&id).exists());
    }

    #[tokio::test]
    async fn upload_dir_removal_is_retried_before_failing() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Arc::new(StorageLayout::new(&StorageConfig::rooted_at(dir.path())));
        let retry = RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(25),
        };
        let burner = Burner::new(Arc::clone(&layout), retry);
        let id = ArtifactId::new();

        std::fs::create_dir_all(layout.data_dir()).unwrap();
        std::fs::write(layout.metadata_path(&id), "{}").unwrap();
        // A plain file in place of the upload directory fails every attempt.
        std::fs::create_dir_all(layout.final_dir()).unwrap();
        std::fs::write(layout.artifact_upload_dir(&id), b"not a directory").unwrap();
        std::fs::create_dir_all(layout.artifact_chunk_dir(&id)).unwrap();

        let started = std::time::Instant::now();
        let err = burner.burn(&id).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, StorageError::Io(_)));
        assert!(
            elapsed >= retry.delay * (retry.attempts - 1),
            "burn gave up after {elapsed:?}"
        );
        assert!(!layout.metadata_path(&id).exists());
        assert!(!layout.artifact_chunk_dir(&id).exists());
        assert!(layout.artifact_upload_dir(&id).exists());
    }

    #[test]
    fn retry_policy_never_drops_below_one_attempt() {
        let config = BurnConfig {
            retry_attempts: 0,
            retry_delay_ms: 5,
            ..BurnConfig::default()
        };
        let retry = RetryPolicy::from_config(&config);
        assert_eq!(retry.attempts, 1);
        assert_eq!(retry.delay, Duration::from_millis(5));
    }
}
