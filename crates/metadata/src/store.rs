//! Artifact metadata store trait and the JSON-file implementation.

use crate::error::{MetadataError, MetadataResult};
use async_trait::async_trait;
use pyre_core::{ArtifactId, ArtifactRecord, ExpiryFields};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Persistent storage for artifact metadata documents.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store a new record. Fails with `AlreadyExists` if the id is taken.
    async fn insert(&self, id: &ArtifactId, record: &ArtifactRecord) -> MetadataResult<()>;

    /// Replace an existing record in place.
    async fn update(&self, id: &ArtifactId, record: &ArtifactRecord) -> MetadataResult<()>;

    /// Load a record, or `None` when absent.
    async fn get(&self, id: &ArtifactId) -> MetadataResult<Option<ArtifactRecord>>;

    /// Load only the deadlines of a record, ignoring every other field.
    async fn expiry(&self, id: &ArtifactId) -> MetadataResult<Option<ExpiryFields>>;

    /// Remove a record. Returns false when it was already gone.
    async fn delete(&self, id: &ArtifactId) -> MetadataResult<bool>;

    /// Ids of every stored record, in no particular order.
    async fn list_ids(&self) -> MetadataResult<Vec<ArtifactId>>;

    /// Check that the store is usable.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// One `<id>.json` document per artifact under a single directory.
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl Into<PathBuf>) -> MetadataResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, id: &ArtifactId) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    fn temp_path(&self, id: &ArtifactId) -> PathBuf {
        self.root
            .join(format!(".{id}.json.tmp.{}", Uuid::new_v4().simple()))
    }

    async fn write_temp(&self, id: &ArtifactId, record: &ArtifactRecord) -> MetadataResult<PathBuf> {
        let data = serde_json::to_vec_pretty(record)?;
        let temp_path = self.temp_path(id);

        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await
        }
        .await;

        match written {
            Ok(()) => Ok(temp_path),
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(e.into())
            }
        }
    }

    async fn read_document(&self, id: &ArtifactId) -> MetadataResult<Option<Vec<u8>>> {
        match fs::read(self.document_path(id)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ArtifactStore for JsonFileStore {
    #[instrument(skip(self, record), fields(artifact_id = %id, store = "json"))]
    async fn insert(&self, id: &ArtifactId, record: &ArtifactRecord) -> MetadataResult<()> {
        let temp_path = self.write_temp(id, record).await?;

        // Linking refuses to replace an existing document.
        let linked = fs::hard_link(&temp_path, self.document_path(id)).await;
        if let Err(e) = fs::remove_file(&temp_path).await {
            warn!(error = %e, "Failed to remove temp document");
        }

        match linked {
            Ok(()) => {
                debug!("Metadata stored");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(MetadataError::AlreadyExists(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, record), fields(artifact_id = %id, store = "json"))]
    async fn update(&self, id: &ArtifactId, record: &ArtifactRecord) -> MetadataResult<()> {
        let temp_path = self.write_temp(id, record).await?;
        if let Err(e) = fs::rename(&temp_path, self.document_path(id)).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    #[instrument(skip(self), fields(artifact_id = %id, store = "json"))]
    async fn get(&self, id: &ArtifactId) -> MetadataResult<Option<ArtifactRecord>> {
        match self.read_document(id).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    async fn expiry(&self, id: &ArtifactId) -> MetadataResult<Option<ExpiryFields>> {
        match self.read_document(id).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(artifact_id = %id, store = "json"))]
    async fn delete(&self, id: &ArtifactId) -> MetadataResult<bool> {
        match fs::remove_file(self.document_path(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_ids(&self) -> MetadataResult<Vec<ArtifactId>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            match ArtifactId::parse_canonical(stem) {
                Some(id) => ids.push(id),
                None => debug!(file = %stem, "Skipping non-artifact file in metadata directory"),
            }
        }
        Ok(ids)
    }

    async fn health_check(&self) -> MetadataResult<()> {
        let meta = fs::metadata(&self.root).await?;
        if meta.is_dir() {
            Ok(())
        } else {
            Err(MetadataError::Internal(format!(
                "{} is not a directory",
                self.root.display()
            )))
        }
    }
}
