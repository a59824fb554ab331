//! Artifact metadata persistence for pyre.
//!
//! This crate provides:
//! - The `ArtifactStore` trait and its JSON-file implementation
//! - Expiry-aware reads that stamp the first-access window once

pub mod access;
pub mod error;
pub mod store;

pub use access::{ArtifactReader, ReadOutcome};
pub use error::{MetadataError, MetadataResult};
pub use store::{ArtifactStore, JsonFileStore};

use pyre_core::config::StorageConfig;
use std::sync::Arc;

/// Open the metadata store described by the storage configuration.
pub async fn from_config(config: &StorageConfig) -> MetadataResult<Arc<dyn ArtifactStore>> {
    config.validate().map_err(MetadataError::Internal)?;
    let store = JsonFileStore::new(config.data_dir.clone()).await?;
    Ok(Arc::new(store))
}
