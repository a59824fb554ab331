//! Application state shared across handlers.

use crate::burn::BurnQueue;
use crate::cleanup::CleanupScheduler;
use pyre_core::config::AppConfig;
use pyre_core::{ExpirationPolicy, StorageLayout};
use pyre_metadata::{ArtifactReader, ArtifactStore};
use pyre_storage::{Burner, ChunkReceiver, MergeEngine, RetryPolicy, UploadLimits, UploadTracker};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Directory naming for chunks, merged files and metadata.
    pub layout: Arc<StorageLayout>,
    pub merges: Arc<MergeEngine>,
    pub chunks: Arc<ChunkReceiver>,
    pub tracker: Arc<UploadTracker>,
    /// Metadata documents.
    pub store: Arc<dyn ArtifactStore>,
    /// Expiry-aware record reads.
    pub reader: Arc<ArtifactReader>,
    pub policy: Arc<ExpirationPolicy>,
    /// Burn worker pool.
    pub burns: Arc<BurnQueue>,
}

impl AppState {
    /// Wire every component from configuration. Spawns the burn workers,
    /// so it must be called within a Tokio runtime.
    pub fn new(config: AppConfig, store: Arc<dyn ArtifactStore>) -> Self {
        let layout = Arc::new(StorageLayout::new(&config.storage));
        let merges = Arc::new(MergeEngine::new(Arc::clone(&layout)));
        let chunks = Arc::new(ChunkReceiver::new(
            Arc::clone(&layout),
            Arc::clone(&merges),
            UploadLimits::from(&config.server),
        ));
        let tracker = Arc::new(UploadTracker::new(Arc::clone(&layout)));
        let policy = Arc::new(ExpirationPolicy::new(config.expiration.clone()));
        let reader = Arc::new(ArtifactReader::new(Arc::clone(&store), Arc::clone(&policy)));
        let burner = Arc::new(Burner::new(
            Arc::clone(&layout),
            RetryPolicy::from_config(&config.burn),
        ));
        let burns = Arc::new(BurnQueue::new(burner, Arc::clone(&reader), &config.burn));

        Self {
            config: Arc::new(config),
            layout,
            merges,
            chunks,
            tracker,
            store,
            reader,
            policy,
            burns,
        }
    }

    /// Cleanup scheduler over this state's store and burn queue.
    pub fn cleanup_scheduler(&self) -> Arc<CleanupScheduler> {
        Arc::new(CleanupScheduler::new(
            Arc::clone(&self.store),
            Arc::clone(&self.burns),
            &self.config.cleanup,
        ))
    }
}
