//! Expiry-aware reads that stamp the first-access window exactly once.

use crate::error::MetadataResult;
use crate::store::ArtifactStore;
use dashmap::DashMap;
use pyre_core::{ArtifactId, ArtifactRecord, ExpirationPolicy, ExpiryReason};
use std::future::Future;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// What a read found.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The record is readable. Its window fields reflect any stamp just made.
    Available(ArtifactRecord),
    /// A deadline has passed. The caller is expected to burn the artifact.
    Expired(ExpiryReason),
    /// No record exists.
    Missing,
}

/// Serves record reads through the expiration policy.
///
/// Stamping and burning of one id are serialized through a per-id lock, so
/// concurrent first reads compute a single window and a burn never races a
/// stamp that would rewrite the document.
pub struct ArtifactReader {
    store: Arc<dyn ArtifactStore>,
    policy: Arc<ExpirationPolicy>,
    locks: DashMap<ArtifactId, Arc<Mutex<()>>>,
}

impl ArtifactReader {
    pub fn new(store: Arc<dyn ArtifactStore>, policy: Arc<ExpirationPolicy>) -> Self {
        Self {
            store,
            policy,
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    pub fn policy(&self) -> &ExpirationPolicy {
        &self.policy
    }

    /// Read a record for delivery, stamping the access window on first read.
    #[instrument(skip(self), fields(artifact_id = %id))]
    pub async fn open(&self, id: &ArtifactId, now: OffsetDateTime) -> MetadataResult<ReadOutcome> {
        let record = match self.load(id).await? {
            Some(record) => record,
            None => return Ok(ReadOutcome::Missing),
        };
        if let Some(reason) = record.expired_at(now) {
            return Ok(ReadOutcome::Expired(reason));
        }
        if !self.policy.tracks_access_window() || record.first_accessed_time.is_some() {
            return Ok(ReadOutcome::Available(record));
        }

        self.locked(id, self.stamp(id, now)).await
    }

    /// Check a record's deadlines without stamping anything.
    pub async fn peek(&self, id: &ArtifactId, now: OffsetDateTime) -> MetadataResult<ReadOutcome> {
        Ok(match self.load(id).await? {
            None => ReadOutcome::Missing,
            Some(record) => match record.expired_at(now) {
                Some(reason) => ReadOutcome::Expired(reason),
                None => ReadOutcome::Available(record),
            },
        })
    }

    /// Run `fut` while holding the lock for `id`.
    ///
    /// The map entry is released even when the caller is dropped mid-wait.
    pub async fn locked<F, T>(&self, id: &ArtifactId, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let claim = LockClaim::acquire(&self.locks, id);
        let _guard = claim.mutex().lock().await;
        fut.await
    }

    /// Number of ids with a lock currently held or awaited.
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }

    async fn stamp(&self, id: &ArtifactId, now: OffsetDateTime) -> MetadataResult<ReadOutcome> {
        // Re-read: another reader may have stamped, or a burn removed it.
        let mut record = match self.load(id).await? {
            Some(record) => record,
            None => return Ok(ReadOutcome::Missing),
        };
        if let Some(reason) = record.expired_at(now) {
            return Ok(ReadOutcome::Expired(reason));
        }

        if self.policy.stamp_first_access(&mut record, now) {
            self.store.update(id, &record).await?;
            debug!(
                ends_at = ?record.access_window_ends_at,
                "Access window started"
            );
        }
        Ok(ReadOutcome::Available(record))
    }

    async fn load(&self, id: &ArtifactId) -> MetadataResult<Option<ArtifactRecord>> {
        self.store.get(id).await
    }
}

/// A reference to one id's lock that prunes the map entry when dropped.
struct LockClaim<'a> {
    locks: &'a DashMap<ArtifactId, Arc<Mutex<()>>>,
    id: ArtifactId,
    lock: Arc<Mutex<()>>,
}

impl<'a> LockClaim<'a> {
    fn acquire(locks: &'a DashMap<ArtifactId, Arc<Mutex<()>>>, id: &ArtifactId) -> Self {
        let lock = Arc::clone(locks.entry(*id).or_default().value());
        Self {
            locks,
            id: *id,
            lock,
        }
    }

    fn mutex(&self) -> &Mutex<()> {
        &self.lock
    }
}

impl Drop for LockClaim<'_> {
    fn drop(&mut self) {
        // Only the map and this claim still reference the lock.
        self.locks.remove_if(&self.id, |_, lock| {
            Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2
        });
    }
}
