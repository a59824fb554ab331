//! Periodic sweep that burns records past either deadline.

use crate::burn::{BurnError, BurnOrigin, BurnQueue};
use crate::metrics::{CLEANUP_CYCLES, CLEANUP_EXPIRED_FOUND};
use pyre_core::config::CleanupConfig;
use pyre_metadata::ArtifactStore;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Counts from one cleanup cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Metadata documents listed.
    pub scanned: u64,
    /// Records past a deadline.
    pub expired: u64,
    /// Expired records handed to the burn queue.
    pub enqueued: u64,
    /// Expired records already pending a burn, or records gone before they could be read.
    pub skipped: u64,
    /// Unreadable records and rejected burns.
    pub errors: u64,
}

pub struct CleanupScheduler {
    store: Arc<dyn ArtifactStore>,
    burns: Arc<BurnQueue>,
    interval: Duration,
}

impl CleanupScheduler {
    pub fn new(store: Arc<dyn ArtifactStore>, burns: Arc<BurnQueue>, config: &CleanupConfig) -> Self {
        Self {
            store,
            burns,
            interval: config.interval(),
        }
    }

    /// Scan every record once and schedule burns for the expired ones.
    ///
    /// Only the two deadline fields are read. Records with neither deadline
    /// are left alone. Burns run on the queue's workers, so a slow removal
    /// never holds up the scan.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self, now: OffsetDateTime) -> CleanupReport {
        let mut report = CleanupReport::default();
        CLEANUP_CYCLES.inc();

        let ids = match self.store.list_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "Failed to list metadata records");
                report.errors += 1;
                return report;
            }
        };

        for id in ids {
            report.scanned += 1;

            let expiry = match self.store.expiry(&id).await {
                Ok(Some(expiry)) => expiry,
                Ok(None) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(artifact_id = %id, error = %e, "Failed to read record deadlines");
                    report.errors += 1;
                    continue;
                }
            };

            let Some(reason) = expiry.expired_at(now) else {
                continue;
            };
            report.expired += 1;
            debug!(artifact_id = %id, reason = %reason, "Record expired");

            match self.burns.enqueue(id, BurnOrigin::Cleanup) {
                Ok(ticket) if ticket.is_duplicate() => report.skipped += 1,
                Ok(_) => report.enqueued += 1,
                Err(BurnError::QueueFull) => {
                    report.errors += 1;
                }
                Err(e) => {
                    error!(error = %e, "Burn queue unavailable, ending cycle early");
                    report.errors += 1;
                    break;
                }
            }
        }

        CLEANUP_EXPIRED_FOUND.inc_by(report.expired);
        report
    }

    /// Run a cycle now, then one every interval, on a background task.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.interval.as_secs(),
                "Cleanup scheduler started"
            );
            loop {
                let report = self.run_cycle(OffsetDateTime::now_utc()).await;
                if report.expired > 0 || report.errors > 0 {
                    info!(
                        scanned = report.scanned,
                        expired = report.expired,
                        enqueued = report.enqueued,
                        skipped = report.skipped,
                        errors = report.errors,
                        "Cleanup cycle finished"
                    );
                } else {
                    debug!(scanned = report.scanned, "Cleanup cycle found nothing");
                }
                tokio::time::sleep(self.interval).await;
            }
        })
    }
}
