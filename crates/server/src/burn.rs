//! Bounded burn worker pool.
//!
//! Every burn in the server goes through [`BurnQueue`]: reads that find an
//! expired record, downloads whose file has vanished, cleanup cycles and
//! explicit deletes. Requests for an id that is already queued or running
//! join the pending burn instead of scheduling a second one.

use crate::metrics::{BURNS_IN_FLIGHT, record_burn};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use pyre_core::ArtifactId;
use pyre_core::config::BurnConfig;
use pyre_metadata::ArtifactReader;
use pyre_storage::{BurnReport, Burner};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{error, info, warn};

/// What asked for a burn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BurnOrigin {
    /// A metadata read found the record expired.
    Read,
    /// A download found the record expired or its file missing.
    Download,
    /// The periodic cleanup scan.
    Cleanup,
    /// `DELETE /v1/artifacts/{id}`.
    Explicit,
}

impl BurnOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Download => "download",
            Self::Cleanup => "cleanup",
            Self::Explicit => "explicit",
        }
    }
}

impl fmt::Display for BurnOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum BurnError {
    #[error("burn queue is full")]
    QueueFull,

    #[error("burn queue is shut down")]
    Closed,

    #[error("burn failed: {0}")]
    Failed(String),
}

pub type BurnResult = Result<BurnReport, BurnError>;

/// Handle on a queued burn.
#[derive(Debug)]
pub struct BurnTicket {
    rx: oneshot::Receiver<BurnResult>,
    deduplicated: bool,
}

impl BurnTicket {
    /// Wait for the burn to finish.
    pub async fn wait(self) -> BurnResult {
        self.rx.await.unwrap_or(Err(BurnError::Closed))
    }

    /// True when this request joined a burn that was already pending.
    pub fn is_duplicate(&self) -> bool {
        self.deduplicated
    }
}

/// Lifetime counters for one queue.
#[derive(Debug, Default)]
pub struct BurnStats {
    enqueued: AtomicU64,
    deduplicated: AtomicU64,
    rejected: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BurnStatsSnapshot {
    pub enqueued: u64,
    pub deduplicated: u64,
    pub rejected: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl BurnStats {
    pub fn snapshot(&self) -> BurnStatsSnapshot {
        BurnStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

struct BurnJob {
    id: ArtifactId,
    origin: BurnOrigin,
}

type Waiters = DashMap<ArtifactId, Vec<oneshot::Sender<BurnResult>>>;

/// Bounded queue of burns drained by a fixed set of workers.
///
/// Workers take the reader's per-id lock around each burn, so a burn never
/// interleaves with a first-access stamp rewriting the same document.
pub struct BurnQueue {
    tx: mpsc::Sender<BurnJob>,
    pending: Arc<Waiters>,
    stats: Arc<BurnStats>,
}

impl BurnQueue {
    /// Create the queue and spawn its workers. Must be called within a Tokio runtime.
    pub fn new(burner: Arc<Burner>, reader: Arc<ArtifactReader>, config: &BurnConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let pending: Arc<Waiters> = Arc::new(DashMap::new());
        let stats = Arc::new(BurnStats::default());

        for worker in 0..config.workers.max(1) {
            let worker_ctx = Worker {
                index: worker,
                rx: Arc::clone(&rx),
                burner: Arc::clone(&burner),
                reader: Arc::clone(&reader),
                pending: Arc::clone(&pending),
                stats: Arc::clone(&stats),
            };
            tokio::spawn(worker_ctx.run());
        }

        Self { tx, pending, stats }
    }

    /// Schedule a burn of `id`.
    ///
    /// Fails with [`BurnError::QueueFull`] when the queue is at capacity.
    /// Expired records stay unreadable in that case and the next cleanup
    /// cycle schedules them again.
    pub fn enqueue(&self, id: ArtifactId, origin: BurnOrigin) -> Result<BurnTicket, BurnError> {
        let (waiter, rx) = oneshot::channel();

        match self.pending.entry(id) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().push(waiter);
                self.stats.deduplicated.fetch_add(1, Ordering::Relaxed);
                record_burn(origin.as_str(), "deduplicated");
                return Ok(BurnTicket {
                    rx,
                    deduplicated: true,
                });
            }
            Entry::Vacant(entry) => {
                entry.insert(vec![waiter]);
            }
        }

        match self.tx.try_send(BurnJob { id, origin }) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(BurnTicket {
                    rx,
                    deduplicated: false,
                })
            }
            Err(e) => {
                let err = match e {
                    mpsc::error::TrySendError::Full(_) => BurnError::QueueFull,
                    mpsc::error::TrySendError::Closed(_) => BurnError::Closed,
                };
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                record_burn(origin.as_str(), "rejected");
                warn!(artifact_id = %id, origin = %origin, error = %err, "Burn rejected");
                if let Some((_, waiters)) = self.pending.remove(&id) {
                    for waiter in waiters {
                        let _ = waiter.send(Err(err.clone()));
                    }
                }
                Err(err)
            }
        }
    }

    /// Ids queued or being burned right now.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> BurnStatsSnapshot {
        self.stats.snapshot()
    }
}

struct Worker {
    index: usize,
    rx: Arc<Mutex<mpsc::Receiver<BurnJob>>>,
    burner: Arc<Burner>,
    reader: Arc<ArtifactReader>,
    pending: Arc<Waiters>,
    stats: Arc<BurnStats>,
}

impl Worker {
    async fn run(self) {
        loop {
            let job = { self.rx.lock().await.recv().await };
            let Some(job) = job else {
                tracing::debug!(worker = self.index, "Burn queue closed, worker exiting");
                return;
            };
            self.process(job).await;
        }
    }

    async fn process(&self, job: BurnJob) {
        let BurnJob { id, origin } = job;

        BURNS_IN_FLIGHT.inc();
        let result = self
            .reader
            .locked(&id, self.burner.burn(&id))
            .await
            .map_err(|e| BurnError::Failed(e.to_string()));
        BURNS_IN_FLIGHT.dec();

        match &result {
            Ok(report) if report.removed_anything() => {
                self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
                record_burn(origin.as_str(), "burned");
                info!(artifact_id = %id, origin = %origin, "Burn complete");
            }
            Ok(_) => {
                self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
                record_burn(origin.as_str(), "already_gone");
                tracing::debug!(artifact_id = %id, origin = %origin, "Nothing left to burn");
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                record_burn(origin.as_str(), "failed");
                error!(artifact_id = %id, origin = %origin, error = %e, "Burn failed");
            }
        }

        if let Some((_, waiters)) = self.pending.remove(&id) {
            for waiter in waiters {
                // Dropped tickets are fire-and-forget callers.
                let _ = waiter.send(result.clone());
            }
        }
    }
}
