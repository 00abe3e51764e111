use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::Result;
use crate::multi_lock::MultiLock;
use crate::repository::LectureStore;
use crate::resolver::LectureResolver;
use crate::scheduler::Scheduler;

/// Periodically probes the ids just above the highest stored one and feeds
/// newly published lectures into the forward queue.
pub struct UpperRefresher {
    scheduler: Arc<Scheduler>,
    resolver: Arc<dyn LectureResolver>,
    store: Arc<dyn LectureStore>,
    period: Duration,
    window: u32,
}

impl std::fmt::Debug for UpperRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpperRefresher")
            .field("period", &self.period)
            .field("window", &self.window)
            .finish()
    }
}

impl UpperRefresher {
    pub fn new(
        scheduler: Arc<Scheduler>,
        resolver: Arc<dyn LectureResolver>,
        store: Arc<dyn LectureStore>,
        period: Duration,
        window: u32,
    ) -> Self {
        Self {
            scheduler,
            resolver,
            store,
            period,
            window,
        }
    }

    /// Refresh loop. The first detection runs synchronously during startup
    /// seeding, so each iteration sleeps before refreshing. A failed cycle
    /// is logged and abandoned; the next one starts from scratch.
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("upper refresher shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.period) => {
                    match self.refresh_once().await {
                        Ok(added) if added > 0 => {
                            info!(added, "new lectures queued for transcription");
                        }
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "upper refresh cycle failed"),
                    }
                }
            }
        }
    }

    /// Probe the window above the highest stored id and merge every
    /// reachable id into the forward queue, skipping anything already
    /// queued, prioritized, or in flight.
    pub async fn refresh_once(&self) -> Result<usize> {
        let Some(highest) = self.store.highest_stored().await? else {
            debug!("no stored lectures yet, skipping upper refresh");
            return Ok(0);
        };

        let mut reachable = Vec::new();
        for step in 1..=self.window {
            let id = highest.offset(step);
            let status = self.resolver.probe(id).await;
            if status.is_available() {
                reachable.push(id);
            } else {
                trace!(%id, ?status, "id above highest not reachable");
            }
        }

        let queues = [
            self.scheduler.forward(),
            self.scheduler.in_flight(),
            self.scheduler.priority(),
        ];
        let mut lock = MultiLock::acquire(&queues).await;
        let mut added = 0;
        for id in reachable {
            let duplicate = lock.queue(0).contains(id)
                || lock.queue(1).contains(id)
                || lock.queue(2).contains(id);
            if !duplicate {
                lock.queue(0).add(id);
                added += 1;
            }
        }
        Ok(added)
    }
}

/// Periodically reconciles the in-between queue with the store's gap set.
pub struct GapRefresher {
    scheduler: Arc<Scheduler>,
    store: Arc<dyn LectureStore>,
    period: Duration,
}

impl std::fmt::Debug for GapRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GapRefresher")
            .field("period", &self.period)
            .finish()
    }
}

impl GapRefresher {
    pub fn new(
        scheduler: Arc<Scheduler>,
        store: Arc<dyn LectureStore>,
        period: Duration,
    ) -> Self {
        Self {
            scheduler,
            store,
            period,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("gap refresher shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.period) => {
                    match self.refresh_once().await {
                        Ok(added) if added > 0 => {
                            info!(added, "gap lectures queued for transcription");
                        }
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "gap refresh cycle failed"),
                    }
                }
            }
        }
    }

    /// Merge the missing-and-not-blacklisted set into the in-between queue.
    /// Ids that were waiting in backward are promoted: once the store has
    /// entries below them they are gap candidates, not historical ones.
    /// The in-between queue is kept in descending order, newest gap first.
    pub async fn refresh_once(&self) -> Result<usize> {
        let missing = self.store.missing_inbetween_not_blacklisted().await?;

        let queues = [
            self.scheduler.in_between(),
            self.scheduler.backward(),
            self.scheduler.in_flight(),
            self.scheduler.priority(),
        ];
        let mut lock = MultiLock::acquire(&queues).await;
        let mut added = 0;
        for id in missing {
            let duplicate = lock.queue(0).contains(id)
                || lock.queue(2).contains(id)
                || lock.queue(3).contains(id);
            if !duplicate {
                lock.queue(0).add(id);
                added += 1;
            }
            lock.queue(1).remove(id);
        }
        lock.queue(0).sort_reverse();
        Ok(added)
    }
}
