use std::sync::Arc;
use std::time::Duration;

use lektor_model::{LectureId, QueueSnapshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::multi_lock::MultiLock;
use crate::queue::IdQueue;
use crate::repository::LectureStore;
use crate::resolver::LectureResolver;

/// Result of an operator's prioritize request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrioritizeOutcome {
    /// Moved (or freshly added) to the priority queue.
    Prioritized,
    /// Already at the front of the line.
    AlreadyPrioritized,
    /// Currently being processed; prioritizing now would double-process.
    AlreadyInFlight,
    /// The portal does not serve this id right now.
    NotAvailable,
}

/// Owner of the five queues and of the one selection operation the worker
/// uses.
///
/// Selection precedence is strict: priority, then forward, then in-between,
/// then backward. The in-flight guard records what the worker is busy with
/// so the refreshers leave those ids alone; entries are evicted by a timed
/// reaper, never by the worker (see [`Scheduler::next`]).
pub struct Scheduler {
    priority: IdQueue,
    forward: IdQueue,
    in_between: IdQueue,
    backward: IdQueue,
    // Shared with the reaper tasks, which may outlive a `next` call by the
    // full eviction timeout.
    in_flight: Arc<IdQueue>,
    resolver: Arc<dyn LectureResolver>,
    store: Arc<dyn LectureStore>,
    eviction_timeout: Duration,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("eviction_timeout", &self.eviction_timeout)
            .finish()
    }
}

impl Scheduler {
    pub fn new(
        resolver: Arc<dyn LectureResolver>,
        store: Arc<dyn LectureStore>,
        eviction_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            priority: IdQueue::new("priority"),
            forward: IdQueue::new("forward"),
            in_between: IdQueue::new("in-between"),
            backward: IdQueue::new("backward"),
            in_flight: Arc::new(IdQueue::new("in-flight")),
            resolver,
            store,
            eviction_timeout,
            shutdown,
        }
    }

    pub fn priority(&self) -> &IdQueue {
        &self.priority
    }

    pub fn forward(&self) -> &IdQueue {
        &self.forward
    }

    pub fn in_between(&self) -> &IdQueue {
        &self.in_between
    }

    pub fn backward(&self) -> &IdQueue {
        &self.backward
    }

    pub fn in_flight(&self) -> &IdQueue {
        self.in_flight.as_ref()
    }

    fn sources(&self) -> [&IdQueue; 4] {
        [
            &self.priority,
            &self.forward,
            &self.in_between,
            &self.backward,
        ]
    }

    /// Pick the next lecture id that is worth processing, or `None` when
    /// every source queue is empty.
    ///
    /// Each pass atomically dequeues the head of the highest-precedence
    /// non-empty queue, then drops it again if the transcript already
    /// exists or the portal does not serve the id; unusable candidates are
    /// discarded, not re-queued, so the loop finishes after at most the
    /// combined queue size at entry.
    pub async fn next(&self) -> Option<LectureId> {
        loop {
            let sources = self.sources();
            let candidate = {
                let mut lock = MultiLock::acquire(&sources).await;
                let mut candidate = None;
                for index in 0..sources.len() {
                    if let Some(id) = lock.queue(index).dequeue() {
                        candidate = Some((index, id));
                        break;
                    }
                }
                candidate
            };
            let Some((source, id)) = candidate else {
                trace!("all source queues empty");
                return None;
            };
            trace!(%id, queue = sources[source].name(), "considering candidate");

            match self.store.original_exists(id).await {
                Ok(true) => {
                    debug!(%id, "transcript already stored, skipping");
                    continue;
                }
                Ok(false) => {}
                // Persistence is idempotent on the id, so pressing on after
                // a failed lookup at worst re-processes one lecture.
                Err(err) => {
                    warn!(%id, error = %err, "could not check for existing transcript, assuming none");
                }
            }

            let status = self.resolver.probe(id).await;
            if !status.is_available() {
                debug!(%id, ?status, "not available, skipping");
                continue;
            }

            self.in_flight.add(id).await;
            self.spawn_reaper(id);
            debug!(%id, queue = sources[source].name(), "selected for processing");
            return Some(id);
        }
    }

    /// Evict `id` from the in-flight guard after the configured timeout.
    ///
    /// The worker never removes guard entries itself: the guard only has to
    /// outlive the pipeline run, and a timed eviction also covers a worker
    /// that died mid-lecture. The timeout must exceed the longest expected
    /// pipeline duration.
    fn spawn_reaper(&self, id: LectureId) {
        let in_flight = Arc::clone(&self.in_flight);
        let shutdown = self.shutdown.clone();
        let timeout = self.eviction_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    in_flight.remove(id).await;
                    trace!(%id, "evicted from in-flight guard");
                }
            }
        });
    }

    /// Move `id` to the front of the line on an operator's request.
    pub async fn prioritize(&self, id: LectureId) -> PrioritizeOutcome {
        if !self.resolver.probe(id).await.is_available() {
            return PrioritizeOutcome::NotAvailable;
        }

        let queues = [
            &self.priority,
            &self.forward,
            &self.in_between,
            &self.backward,
            self.in_flight.as_ref(),
        ];
        let mut lock = MultiLock::acquire(&queues).await;
        if lock.queue(4).contains(id) {
            return PrioritizeOutcome::AlreadyInFlight;
        }
        if lock.queue(0).contains(id) {
            return PrioritizeOutcome::AlreadyPrioritized;
        }
        for source in 1..=3 {
            lock.queue(source).remove(id);
        }
        lock.queue(0).add(id);
        PrioritizeOutcome::Prioritized
    }

    /// Per-queue snapshot for the control plane. Each queue is copied under
    /// its own mutex; the five copies are not one consistent instant.
    pub async fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            priority: self.priority.snapshot().await,
            forward: self.forward.snapshot().await,
            in_between: self.in_between.snapshot().await,
            backward: self.backward.snapshot().await,
            in_flight: self.in_flight.snapshot().await,
        }
    }

    /// Seed the backward and in-between queues from the store: backward
    /// counts down from just below the smallest stored id, in-between holds
    /// the known gaps in descending order.
    pub async fn seed_from_store(&self) -> crate::Result<()> {
        if let Some(smallest) = self.store.smallest_stored().await? {
            let below = (1..smallest.get()).rev().filter_map(LectureId::new);
            self.backward.replace(below).await;
        }

        let mut missing = self.store.missing_inbetween_not_blacklisted().await?;
        missing.sort_unstable_by(|a, b| b.cmp(a));
        self.in_between.replace(missing).await;

        debug!(
            backward = self.backward.len().await,
            in_between = self.in_between.len().await,
            "queues seeded from store"
        );
        Ok(())
    }
}
