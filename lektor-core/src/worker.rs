use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::pipeline::TranscriptionPipeline;
use crate::scheduler::Scheduler;

/// The single long-running consumer of the scheduler.
///
/// One instance per process: transcription saturates the host's GPU/CPU, so
/// running lectures concurrently would only make both slower. The pipeline
/// keeps its heavy lifting in subprocesses and blocking threads, so this
/// loop never stalls the runtime.
pub struct Worker {
    scheduler: Arc<Scheduler>,
    pipeline: Arc<dyn TranscriptionPipeline>,
    idle: Duration,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker").field("idle", &self.idle).finish()
    }
}

impl Worker {
    pub fn new(
        scheduler: Arc<Scheduler>,
        pipeline: Arc<dyn TranscriptionPipeline>,
        idle: Duration,
    ) -> Self {
        Self {
            scheduler,
            pipeline,
            idle,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!("worker started");
        loop {
            let selected = tokio::select! {
                _ = shutdown.cancelled() => break,
                selected = self.scheduler.next() => selected,
            };

            let Some(id) = selected else {
                // Nothing to do; check again after the idle interval.
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.idle) => {}
                }
                continue;
            };

            info!(%id, "processing lecture");
            tokio::select! {
                _ = shutdown.cancelled() => {
                    warn!(%id, "shutdown requested during processing");
                    break;
                }
                result = self.pipeline.process(id) => match result {
                    Ok(()) => info!(%id, "lecture processed"),
                    // The id is dropped; a refresher re-queues it unless the
                    // pipeline blacklisted it.
                    Err(err) => error!(%id, error = %err, "pipeline failed"),
                }
            }
        }
        info!("worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;
    use crate::testing::{MemoryStore, RecordingPipeline, StaticResolver};
    use lektor_model::{LectureId, ProbeStatus};

    fn id(raw: u32) -> LectureId {
        LectureId::new(raw).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn drains_queues_and_survives_pipeline_failures() {
        let resolver = Arc::new(StaticResolver::with_default(ProbeStatus::Available));
        let scheduler = Arc::new(Scheduler::new(
            resolver,
            Arc::new(MemoryStore::default()),
            Duration::from_secs(1200),
            CancellationToken::new(),
        ));
        scheduler.forward().replace([id(101), id(102), id(103)]).await;

        let pipeline = Arc::new(RecordingPipeline::default());
        pipeline.fail_on(id(102)).await;

        let shutdown = CancellationToken::new();
        let worker = Worker::new(
            Arc::clone(&scheduler),
            Arc::clone(&pipeline) as Arc<dyn TranscriptionPipeline>,
            Duration::from_secs(40),
        );
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        while pipeline.processed().await.len() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(
            pipeline.processed().await,
            vec![id(101), id(102), id(103)]
        );
        assert!(scheduler.forward().is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn idles_when_queues_are_empty() {
        let resolver = Arc::new(StaticResolver::with_default(ProbeStatus::Available));
        let scheduler = Arc::new(Scheduler::new(
            resolver,
            Arc::new(MemoryStore::default()),
            Duration::from_secs(1200),
            CancellationToken::new(),
        ));
        let pipeline = Arc::new(RecordingPipeline::default());

        let shutdown = CancellationToken::new();
        let worker = Worker::new(
            Arc::clone(&scheduler),
            Arc::clone(&pipeline) as Arc<dyn TranscriptionPipeline>,
            Duration::from_secs(40),
        );
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        // Let the worker hit the empty queues and go to sleep, then feed it.
        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.forward().add(id(7)).await;
        assert!(pipeline.processed().await.is_empty());

        tokio::time::sleep(Duration::from_secs(41)).await;
        assert_eq!(pipeline.processed().await, vec![id(7)]);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
