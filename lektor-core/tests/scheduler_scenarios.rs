//! End-to-end scheduler scenarios: seeding, prioritization, concurrent
//! selection, refresher dedup, and in-flight eviction, all against the
//! in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lektor_core::testing::{MemoryStore, StaticResolver};
use lektor_core::{
    LectureResolver, LectureStore, PrioritizeOutcome, Scheduler, TranscriptionPipeline,
    UpperRefresher, Worker,
};
use lektor_model::{LectureId, ProbeStatus};
use tokio_util::sync::CancellationToken;

fn id(raw: u32) -> LectureId {
    LectureId::new(raw).unwrap()
}

struct Fixture {
    resolver: Arc<StaticResolver>,
    scheduler: Arc<Scheduler>,
    upper: UpperRefresher,
}

/// Store with lectures 90..=100 transcribed except 92 and 95; portal serves
/// 101 and 102, nothing above.
async fn seeded_fixture() -> Fixture {
    let resolver = Arc::new(StaticResolver::with_default(ProbeStatus::NotFound));
    for raw in [92, 95, 101, 102] {
        resolver.set(id(raw), ProbeStatus::Available).await;
    }

    let store = Arc::new(MemoryStore::default());
    for raw in 90..=100 {
        if raw != 92 && raw != 95 {
            store.insert_stored(id(raw)).await;
        }
    }

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&resolver) as Arc<dyn LectureResolver>,
        Arc::clone(&store) as Arc<dyn LectureStore>,
        Duration::from_secs(1200),
        CancellationToken::new(),
    ));
    let upper = UpperRefresher::new(
        Arc::clone(&scheduler),
        Arc::clone(&resolver) as Arc<dyn LectureResolver>,
        Arc::clone(&store) as Arc<dyn LectureStore>,
        Duration::from_secs(1200),
        10,
    );

    // Startup order: detect new ids once, then seed the lower queues.
    upper.refresh_once().await.unwrap();
    scheduler.seed_from_store().await.unwrap();

    Fixture {
        resolver,
        scheduler,
        upper,
    }
}

#[tokio::test]
async fn startup_seeding_fills_all_queues() {
    let fixture = seeded_fixture().await;
    let snapshot = fixture.scheduler.snapshot().await;

    assert_eq!(snapshot.forward, vec![id(101), id(102)]);
    assert_eq!(snapshot.in_between, vec![id(95), id(92)]);
    assert_eq!(snapshot.backward.first(), Some(&id(89)));
    assert_eq!(snapshot.backward.last(), Some(&id(1)));
    assert_eq!(snapshot.backward.len(), 89);
    assert!(snapshot.priority.is_empty());
    assert!(snapshot.in_flight.is_empty());

    assert_eq!(fixture.scheduler.next().await, Some(id(101)));
    assert_eq!(
        fixture.scheduler.snapshot().await.in_flight,
        vec![id(101)]
    );
}

#[tokio::test]
async fn prioritized_gap_id_is_served_first() {
    let fixture = seeded_fixture().await;

    assert_eq!(
        fixture.scheduler.prioritize(id(95)).await,
        PrioritizeOutcome::Prioritized
    );
    let snapshot = fixture.scheduler.snapshot().await;
    assert_eq!(snapshot.priority, vec![id(95)]);
    assert_eq!(snapshot.in_between, vec![id(92)]);

    assert_eq!(fixture.scheduler.next().await, Some(id(95)));
}

#[tokio::test]
async fn forbidden_id_cannot_be_prioritized() {
    let fixture = seeded_fixture().await;
    fixture.resolver.set(id(95), ProbeStatus::Forbidden).await;

    assert_eq!(
        fixture.scheduler.prioritize(id(95)).await,
        PrioritizeOutcome::NotAvailable
    );
    assert!(fixture.scheduler.snapshot().await.priority.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_selection_hands_out_distinct_ids() {
    let resolver = Arc::new(StaticResolver::with_default(ProbeStatus::Available));
    let store = Arc::new(MemoryStore::default());
    let scheduler = Arc::new(Scheduler::new(
        resolver,
        store,
        Duration::from_secs(1200),
        CancellationToken::new(),
    ));
    scheduler.forward().replace([id(101), id(102)]).await;

    let first = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.next().await })
    };
    let second = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.next().await })
    };

    let mut picked = vec![
        first.await.unwrap().unwrap(),
        second.await.unwrap().unwrap(),
    ];
    picked.sort_unstable();
    assert_eq!(picked, vec![id(101), id(102)]);

    let snapshot = scheduler.snapshot().await;
    assert!(snapshot.forward.is_empty());
    let mut in_flight = snapshot.in_flight;
    in_flight.sort_unstable();
    assert_eq!(in_flight, vec![id(101), id(102)]);
}

#[tokio::test]
async fn upper_refresh_cycles_do_not_duplicate() {
    let fixture = seeded_fixture().await;
    // Portal state changes: 102 turns forbidden, 103 appears.
    fixture.resolver.set(id(102), ProbeStatus::Forbidden).await;
    fixture.resolver.set(id(103), ProbeStatus::Available).await;

    fixture.upper.refresh_once().await.unwrap();
    assert_eq!(
        fixture.scheduler.snapshot().await.forward,
        vec![id(101), id(102), id(103)]
    );

    // Unchanged portal state on the following cycle adds nothing.
    fixture.upper.refresh_once().await.unwrap();
    assert_eq!(
        fixture.scheduler.snapshot().await.forward,
        vec![id(101), id(102), id(103)]
    );
}

/// Pipeline whose processing never finishes, standing in for a worker that
/// dies mid-lecture.
struct HangingPipeline;

#[async_trait]
impl TranscriptionPipeline for HangingPipeline {
    async fn process(&self, _id: LectureId) -> lektor_core::Result<()> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn guard_entry_outlives_a_cancelled_worker() {
    let resolver = Arc::new(StaticResolver::with_default(ProbeStatus::Available));
    let scheduler = Arc::new(Scheduler::new(
        resolver,
        Arc::new(MemoryStore::default()),
        Duration::from_secs(1200),
        CancellationToken::new(),
    ));
    scheduler.forward().add(id(500)).await;

    let worker_shutdown = CancellationToken::new();
    let worker = Worker::new(
        Arc::clone(&scheduler),
        Arc::new(HangingPipeline),
        Duration::from_secs(40),
    );
    let handle = tokio::spawn(worker.run(worker_shutdown.clone()));

    while !scheduler.snapshot().await.in_flight.contains(&id(500)) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // The worker dies ten seconds in; the reaper still evicts on schedule.
    tokio::time::sleep(Duration::from_secs(10)).await;
    worker_shutdown.cancel();
    handle.await.unwrap();
    assert!(scheduler.snapshot().await.in_flight.contains(&id(500)));

    tokio::time::sleep(Duration::from_secs(1200)).await;
    assert!(!scheduler.snapshot().await.in_flight.contains(&id(500)));
}
