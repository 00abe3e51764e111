//! Discovery-and-dispatch core of the lektor transcription service.
//!
//! The heart of this crate is the scheduler: four prioritized id queues
//! (priority > forward > in-between > backward) plus an in-flight guard,
//! fed by two periodic refreshers and drained by a single worker that
//! drives the resolve → transcode → recognize → persist pipeline. All
//! multi-queue mutation goes through [`MultiLock`], which acquires queue
//! mutexes in one global order.

pub mod error;
pub mod multi_lock;
pub mod pipeline;
pub mod queue;
pub mod recognize;
pub mod refresh;
pub mod repository;
pub mod resolver;
pub mod scheduler;
pub mod transcode;
pub mod worker;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{CoreError, Result};
pub use multi_lock::MultiLock;
pub use pipeline::{LecturePipeline, TranscriptionPipeline};
pub use queue::{IdQueue, QueueState};
pub use recognize::{SpeechRecognizer, WhisperxRecognizer};
pub use refresh::{GapRefresher, UpperRefresher};
pub use repository::{LectureStore, PostgresStore};
pub use resolver::{LectureResolver, ResolvedLecture, TeletaskResolver};
pub use scheduler::{PrioritizeOutcome, Scheduler};
pub use transcode::{AudioExtractor, FfmpegExtractor};
pub use worker::Worker;
