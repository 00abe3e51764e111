//! Core data model definitions shared across lektor crates.

pub mod ids;
pub mod lecture;
pub mod snapshot;

pub use ids::{LectureId, ParseLectureIdError, ProbeStatus};
pub use lecture::{LectureMetadata, Transcript, semester_for};
pub use snapshot::QueueSnapshot;
