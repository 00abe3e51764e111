use serde::{Deserialize, Serialize};

use crate::LectureId;

/// Point-in-time view of the scheduler's five queues.
///
/// Each queue is snapshotted under its own mutex; the snapshot is not
/// atomic across queues.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub priority: Vec<LectureId>,
    pub forward: Vec<LectureId>,
    pub in_between: Vec<LectureId>,
    pub backward: Vec<LectureId>,
    pub in_flight: Vec<LectureId>,
}
