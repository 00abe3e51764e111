use tokio::sync::MutexGuard;

use crate::queue::{IdQueue, QueueState};

/// Scoped acquisition of several queue mutexes.
///
/// The requested queues are locked in ascending order of their memory
/// address — the one global order every multi-queue block in the process
/// shares — and released in the reverse order on drop. This is the only
/// sanctioned way to hold more than one queue mutex at a time; nesting
/// individual [`IdQueue`] locks can deadlock against it.
#[derive(Debug)]
pub struct MultiLock<'a> {
    // Guards tagged with the caller's index into the `acquire` slice.
    guards: Vec<(usize, MutexGuard<'a, QueueState>)>,
}

impl<'a> MultiLock<'a> {
    /// Lock all `queues`. The slice must not contain the same queue twice.
    pub async fn acquire(queues: &[&'a IdQueue]) -> MultiLock<'a> {
        let mut order: Vec<usize> = (0..queues.len()).collect();
        order.sort_unstable_by_key(|&i| std::ptr::from_ref(queues[i]) as usize);
        debug_assert!(
            order
                .windows(2)
                .all(|pair| !std::ptr::eq(queues[pair[0]], queues[pair[1]])),
            "queue locked twice in one MultiLock"
        );

        let mut guards = Vec::with_capacity(queues.len());
        for index in order {
            guards.push((index, queues[index].lock().await));
        }
        MultiLock { guards }
    }

    /// State of the queue at `index` in the slice passed to [`acquire`].
    ///
    /// [`acquire`]: MultiLock::acquire
    pub fn queue(&mut self, index: usize) -> &mut QueueState {
        self.guards
            .iter_mut()
            .find(|(i, _)| *i == index)
            .map(|(_, guard)| &mut **guard)
            .expect("queue index out of range for MultiLock")
    }
}

impl Drop for MultiLock<'_> {
    fn drop(&mut self) {
        // Release in reverse acquisition order.
        while self.guards.pop().is_some() {}
    }
}
