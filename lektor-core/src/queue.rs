use lektor_model::LectureId;
use tokio::sync::{Mutex, MutexGuard};

/// Ordered, duplicate-free sequence of lecture ids.
///
/// These are the "unlocked" queue operations: a `QueueState` is only
/// reachable through its [`IdQueue`]'s mutex guard (directly or via
/// [`crate::MultiLock`]), so holding one proves the lock is held.
#[derive(Debug, Default)]
pub struct QueueState {
    entries: Vec<LectureId>,
}

impl QueueState {
    /// Append `id` unless it is already present.
    pub fn add(&mut self, id: LectureId) {
        if !self.entries.contains(&id) {
            self.entries.push(id);
        }
    }

    /// Remove `id` if present; removing an absent id is a no-op.
    pub fn remove(&mut self, id: LectureId) {
        self.entries.retain(|&entry| entry != id);
    }

    pub fn contains(&self, id: LectureId) -> bool {
        self.entries.contains(&id)
    }

    /// First element without removing it.
    pub fn peek(&self) -> Option<LectureId> {
        self.entries.first().copied()
    }

    /// Remove and return the first element.
    pub fn dequeue(&mut self) -> Option<LectureId> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    /// Replace the contents, keeping the iteration order and dropping
    /// duplicates.
    pub fn replace(&mut self, ids: impl IntoIterator<Item = LectureId>) {
        self.entries.clear();
        for id in ids {
            self.add(id);
        }
    }

    /// Reorder by descending numeric value.
    pub fn sort_reverse(&mut self) {
        self.entries.sort_unstable_by(|a, b| b.cmp(a));
    }

    pub fn to_vec(&self) -> Vec<LectureId> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A named queue: one [`QueueState`] behind its own mutex.
///
/// The convenience methods below take the mutex per call. Anything that
/// needs to look at more than one queue at a time must go through
/// [`crate::MultiLock`] instead of nesting these.
#[derive(Debug)]
pub struct IdQueue {
    name: &'static str,
    state: Mutex<QueueState>,
}

impl IdQueue {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().await
    }

    pub async fn add(&self, id: LectureId) {
        self.lock().await.add(id);
    }

    pub async fn remove(&self, id: LectureId) {
        self.lock().await.remove(id);
    }

    pub async fn contains(&self, id: LectureId) -> bool {
        self.lock().await.contains(id)
    }

    pub async fn peek(&self) -> Option<LectureId> {
        self.lock().await.peek()
    }

    pub async fn dequeue(&self) -> Option<LectureId> {
        self.lock().await.dequeue()
    }

    pub async fn replace(&self, ids: impl IntoIterator<Item = LectureId>) {
        self.lock().await.replace(ids);
    }

    pub async fn sort_reverse(&self) {
        self.lock().await.sort_reverse();
    }

    /// Ordered copy of the current contents.
    pub async fn snapshot(&self) -> Vec<LectureId> {
        self.lock().await.to_vec()
    }

    pub async fn len(&self) -> usize {
        self.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u32) -> LectureId {
        LectureId::new(raw).unwrap()
    }

    #[tokio::test]
    async fn add_enforces_uniqueness() {
        let queue = IdQueue::new("test");
        queue.add(id(7)).await;
        queue.add(id(7)).await;
        assert_eq!(queue.snapshot().await, vec![id(7)]);
    }

    #[tokio::test]
    async fn fifo_order_is_insertion_order() {
        let queue = IdQueue::new("test");
        queue.add(id(3)).await;
        queue.add(id(1)).await;
        queue.add(id(2)).await;
        assert_eq!(queue.peek().await, Some(id(3)));
        assert_eq!(queue.dequeue().await, Some(id(3)));
        assert_eq!(queue.dequeue().await, Some(id(1)));
        assert_eq!(queue.dequeue().await, Some(id(2)));
        assert_eq!(queue.dequeue().await, None);
    }

    #[tokio::test]
    async fn remove_is_a_noop_when_absent() {
        let queue = IdQueue::new("test");
        queue.add(id(5)).await;
        queue.remove(id(99)).await;
        queue.remove(id(5)).await;
        queue.remove(id(5)).await;
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn replace_keeps_order_and_drops_duplicates() {
        let queue = IdQueue::new("test");
        queue.add(id(1)).await;
        queue.replace([id(9), id(4), id(9), id(6)]).await;
        assert_eq!(queue.snapshot().await, vec![id(9), id(4), id(6)]);
    }

    #[tokio::test]
    async fn sort_reverse_orders_descending() {
        let queue = IdQueue::new("test");
        queue.replace([id(92), id(95), id(91)]).await;
        queue.sort_reverse().await;
        assert_eq!(queue.snapshot().await, vec![id(95), id(92), id(91)]);
    }
}
