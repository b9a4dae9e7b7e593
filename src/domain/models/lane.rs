//! Named lanes and session lanes (§3 "Named Lane", "Session Lane").
//!
//! These are pure bookkeeping structures: the scheduling service
//! (`services::priority_queue`) owns a `HashMap` of these and drives the
//! pump loop. Kept generic over the entry type `T` so the domain model
//! carries no dependency on the channel/future machinery the service layer
//! uses to settle callers.

use std::collections::VecDeque;

use super::task::Priority;

/// A named FIFO-per-priority lane with a concurrency cap.
///
/// Invariant: `active <= max_concurrent`.
/// Invariant: within a bucket, dequeue order equals enqueue order.
/// Invariant: a task is dequeued only if all higher-priority buckets are empty.
#[derive(Debug)]
pub struct NamedLane<T> {
    pub name: String,
    buckets: [VecDeque<T>; 3],
    pub max_concurrent: usize,
    pub active: usize,
}

impl<T> NamedLane<T> {
    #[must_use]
    pub fn new(name: impl Into<String>, max_concurrent: usize) -> Self {
        Self {
            name: name.into(),
            buckets: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
            max_concurrent: max_concurrent.max(1),
            active: 0,
        }
    }

    pub fn push(&mut self, priority: Priority, entry: T) {
        self.buckets[priority.bucket()].push_back(entry);
    }

    /// True while the lane has a free execution slot.
    #[must_use]
    pub fn can_accept(&self) -> bool {
        self.active < self.max_concurrent
    }

    /// Pop the next entry from the highest-priority non-empty bucket.
    pub fn pop_next(&mut self) -> Option<T> {
        Priority::ORDERED
            .into_iter()
            .find_map(|p| self.buckets[p.bucket()].pop_front())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(VecDeque::is_empty)
    }

    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.buckets.iter().map(VecDeque::len).sum()
    }

    #[must_use]
    pub fn queued_by_priority(&self, priority: Priority) -> usize {
        self.buckets[priority.bucket()].len()
    }
}

/// A per-session serialized queue (§3 "Session Lane").
///
/// Invariant: at most one task per session executes concurrently
/// (`active` acts as that mutex, enforced by the owning service).
/// Invariant: priority insertion places a new entry before the first
/// queued entry whose priority is strictly lower (numerically greater);
/// ties and higher priorities are skipped over, so equal-priority
/// arrivals remain in FIFO order relative to each other.
#[derive(Debug)]
pub struct SessionLane<T> {
    pub session_key: String,
    queue: VecDeque<(Priority, T)>,
    pub active: bool,
}

impl<T> SessionLane<T> {
    #[must_use]
    pub fn new(session_key: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            queue: VecDeque::new(),
            active: false,
        }
    }

    /// Insert `entry` before the first queued item whose priority is
    /// strictly lower (numerically greater), else append.
    pub fn insert(&mut self, priority: Priority, entry: T) {
        let position = self
            .queue
            .iter()
            .position(|(existing, _)| priority < *existing)
            .unwrap_or(self.queue.len());
        self.queue.insert(position, (priority, entry));
    }

    pub fn pop_front(&mut self) -> Option<T> {
        self.queue.pop_front().map(|(_, entry)| entry)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn queued_by_priority(&self, priority: Priority) -> usize {
        self.queue.iter().filter(|(p, _)| *p == priority).count()
    }
}
