//! Lock-free work queue for distributing intervals across parallel workers

use std::sync::atomic::{AtomicUsize, Ordering};

/// Lock-free work queue distributing items to workers.
///
/// Workers call [`next()`](WorkQueue::next) to atomically claim the next item;
/// already-present intervals are dropped before the queue is built.
pub struct WorkQueue<S> {
    items: Vec<S>,
    cursor: AtomicUsize,
}

impl<S> WorkQueue<S> {
    /// Create queue from all items (no filtering)
    pub fn new(items: Vec<S>) -> Self {
        Self {
            items,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Get next item to process (lock-free)
    pub fn next(&self) -> Option<&S> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.items.get(i)
    }

    /// Total items in queue
    pub fn total(&self) -> usize {
        self.items.len()
    }

    /// Items handed out so far
    pub fn claimed(&self) -> usize {
        self.cursor.load(Ordering::Relaxed).min(self.items.len())
    }
}
