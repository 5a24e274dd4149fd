//! FIFO of records awaiting dispatch.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

/// A queue whose drain step is atomic with respect to pushes.
///
/// The item lock is only held for in-memory operations, never across an
/// `.await`, so enqueueing is never blocked by an in-flight dispatch. The
/// separate flush lock is held for a whole take, dispatch, requeue cycle so
/// at most one batch per queue is in flight.
#[derive(Debug)]
pub struct BatchQueue<T> {
    items: Mutex<VecDeque<T>>,
    flushing: AsyncMutex<()>,
}

impl<T> BatchQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            flushing: AsyncMutex::new(()),
        }
    }

    /// Wait for any in-flight flush of this queue, then claim the queue.
    pub async fn flush_lock(&self) -> AsyncMutexGuard<'_, ()> {
        self.flushing.lock().await
    }

    /// Claim the queue for flushing unless a flush is already in flight.
    pub fn try_flush_lock(&self) -> Option<AsyncMutexGuard<'_, ()>> {
        self.flushing.try_lock().ok()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append and return the new length.
    pub fn push(&self, item: T) -> usize {
        let mut items = self.lock();
        items.push_back(item);
        items.len()
    }

    /// Remove up to `max` items from the front.
    pub fn take_batch(&self, max: usize) -> Vec<T> {
        let mut items = self.lock();
        let n = max.min(items.len());
        items.drain(..n).collect()
    }

    /// Put a batch back at the front, keeping its relative order.
    pub fn requeue_front(&self, batch: Vec<T>) {
        let mut items = self.lock();
        for item in batch.into_iter().rev() {
            items.push_front(item);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<T: Clone> BatchQueue<T> {
    pub fn snapshot(&self) -> Vec<T> {
        self.lock().iter().cloned().collect()
    }
}

impl<T> Default for BatchQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
