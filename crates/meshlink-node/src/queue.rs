//! Bounded MPMC FIFO queues.
//!
//! These queues are the only synchronized hand-off points between the
//! engine's concurrency domain and the caller's threads. Capacity is fixed at
//! construction. All consumer operations are non-blocking: an empty queue is
//! a normal outcome, not an error. Every pop happens under a single lock
//! acquisition, so concurrent consumers never observe duplicate delivery.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// Result of a copy-out dequeue attempt against a caller-supplied buffer.
///
/// `NeedsCapacity` is a control-flow signal, not a failure: the item stays at
/// the head of the queue and the caller retries with at least the reported
/// capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DequeueOutcome {
    /// Nothing queued.
    Empty,
    /// Item copied out and removed from the queue; payload length in bytes.
    Copied(usize),
    /// Buffer too small; required capacity reported, queue untouched.
    NeedsCapacity(usize),
}

/// A bounded FIFO safe for concurrent producers and consumers.
pub struct BoundedQueue<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Create a queue with a fixed capacity (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
        }
    }

    /// Configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the queue is currently empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Append an item, failing (and returning the item) when at capacity.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let mut q = self.inner.lock();
        if q.len() >= self.capacity {
            return Err(item);
        }
        q.push_back(item);
        Ok(())
    }

    /// Append an item, evicting the oldest entry when at capacity.
    ///
    /// Returns the evicted item, if any. This is the overflow policy for
    /// advisory data (discovery events) where the producer must never stall.
    pub fn push_evicting(&self, item: T) -> Option<T> {
        let mut q = self.inner.lock();
        let evicted = if q.len() >= self.capacity {
            q.pop_front()
        } else {
            None
        };
        q.push_back(item);
        evicted
    }

    /// Pop the oldest item, if any. Never blocks.
    pub fn pop(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }

    /// Inspect the head under the lock and pop it only when `accept` returns
    /// `Ok`.
    ///
    /// On `Err` the head stays queued, so a caller can retry after resizing
    /// its buffers without losing the item. Returns `None` when empty.
    pub fn pop_when<R, E>(&self, accept: impl FnOnce(&T) -> Result<R, E>) -> Option<Result<R, E>> {
        let mut q = self.inner.lock();
        let head = q.front()?;
        match accept(head) {
            Ok(out) => {
                q.pop_front();
                Some(Ok(out))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

impl BoundedQueue<Vec<u8>> {
    /// Copy the oldest payload into `buf`, removing it only on a fully
    /// successful transfer.
    pub fn dequeue_into(&self, buf: &mut [u8]) -> DequeueOutcome {
        let result = self.pop_when(|payload| {
            let len = payload.len();
            if len > buf.len() {
                return Err(len);
            }
            buf[..len].copy_from_slice(payload);
            Ok(len)
        });
        match result {
            None => DequeueOutcome::Empty,
            Some(Ok(len)) => DequeueOutcome::Copied(len),
            Some(Err(required)) => DequeueOutcome::NeedsCapacity(required),
        }
    }
}
