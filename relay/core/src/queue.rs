//! Priority Request Queue
//!
//! Higher caller priority pops first; equal priorities pop in arrival order.
//! The heap key is `(-priority, sequence)` where the sequence number is
//! assigned on every push, so a retried request re-enters behind requests
//! that arrived while it was backing off.
//!
//! Push never blocks. [`RequestQueue::pop`] waits for work on a [`Notify`]
//! with a poll interval as an upper bound on each wait.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::request::{RequestConfig, RequestId};

/// A queued attempt of a logical request
#[derive(Clone, Debug)]
pub struct QueueEntry {
    /// Negated caller priority
    pub priority: i64,
    /// Arrival order
    pub sequence: u64,
    /// Request identity, shared by all attempts
    pub request_id: RequestId,
    /// Immutable request configuration
    pub config: Arc<RequestConfig>,
    /// Retries already performed before this attempt
    pub retries: u32,
}

impl QueueEntry {
    fn key(&self) -> (i64, u64) {
        (self.priority, self.sequence)
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    // BinaryHeap is a max-heap; the smallest key must compare greatest
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

/// Priority queue shared between submitters and the scheduler
#[derive(Debug)]
pub struct RequestQueue {
    heap: Mutex<BinaryHeap<QueueEntry>>,
    sequence: AtomicU64,
    available: Notify,
    poll_interval: Duration,
}

impl RequestQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            sequence: AtomicU64::new(0),
            available: Notify::new(),
            poll_interval,
        }
    }

    /// Enqueue an attempt
    pub fn push(&self, request_id: RequestId, config: Arc<RequestConfig>, retries: u32) {
        let entry = QueueEntry {
            priority: -config.priority(),
            sequence: self.sequence.fetch_add(1, AtomicOrdering::SeqCst),
            request_id,
            config,
            retries,
        };
        self.heap.lock().push(entry);
        self.available.notify_one();
    }

    /// Pop the highest-priority entry without waiting
    pub fn try_pop(&self) -> Option<QueueEntry> {
        self.heap.lock().pop()
    }

    /// Pop the highest-priority entry, waiting for one to arrive
    pub async fn pop(&self) -> QueueEntry {
        loop {
            if let Some(entry) = self.try_pop() {
                return entry;
            }
            let _ = tokio::time::timeout(self.poll_interval, self.available.notified()).await;
        }
    }

    /// Drop a waiting entry; returns it if it was queued
    pub fn remove(&self, request_id: &RequestId) -> Option<QueueEntry> {
        let mut heap = self.heap.lock();
        let mut removed = None;
        heap.retain(|entry| {
            if removed.is_none() && &entry.request_id == request_id {
                removed = Some(entry.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Whether a request is waiting in the queue
    #[must_use]
    pub fn contains(&self, request_id: &RequestId) -> bool {
        self.heap.lock().iter().any(|e| &e.request_id == request_id)
    }

    /// Number of waiting entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }
}
