//! Dispatch Metrics
//!
//! Lock-free counters read by [`queue_status`](crate::RequestDispatcher::queue_status).
//! The in-flight gauge doubles as the concurrency counter the scheduler
//! checks before every dequeue.

use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Counter
// ============================================================================

/// A monotonic atomic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Create a counter at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Current value
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Gauge
// ============================================================================

/// A value that goes up and down
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    /// Create a gauge at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::SeqCst);
    }

    /// Subtract one, saturating at zero
    pub fn dec(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));
    }

    /// Current value
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Dispatcher totals
// ============================================================================

/// Cumulative dispatcher counters
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Logical requests accepted (queued submissions plus blocking calls)
    pub total_requests: Counter,
    /// Requests that completed successfully
    pub successful: Counter,
    /// Requests that failed terminally
    pub failed: Counter,
    /// Retries scheduled
    pub retries: Counter,
    /// Unhealthy-model switches
    pub model_switches: Counter,
    /// Attempts currently executing against the backend
    pub in_flight: Gauge,
}

impl DispatchMetrics {
    /// Create zeroed metrics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
