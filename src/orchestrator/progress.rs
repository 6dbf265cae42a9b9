//! Shared counters tracking session progress across batches.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Snapshot of progress counters at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub launched: usize,
    pub settled: usize,
    pub in_flight: usize,
    /// Highest number of sessions in flight at once.
    pub peak_in_flight: usize,
}

/// Atomic counters cloned into every session task.
#[derive(Debug, Clone, Default)]
pub struct ProgressCounters {
    launched: Arc<AtomicUsize>,
    settled: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a session as started.
    pub fn launch(&self) {
        self.launched.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    /// Marks a session as settled; returns the settled count.
    pub fn settle(&self) -> usize {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.settled.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            launched: self.launched.load(Ordering::SeqCst),
            settled: self.settled.load(Ordering::SeqCst),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }
}
