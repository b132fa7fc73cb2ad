//Command queue metrics

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

// Point-in-time metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub enqueued: u64,
    pub executed: u64,
    /// Guarded commands dropped because their epoch moved on
    pub skipped_stale: u64,
}

impl QueueMetrics {
    pub fn pending(&self) -> u64 {
        self.enqueued
            .saturating_sub(self.executed)
            .saturating_sub(self.skipped_stale)
    }
}

// Lock-free atomic counters
#[derive(Debug, Default)]
pub struct QueueCounters {
    enqueued: AtomicU64,
    executed: AtomicU64,
    skipped_stale: AtomicU64,
}

impl QueueCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_executed(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_skipped_stale(&self) {
        self.skipped_stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> QueueMetrics {
        QueueMetrics {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            skipped_stale: self.skipped_stale.load(Ordering::Relaxed),
        }
    }
}
