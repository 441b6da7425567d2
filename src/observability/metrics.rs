//! Replication counters
//!
//! - Counters only, monotonic
//! - Reset only on process start
//! - Relaxed atomics; exactness across threads is not required

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters maintained by the replication layer
#[derive(Debug, Default)]
pub struct ReplicationMetrics {
    views_processed: AtomicU64,
    primary_views: AtomicU64,
    state_gaps: AtomicU64,
    toi_begins: AtomicU64,
    toi_begin_failures: AtomicU64,
    toi_ends: AtomicU64,
    bf_aborts: AtomicU64,
    causal_waits: AtomicU64,
    causal_wait_failures: AtomicU64,
    write_sets_applied: AtomicU64,
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub views_processed: u64,
    pub primary_views: u64,
    pub state_gaps: u64,
    pub toi_begins: u64,
    pub toi_begin_failures: u64,
    pub toi_ends: u64,
    pub bf_aborts: u64,
    pub causal_waits: u64,
    pub causal_wait_failures: u64,
    pub write_sets_applied: u64,
}

impl ReplicationMetrics {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_views(&self, primary: bool) {
        self.views_processed.fetch_add(1, Ordering::Relaxed);
        if primary {
            self.primary_views.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn increment_state_gaps(&self) {
        self.state_gaps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_toi_begins(&self) {
        self.toi_begins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_toi_begin_failures(&self) {
        self.toi_begin_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_toi_ends(&self) {
        self.toi_ends.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_bf_aborts(&self) {
        self.bf_aborts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_causal_waits(&self) {
        self.causal_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_causal_wait_failures(&self) {
        self.causal_wait_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_write_sets_applied(&self) {
        self.write_sets_applied.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            views_processed: self.views_processed.load(Ordering::Relaxed),
            primary_views: self.primary_views.load(Ordering::Relaxed),
            state_gaps: self.state_gaps.load(Ordering::Relaxed),
            toi_begins: self.toi_begins.load(Ordering::Relaxed),
            toi_begin_failures: self.toi_begin_failures.load(Ordering::Relaxed),
            toi_ends: self.toi_ends.load(Ordering::Relaxed),
            bf_aborts: self.bf_aborts.load(Ordering::Relaxed),
            causal_waits: self.causal_waits.load(Ordering::Relaxed),
            causal_wait_failures: self.causal_wait_failures.load(Ordering::Relaxed),
            write_sets_applied: self.write_sets_applied.load(Ordering::Relaxed),
        }
    }
}
