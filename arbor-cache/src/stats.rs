//! Cache activity counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for tenant hierarchy cache activity.
///
/// Updated with relaxed ordering; read them through [`HierarchyStats::snapshot`].
#[derive(Debug, Default)]
pub struct HierarchyStats {
    /// Queries answered from the cache without locking
    pub hits: AtomicU64,

    /// Queries that fell through to the partition lock
    pub misses: AtomicU64,

    /// Loader calls issued while holding the partition lock
    pub remote_loads: AtomicU64,

    /// Loader calls that returned an error
    pub load_failures: AtomicU64,
}

impl HierarchyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_load(&self, succeeded: bool) {
        self.remote_loads.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.load_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get current snapshot of all counters.
    pub fn snapshot(&self) -> HierarchyStatsSnapshot {
        HierarchyStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            remote_loads: self.remote_loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of cache counters at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HierarchyStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub remote_loads: u64,
    pub load_failures: u64,
}

impl HierarchyStatsSnapshot {
    /// Fraction of queries served from the cache, `0.0` before any query.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
