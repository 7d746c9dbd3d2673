//! # Pool Metrics
//!
//! Lightweight counters describing how the connection pool is used.
//!
//! ## Design Principles
//! 1. **Accumulator Pattern**: Use atomic counters to aggregate events cheaply.
//! 2. **Zero-Cost Access**: Expose snapshots as plain structs without heap work.
//!
//! `Ordering::Relaxed` is sufficient because no cross-field ordering is
//! required, only eventual consistency.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of pool counters at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    /// Physical connect attempts (pooled and unpooled).
    pub connects_attempted: u64,
    /// Connect attempts that failed.
    pub connects_failed: u64,
    /// `get_or_create` calls answered from the registry.
    pub cache_hits: u64,
    /// Handles closed by the pool or by unpooled guards.
    pub closes: u64,
    /// Close attempts that returned an error.
    pub close_failures: u64,
}

/// Thread-safe counters owned by a `ConnectionPool`.
#[derive(Debug, Default)]
pub struct PoolStats {
    connects_attempted: AtomicU64,
    connects_failed: AtomicU64,
    cache_hits: AtomicU64,
    closes: AtomicU64,
    close_failures: AtomicU64,
}

impl PoolStats {
    pub fn new() -> Self {
        PoolStats::default()
    }

    pub fn record_connect(&self, ok: bool) {
        self.connects_attempted.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.connects_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_close(&self, ok: bool) {
        self.closes.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.close_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            connects_attempted: self.connects_attempted.load(Ordering::Relaxed),
            connects_failed: self.connects_failed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            closes: self.closes.load(Ordering::Relaxed),
            close_failures: self.close_failures.load(Ordering::Relaxed),
        }
    }
}
