//! Cache metrics for monitoring.

use serde::Serialize;

/// Counters maintained by the cache facade.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheMetrics {
    /// Cache reads that rendered data
    pub hits: u64,
    /// Cache reads that came up empty
    pub misses: u64,
    /// Network responses normalized into the base layer
    pub network_writes: u64,
    /// Watcher callbacks invoked
    pub notifications: u64,
    /// Optimistic patches committed
    pub commits: u64,
    /// Optimistic patches rolled back
    pub rollbacks: u64,
    /// Entities evicted by the sweeper
    pub evictions: u64,
}

impl CacheMetrics {
    /// Get hit rate as a percentage (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Record a cache read outcome
    pub fn record_read(&mut self, hit: bool) {
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
    }

    /// Record a normalized network response
    pub fn record_network_write(&mut self) {
        self.network_writes += 1;
    }

    /// Record delivered notifications
    pub fn record_notifications(&mut self, count: usize) {
        self.notifications += count as u64;
    }

    /// Record a committed patch
    pub fn record_commit(&mut self) {
        self.commits += 1;
    }

    /// Record a rolled back patch
    pub fn record_rollback(&mut self) {
        self.rollbacks += 1;
    }

    /// Record evicted entities
    pub fn record_evictions(&mut self, count: usize) {
        self.evictions += count as u64;
    }
}
