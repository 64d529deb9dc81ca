//! Hit/miss/eviction accounting for a single cache.

use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Point-in-time copy of a cache's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Reads answered from a fresh entry or by joining an in-flight load
    pub hits: u64,
    /// Reads that started a load
    pub misses: u64,
    /// Reads answered from an expired entry
    pub stale_hits: u64,
    /// Entries written directly or by a successful load
    pub puts: u64,
    /// Entries removed by `invalidate` or `clear`
    pub evictions: u64,
    /// Loads that ended in an error
    pub load_failures: u64,
}

impl MetricsSnapshot {
    /// Hit rate as a percentage (0-100), or 0 before any access.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 * 100.0 / total as f64
        }
    }

    /// Hit rate as a whole percentage, rounded down.
    pub fn hit_rate_percent(&self) -> u64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0
        } else {
            self.hits * 100 / total
        }
    }

    /// Total reads that were counted as a hit or a miss.
    pub fn accesses(&self) -> u64 {
        self.hits + self.misses
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={}, misses={}, stale={}, puts={}, evictions={}, hitRate={}%",
            self.hits,
            self.misses,
            self.stale_hits,
            self.puts,
            self.evictions,
            self.hit_rate_percent()
        )
    }
}

/// Thread-safe counters for one cache.
///
/// All counters live behind one lock so a snapshot is always a combination
/// that actually occurred; readers never see hits from one instant and
/// misses from another.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    counters: RwLock<MetricsSnapshot>,
}

impl CacheMetrics {
    /// Creates zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self) {
        self.counters.write().hits += 1;
    }

    pub(crate) fn record_miss(&self) {
        self.counters.write().misses += 1;
    }

    pub(crate) fn record_stale_hit(&self) {
        self.counters.write().stale_hits += 1;
    }

    pub(crate) fn record_puts(&self, count: u64) {
        self.counters.write().puts += count;
    }

    pub(crate) fn record_evictions(&self, count: u64) {
        self.counters.write().evictions += count;
    }

    pub(crate) fn record_load_failure(&self) {
        self.counters.write().load_failures += 1;
    }

    /// Returns a consistent copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        *self.counters.read()
    }

    /// Reads answered from a fresh entry or an in-flight load.
    pub fn hits(&self) -> u64 {
        self.counters.read().hits
    }

    /// Reads that started a load.
    pub fn misses(&self) -> u64 {
        self.counters.read().misses
    }

    /// Entries removed by invalidation or clearing.
    pub fn evictions(&self) -> u64 {
        self.counters.read().evictions
    }

    /// Hit rate as a percentage (0-100), or 0 before any access.
    pub fn hit_rate(&self) -> f64 {
        self.snapshot().hit_rate()
    }

    /// Zeroes every counter. Cached entries are untouched.
    pub fn reset(&self) {
        *self.counters.write() = MetricsSnapshot::default();
    }
}

impl fmt::Display for CacheMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.snapshot().fmt(f)
    }
}
