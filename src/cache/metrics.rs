//! Cache Metrics
//!
//! Lock-free counters shared by the tiers of one cache instance, and the
//! snapshot type reported to callers.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Cache Metrics
// =============================================================================

/// Counters for one tiered cache instance
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// Lookups served by any tier
    pub hits: AtomicU64,
    /// Lookups absent from every tier
    pub misses: AtomicU64,
    /// Lookups served by L1
    pub l1_hits: AtomicU64,
    /// Lookups served by L2 (and backfilled into L1)
    pub l2_hits: AtomicU64,
    /// L2 failures swallowed at the cache boundary
    pub l2_errors: AtomicU64,
    /// Entries evicted for capacity
    pub evictions: AtomicU64,
    /// Entries dropped because their TTL elapsed
    pub expirations: AtomicU64,
    /// Writes accepted
    pub sets: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_l1_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.l1_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_l1_hits(&self, count: u64) {
        self.hits.fetch_add(count, Ordering::Relaxed);
        self.l1_hits.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_l2_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.l2_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_misses(&self, count: u64) {
        self.misses.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_l2_error(&self) {
        self.l2_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sets(&self, count: u64) {
        self.sets.fetch_add(count, Ordering::Relaxed);
    }

    /// Zero every counter
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.l1_hits,
            &self.l2_hits,
            &self.l2_errors,
            &self.evictions,
            &self.expirations,
            &self.sets,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Build a snapshot; storage figures come from the L1 store
    pub fn snapshot(&self, entry_count: u64, estimated_bytes: u64) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);

        CacheStats {
            hits,
            misses,
            hit_rate: hit_rate(hits, misses),
            entry_count,
            estimated_bytes,
            l1_hits: self.l1_hits.load(Ordering::Relaxed),
            l2_hits: self.l2_hits.load(Ordering::Relaxed),
            l2_errors: self.l2_errors.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
        }
    }
}

/// `hits / (hits + misses)`, or 0 when both are zero
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

// =============================================================================
// Cache Stats Snapshot
// =============================================================================

/// Point-in-time cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub entry_count: u64,
    pub estimated_bytes: u64,
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub l2_errors: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub sets: u64,
}

impl CacheStats {
    /// Total lookups
    pub fn total_requests(&self) -> u64 {
        self.hits + self.misses
    }
}
