// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Process-local cache counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Tier {
    L1,
    L2,
}

impl Tier {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::L1 => "l1",
            Self::L2 => "l2",
        }
    }
}

impl CacheCounters {
    pub(crate) fn hit(&self, tier: Tier) {
        match tier {
            Tier::L1 => self.l1_hits.fetch_add(1, Ordering::Relaxed),
            Tier::L2 => self.l2_hits.fetch_add(1, Ordering::Relaxed),
        };
        crate::metrics::record_cache_hit(tier.as_str());
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_cache_miss();
    }

    pub(crate) fn set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn delete(&self, count: u64) {
        self.deletes.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn reset(&self) {
        for counter in [&self.l1_hits, &self.l2_hits, &self.misses, &self.sets, &self.deletes] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self, l1_size: usize, compression_ratio: f64, write_back_pending: usize) -> CacheStats {
        let l1_hits = self.l1_hits.load(Ordering::Relaxed);
        let l2_hits = self.l2_hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let hits = l1_hits + l2_hits;
        let lookups = hits + misses;
        let rate = |n: u64| if lookups == 0 { 0.0 } else { n as f64 / lookups as f64 };

        CacheStats {
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            l1_hits,
            l2_hits,
            total_requests: lookups,
            hit_rate: rate(hits),
            l1_hit_rate: rate(l1_hits),
            l2_hit_rate: rate(l2_hits),
            l1_size,
            compression_ratio,
            write_back_pending,
        }
    }
}

/// Point-in-time view returned by `CacheManager::stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub total_requests: u64,
    /// Rates are fractions of all lookups (0.0 - 1.0)
    pub hit_rate: f64,
    pub l1_hit_rate: f64,
    pub l2_hit_rate: f64,
    pub l1_size: usize,
    pub compression_ratio: f64,
    pub write_back_pending: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates() {
        let counters = CacheCounters::default();
        counters.hit(Tier::L1);
        counters.hit(Tier::L1);
        counters.hit(Tier::L2);
        counters.miss();

        let stats = counters.snapshot(2, 1.0, 0);
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.total_requests, 4);
        assert!((stats.hit_rate - 0.75).abs() < 1e-9);
        assert!((stats.l1_hit_rate - 0.5).abs() < 1e-9);
        assert!((stats.l2_hit_rate - 0.25).abs() < 1e-9);
        assert_eq!(stats.l1_size, 2);
    }

    #[test]
    fn test_empty_and_reset() {
        let counters = CacheCounters::default();
        assert_eq!(counters.snapshot(0, 1.0, 0).hit_rate, 0.0);

        counters.set();
        counters.delete(3);
        counters.miss();
        counters.reset();
        let stats = counters.snapshot(0, 1.0, 0);
        assert_eq!((stats.sets, stats.deletes, stats.misses), (0, 0, 0));
    }
}
