//! Cache statistics.
//!
//! Each shard owns a set of 64-bit atomic counters;
//! [`Cache::stats`](crate::Cache::stats) sums them on demand. Counters are
//! read independently, so the aggregate is eventually consistent rather
//! than a transactional snapshot.
//!
//! Reporting uses a `BTreeMap` so metric keys always come out in the same
//! order — essential when diffing runs or exporting to logs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-shard counters. All updates are `Relaxed`; these are monotone tallies,
/// not synchronization points.
#[derive(Debug, Default)]
pub(crate) struct ShardStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    rejected: AtomicU64,
    callback_panics: AtomicU64,
}

impl ShardStats {
    #[inline]
    pub(crate) fn record_hit(&self, enabled: bool) {
        if enabled {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_miss(&self, enabled: bool) {
        if enabled {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_eviction(&self, enabled: bool) {
        if enabled {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_expiration(&self, enabled: bool) {
        if enabled {
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_rejected(&self, enabled: bool) {
        if enabled {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Callback panics are always counted; they indicate a caller bug and
    /// must not disappear when stats are off.
    #[inline]
    pub(crate) fn record_callback_panic(&self) {
        self.callback_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_into(&self, stats: &mut Stats) {
        stats.hits += self.hits.load(Ordering::Relaxed);
        stats.misses += self.misses.load(Ordering::Relaxed);
        stats.evictions += self.evictions.load(Ordering::Relaxed);
        stats.expirations += self.expirations.load(Ordering::Relaxed);
        stats.rejected += self.rejected.load(Ordering::Relaxed);
        stats.callback_panics += self.callback_panics.load(Ordering::Relaxed);
    }
}

/// Aggregated cache statistics.
///
/// `evictions` counts policy evictions only; TTL removals land in
/// `expirations` and refused admissions in `rejected`. `hit_ratio` is
/// `hits / (hits + misses)` over the lifetime of the counters, `0.0` before
/// the first lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    /// Lookups that returned a live entry.
    pub hits: u64,
    /// Lookups that found nothing (including expired entries).
    pub misses: u64,
    /// Entries removed by the eviction policy.
    pub evictions: u64,
    /// Entries removed because their TTL elapsed.
    pub expirations: u64,
    /// Inserts silently refused by the admission policy.
    pub rejected: u64,
    /// Eviction callbacks that panicked and were isolated.
    pub callback_panics: u64,
    /// Current number of live-ish entries (may transiently include entries
    /// whose TTL elapsed but which cleanup has not yet observed).
    pub size: u64,
    /// Configured total capacity; `0` means unlimited.
    pub capacity: u64,
    /// `hits / (hits + misses)`, `0.0` when no lookups happened.
    pub hit_ratio: f64,
    /// Number of shards.
    pub shards: usize,
}

impl Stats {
    /// Recomputes `hit_ratio` after the counters are summed.
    pub(crate) fn finalize(mut self) -> Self {
        let total = self.hits + self.misses;
        self.hit_ratio = if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        };
        self
    }

    /// Returns all metrics as key-value pairs in deterministic order.
    pub fn as_map(&self) -> BTreeMap<String, f64> {
        let mut map = BTreeMap::new();
        map.insert("callback_panics".to_string(), self.callback_panics as f64);
        map.insert("capacity".to_string(), self.capacity as f64);
        map.insert("evictions".to_string(), self.evictions as f64);
        map.insert("expirations".to_string(), self.expirations as f64);
        map.insert("hit_ratio".to_string(), self.hit_ratio);
        map.insert("hits".to_string(), self.hits as f64);
        map.insert("misses".to_string(), self.misses as f64);
        map.insert("rejected".to_string(), self.rejected as f64);
        map.insert("shards".to_string(), self.shards as f64);
        map.insert("size".to_string(), self.size as f64);
        map
    }
}
