//! Eviction policies.
//!
//! The policy set is closed — four variants over one intrusive list — so it
//! is modeled as a tagged enum rather than trait objects: the shard matches
//! on the variant and the hot paths inline.
//!
//! | Policy | On hit | Victim |
//! |--------|--------|--------|
//! | `Lru` | move to front | list tail |
//! | `Fifo` | nothing | list tail |
//! | `Lfu` | bump entry counter | lowest counter among tail samples |
//! | `AdmissionLfu` | move to front | lowest `freq + 0.25 * rank` among tail samples |
//!
//! `AdmissionLfu` additionally gates inserts into a full shard: a candidate
//! must beat the sampled victim's sketch frequency by an adaptive margin,
//! and must have been seen before (doorkeeper) or be established in the
//! sketch. While the scan detector trips, the margin jumps high enough that
//! nearly all new entries are refused, protecting the resident working set
//! from sequential floods.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::doorkeeper::Doorkeeper;
use crate::scan::ScanDetector;
use crate::sketch::FrequencySketch;

/// Victim candidates sampled from the tail region.
pub(crate) const VICTIM_SAMPLE: usize = 5;

/// Weight of the sketch frequency in the victim score.
const FREQ_WEIGHT: f64 = 1.0;

/// Weight of the recency rank (0 = tail) in the victim score.
const RECENCY_WEIGHT: f64 = 0.25;

/// Admission margin while a scan is in progress.
const SCAN_MARGIN: u32 = 4;

/// Upper bound of the adaptive admission threshold.
const THRESHOLD_CAP: u32 = 3;

/// Admission attempts between threshold adjustments.
const THRESHOLD_PERIOD: u64 = 4096;

/// The eviction policy of a [`Cache`](crate::Cache).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Least Recently Used: evicts the entry untouched the longest.
    #[default]
    Lru,
    /// Least Frequently Used: evicts the entry with the lowest access
    /// count among a tail sample.
    Lfu,
    /// First In First Out: evicts the oldest insertion; hits do not reorder.
    Fifo,
    /// Frequency-based admission control (TinyLFU family): doorkeeper,
    /// Count-Min sketch, scan detection, and an adaptive admission
    /// threshold on top of sampled LFU eviction.
    AdmissionLfu,
}

/// Outcome of an admission decision for an insert into a full shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Evict the selected victim and insert the candidate.
    Admit,
    /// Drop the candidate; the resident set stays untouched.
    Reject,
}

/// Per-shard policy state. The probabilistic structures live outside the
/// shard lock; their cells are atomic so the lookup path updates them under
/// the shared lock.
pub(crate) enum PolicyState {
    Lru,
    Lfu,
    Fifo,
    AdmissionLfu(AdmissionState),
}

impl PolicyState {
    pub(crate) fn new(policy: EvictionPolicy, shard_capacity: usize) -> Self {
        match policy {
            EvictionPolicy::Lru => PolicyState::Lru,
            EvictionPolicy::Lfu => PolicyState::Lfu,
            EvictionPolicy::Fifo => PolicyState::Fifo,
            EvictionPolicy::AdmissionLfu => {
                PolicyState::AdmissionLfu(AdmissionState::new(shard_capacity))
            }
        }
    }

    /// Whether a hit splices the recency list (and therefore needs the
    /// exclusive lock). FIFO leaves the list insertion-ordered and LFU only
    /// bumps atomic counters, so both serve hits under the shared lock.
    #[inline]
    pub(crate) fn hit_needs_exclusive(&self) -> bool {
        matches!(self, PolicyState::Lru | PolicyState::AdmissionLfu(_))
    }

    /// Whether an overwrite re-links the entry to the front. LFU keeps the
    /// list insertion-ordered; it only uses it for tie-breaking.
    #[inline]
    pub(crate) fn relink_on_update(&self) -> bool {
        !matches!(self, PolicyState::Lfu)
    }

    /// Records a lookup outcome. Only `AdmissionLfu` keeps stream state;
    /// the other policies track everything on the entry itself.
    #[inline]
    pub(crate) fn record_lookup(&self, hash: u64, hit: bool) {
        if let PolicyState::AdmissionLfu(adm) = self {
            adm.record_lookup(hash, hit);
        }
    }

    pub(crate) fn admission(&self) -> Option<&AdmissionState> {
        match self {
            PolicyState::AdmissionLfu(adm) => Some(adm),
            _ => None,
        }
    }

    /// Resets all stream state; called by `clear()`.
    pub(crate) fn reset(&self) {
        if let PolicyState::AdmissionLfu(adm) = self {
            adm.reset();
        }
    }
}

/// Scores a victim candidate: lower is more evictable. `rank` counts from
/// the tail (0 = least recent), so recency softly protects entries that
/// were touched more recently than the tail.
#[inline]
pub(crate) fn victim_score(freq: u32, rank: usize) -> f64 {
    FREQ_WEIGHT * freq as f64 + RECENCY_WEIGHT * rank as f64
}

/// Frequency, doorkeeper, scan, and threshold state for `AdmissionLfu`.
///
/// An entry's life against this state: unseen, then seen once (doorkeeper
/// bits set), then a real candidate (second sighting reaches the sketch),
/// then resident if it wins an admission gate.
pub(crate) struct AdmissionState {
    sketch: FrequencySketch,
    doorkeeper: Doorkeeper,
    scan: ScanDetector,
    /// Adaptive admission threshold T, 0..=3.
    threshold: AtomicU32,
    /// Admission attempts; drives the threshold cadence.
    attempts: AtomicU64,
    /// Admission attempts since the doorkeeper was last cleared.
    door_admissions: AtomicU64,
    /// Hit ratio (fixed-point /1024) at the previous threshold sample.
    last_hit_ratio: AtomicU32,
    /// Shard capacity; doorkeeper clearing cadence.
    capacity: usize,
}

impl AdmissionState {
    fn new(shard_capacity: usize) -> Self {
        Self {
            sketch: FrequencySketch::new(shard_capacity),
            doorkeeper: Doorkeeper::new(shard_capacity),
            scan: ScanDetector::new(),
            threshold: AtomicU32::new(0),
            attempts: AtomicU64::new(0),
            door_admissions: AtomicU64::new(0),
            last_hit_ratio: AtomicU32::new(0),
            capacity: shard_capacity.max(1),
        }
    }

    /// Folds a lookup into the stream state: scan detector always, sketch
    /// only once the doorkeeper has seen the key before (one-hit wonders
    /// never reach the sketch).
    fn record_lookup(&self, hash: u64, hit: bool) {
        self.scan.record(hit);
        if self.doorkeeper.probe_and_set(hash) {
            self.sketch.increment(hash);
        }
    }

    /// Estimated sketch frequency of a fingerprint.
    #[inline]
    pub(crate) fn frequency(&self, hash: u64) -> u32 {
        self.sketch.estimate(hash)
    }

    /// Notes one admission attempt: ages the sketch on its cadence, clears
    /// the doorkeeper once attempts since the last clear exceed the shard
    /// capacity, and periodically re-tunes the threshold.
    ///
    /// Called under the shard's exclusive lock (inserts always hold it), so
    /// the clear cannot race another clear.
    pub(crate) fn note_attempt(&self) {
        self.sketch.record_admission();

        let since_clear = self.door_admissions.fetch_add(1, Ordering::Relaxed) + 1;
        if since_clear > self.capacity as u64 {
            self.door_admissions.store(0, Ordering::Relaxed);
            self.doorkeeper.clear();
        }

        let attempts = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        if attempts % THRESHOLD_PERIOD == 0 {
            self.adjust_threshold();
        }
    }

    /// Gates a candidate against the sampled victim's frequency.
    pub(crate) fn decide(&self, candidate_hash: u64, victim_freq: u32) -> Admission {
        let freq = self.sketch.estimate(candidate_hash);
        let seen = self.doorkeeper.contains(candidate_hash);

        // Two sightings minimum: either the doorkeeper remembers the key or
        // the sketch already holds an established count.
        if !seen && freq < 2 {
            return Admission::Reject;
        }

        let margin = if self.scan.scanning() {
            SCAN_MARGIN
        } else {
            self.threshold.load(Ordering::Relaxed)
        };
        if freq >= victim_freq + margin {
            Admission::Admit
        } else {
            Admission::Reject
        }
    }

    /// One-dimensional hill-climber: if the recent hit ratio fell since the
    /// last sample, tighten admission; if it rose, relax it.
    fn adjust_threshold(&self) {
        let ratio = self.scan.hit_ratio_fp();
        let last = self.last_hit_ratio.swap(ratio, Ordering::Relaxed);
        let current = self.threshold.load(Ordering::Relaxed);
        if ratio < last {
            self.threshold
                .store((current + 1).min(THRESHOLD_CAP), Ordering::Relaxed);
        } else if ratio > last {
            self.threshold
                .store(current.saturating_sub(1), Ordering::Relaxed);
        }
    }

    fn reset(&self) {
        self.sketch.clear();
        self.doorkeeper.clear();
        self.scan.reset();
        self.threshold.store(0, Ordering::Relaxed);
        self.attempts.store(0, Ordering::Relaxed);
        self.door_admissions.store(0, Ordering::Relaxed);
        self.last_hit_ratio.store(0, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub(crate) fn threshold(&self) -> u32 {
        self.threshold.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn scanning(&self) -> bool {
        self.scan.scanning()
    }
}
