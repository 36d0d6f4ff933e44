//! Count-Min frequency sketch.
//!
//! Approximate per-key access frequencies for the admission policy: four
//! rows of 4-bit saturating counters, sixteen counters packed per
//! `AtomicU64` word. Increments and reads are lock-free, so the lookup path
//! can feed the sketch under the shard's shared lock.
//!
//! Counters are halved ("aged") once the number of admission attempts since
//! the last aging exceeds `width * 10`. Driving aging off the admission
//! counter instead of wall time keeps the decay behavior independent of
//! traffic rate.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Rows in the sketch; estimates take the minimum across rows.
const DEPTH: usize = 4;

/// 4-bit counters saturate here.
const COUNTER_MAX: u8 = 15;

/// Halves every 4-bit counter in a word in one shift: the low bit of each
/// nibble is cleared by the mask instead of borrowing from its neighbor.
const HALVE_MASK: u64 = 0x7777_7777_7777_7777;

/// Aging triggers after this many admissions per counter column.
const AGING_MULTIPLIER: usize = 10;

/// Per-row multiplicative seeds.
const SEEDS: [u64; DEPTH] = [
    0xc3a5_c85c_97cb_3127,
    0xb492_b66f_be98_f273,
    0x9ae1_6a3b_2f90_404f,
    0xcbf2_9ce4_8422_2325,
];

/// Count-Min sketch with 4-bit saturating counters.
pub(crate) struct FrequencySketch {
    /// `DEPTH` rows of packed counters, row-major.
    table: Box<[AtomicU64]>,
    /// Counters per row (power of two); index mask is `width - 1`.
    width: usize,
    /// Admissions since the last aging pass.
    admissions: AtomicUsize,
    /// Admission count that triggers aging.
    sample_size: usize,
}

impl FrequencySketch {
    /// Creates a sketch sized for `capacity` resident entries: width is the
    /// next power of two at or above the capacity, at least 16.
    pub(crate) fn new(capacity: usize) -> Self {
        let width = capacity.next_power_of_two().max(16);
        let words_per_row = width / 16;
        let table = (0..words_per_row * DEPTH)
            .map(|_| AtomicU64::new(0))
            .collect();
        Self {
            table,
            width,
            admissions: AtomicUsize::new(0),
            sample_size: width * AGING_MULTIPLIER,
        }
    }

    /// Bumps all four row counters for `hash`, saturating at 15.
    pub(crate) fn increment(&self, hash: u64) {
        for row in 0..DEPTH {
            let (word, shift) = self.position(hash, row);
            let slot = &self.table[word];
            loop {
                let current = slot.load(Ordering::Relaxed);
                let counter = ((current >> shift) & 0xF) as u8;
                if counter >= COUNTER_MAX {
                    break;
                }
                let updated = current + (1u64 << shift);
                if slot
                    .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    break;
                }
            }
        }
    }

    /// Estimated frequency of `hash`: the minimum counter across rows,
    /// 0..=15. An overestimate with bounded error, never an underestimate
    /// (modulo aging).
    pub(crate) fn estimate(&self, hash: u64) -> u32 {
        let mut min = COUNTER_MAX;
        for row in 0..DEPTH {
            let (word, shift) = self.position(hash, row);
            let counter = ((self.table[word].load(Ordering::Relaxed) >> shift) & 0xF) as u8;
            min = min.min(counter);
        }
        min as u32
    }

    /// Notes one admission attempt; ages the sketch when the attempt count
    /// since the last aging exceeds the sample size.
    pub(crate) fn record_admission(&self) {
        let count = self.admissions.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= self.sample_size
            && self
                .admissions
                .compare_exchange(count, 0, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            self.age();
        }
    }

    /// Halves every counter, giving decaying weight to historically hot keys.
    fn age(&self) {
        for slot in self.table.iter() {
            loop {
                let current = slot.load(Ordering::Relaxed);
                let halved = (current >> 1) & HALVE_MASK;
                if slot
                    .compare_exchange_weak(current, halved, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    break;
                }
            }
        }
    }

    /// Zeroes the sketch.
    pub(crate) fn clear(&self) {
        for slot in self.table.iter() {
            slot.store(0, Ordering::Relaxed);
        }
        self.admissions.store(0, Ordering::Relaxed);
    }

    /// Locates `(word index, bit shift)` of the counter for `hash` in `row`.
    #[inline]
    fn position(&self, hash: u64, row: usize) -> (usize, usize) {
        let mixed = hash.wrapping_mul(SEEDS[row]);
        let index = ((mixed >> 32) as usize) & (self.width - 1);
        let word = (row * self.width + index) / 16;
        let shift = (index & 0xF) * 4;
        (word, shift)
    }
}
