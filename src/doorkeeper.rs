//! Doorkeeper Bloom filter.
//!
//! A lock-free Bloom filter that suppresses one-hit wonders: the first
//! sighting of a key only sets filter bits, and the frequency sketch is
//! incremented from the second sighting on. Roughly half of all sketch
//! updates in scan-heavy traffic come from keys seen exactly once, so the
//! gate keeps the sketch's 4-bit counters focused on genuinely popular
//! keys.
//!
//! The filter is sized at ~10 bits per expected resident (about 1% false
//! positives with k = 4) and cleared periodically by the owning policy so
//! its notion of "seen" stays fresh.

use std::sync::atomic::{AtomicU64, Ordering};

/// Probes per key.
const PROBES: usize = 4;

/// Bits per expected resident entry.
const BITS_PER_ENTRY: usize = 10;

/// Independent multiplicative seeds, one per probe.
const SEEDS: [u64; PROBES] = [
    0x8c98_39d2_5e12_f1a7,
    0xd6e8_feb8_6659_fd93,
    0xa24b_af1c_7c28_e5d1,
    0xe703_7ed1_a0b4_28db,
];

/// Bloom filter over atomic words.
pub(crate) struct Doorkeeper {
    bits: Box<[AtomicU64]>,
    /// Total bit count; always a power of two.
    mask: usize,
}

impl Doorkeeper {
    /// Creates a doorkeeper sized for `capacity` resident entries.
    pub(crate) fn new(capacity: usize) -> Self {
        let num_bits = (capacity * BITS_PER_ENTRY).next_power_of_two().max(64);
        let words = num_bits / 64;
        Self {
            bits: (0..words).map(|_| AtomicU64::new(0)).collect(),
            mask: num_bits - 1,
        }
    }

    /// Records `hash` and reports whether it was already present.
    ///
    /// False positives are possible, false negatives are not. Lock-free;
    /// safe from the shared-lock lookup path.
    pub(crate) fn probe_and_set(&self, hash: u64) -> bool {
        let mut seen = true;
        for &seed in &SEEDS {
            let bit = self.bit_index(hash, seed);
            let word = &self.bits[bit >> 6];
            let mask = 1u64 << (bit & 63);
            let prev = word.fetch_or(mask, Ordering::Relaxed);
            seen &= prev & mask != 0;
        }
        seen
    }

    /// True when `hash` is (probably) recorded, without modifying the filter.
    pub(crate) fn contains(&self, hash: u64) -> bool {
        SEEDS.iter().all(|&seed| {
            let bit = self.bit_index(hash, seed);
            let word = self.bits[bit >> 6].load(Ordering::Relaxed);
            word & (1u64 << (bit & 63)) != 0
        })
    }

    /// Empties the filter.
    pub(crate) fn clear(&self) {
        for word in self.bits.iter() {
            word.store(0, Ordering::Relaxed);
        }
    }

    #[inline]
    fn bit_index(&self, hash: u64, seed: u64) -> usize {
        (hash.wrapping_mul(seed) >> 32) as usize & self.mask
    }
}
