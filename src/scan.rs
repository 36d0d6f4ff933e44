//! Scan detector.
//!
//! A streaming estimate of the recent miss ratio, used by the admission
//! policy to recognize sequential floods of unique keys. The estimate is an
//! exponentially-weighted moving average over roughly the last `WINDOW`
//! lookups, held as fixed-point (1/1024ths) in a single atomic so the
//! lookup path can update it without the exclusive shard lock.
//!
//! [`ScanDetector::scanning`] reports true once the miss ratio has stayed
//! above the threshold for a full window of consecutive lookups — a single
//! burst of misses is not a scan.

use std::sync::atomic::{AtomicU32, Ordering};

/// Fixed-point scale: 1024 represents a ratio of 1.0.
const SCALE: u32 = 1024;

/// Smoothing window, in lookups.
const WINDOW: u32 = 256;

/// Miss-ratio threshold above which a scan is suspected (0.5).
const THRESHOLD: u32 = SCALE / 2;

/// Rolling miss-ratio estimator.
pub(crate) struct ScanDetector {
    /// EWMA of the miss ratio, fixed-point over `SCALE`.
    miss_ewma: AtomicU32,
    /// Consecutive lookups with the EWMA above threshold.
    streak: AtomicU32,
}

impl ScanDetector {
    pub(crate) fn new() -> Self {
        Self {
            miss_ewma: AtomicU32::new(0),
            streak: AtomicU32::new(0),
        }
    }

    /// Folds one lookup outcome into the estimate. Lock-free.
    pub(crate) fn record(&self, hit: bool) {
        let sample: i64 = if hit { 0 } else { SCALE as i64 };
        let mut current = self.miss_ewma.load(Ordering::Relaxed);
        loop {
            let delta = (sample - current as i64) / WINDOW as i64;
            let updated = (current as i64 + delta) as u32;
            match self.miss_ewma.compare_exchange_weak(
                current,
                updated,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    current = updated;
                    break;
                }
                Err(actual) => current = actual,
            }
        }

        if current >= THRESHOLD {
            self.streak.fetch_add(1, Ordering::Relaxed);
        } else {
            self.streak.store(0, Ordering::Relaxed);
        }
    }

    /// True while the miss ratio has exceeded the threshold for a sustained
    /// window.
    pub(crate) fn scanning(&self) -> bool {
        self.streak.load(Ordering::Relaxed) >= WINDOW
    }

    /// Recent hit ratio as fixed-point over 1024; feeds the admission
    /// policy's threshold hill-climber.
    pub(crate) fn hit_ratio_fp(&self) -> u32 {
        SCALE - self.miss_ewma.load(Ordering::Relaxed).min(SCALE)
    }

    pub(crate) fn reset(&self) {
        self.miss_ewma.store(0, Ordering::Relaxed);
        self.streak.store(0, Ordering::Relaxed);
    }
}
