//! Cache entry type.
//!
//! One [`CacheEntry`] per live key, owned by its shard's recency list and
//! referenced by the shard map. Structural fields (value, expiry, links)
//! are only mutated under the shard's exclusive lock; access bookkeeping
//! (`last_access`, `accesses`) uses atomics so hit paths that hold only the
//! shared lock can still record it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Callback invoked exactly once when an entry is destroyed — by eviction,
/// expiration, explicit delete, overwrite, `clear`, or `close` — with the
/// removed key and value.
///
/// Runs synchronously under the shard's exclusive lock. It must not
/// re-enter the cache: the lock is not reentrant and re-entry deadlocks.
/// Panics are caught, logged, and counted; they never poison the shard.
pub type EvictionCallback<K, V> = Arc<dyn Fn(K, V) + Send + Sync>;

/// A single cached entry.
pub(crate) struct CacheEntry<K, V> {
    /// The cached key (also stored in the shard map).
    pub key: K,
    /// The cached value.
    pub value: V,
    /// Precomputed key fingerprint; feeds the sketch on victim scoring.
    pub hash: u64,
    /// Absolute expiry instant; `None` never expires.
    pub expires_at: Option<Instant>,
    /// Creation instant; survives overwrites.
    pub created_at: Instant,
    /// Destruction callback, if registered.
    pub callback: Option<EvictionCallback<K, V>>,
    /// Last access, as nanos since the shard epoch.
    last_access: AtomicU64,
    /// Monotonic access count; the LFU frequency counter.
    accesses: AtomicU64,
}

impl<K, V> CacheEntry<K, V> {
    pub(crate) fn new(
        key: K,
        value: V,
        hash: u64,
        expires_at: Option<Instant>,
        callback: Option<EvictionCallback<K, V>>,
        epoch: Instant,
    ) -> Self {
        let now = Instant::now();
        Self {
            key,
            value,
            hash,
            expires_at,
            created_at: now,
            callback,
            last_access: AtomicU64::new(nanos_since(epoch, now)),
            accesses: AtomicU64::new(0),
        }
    }

    /// True when the entry's expiry lies at or before `now`.
    #[inline]
    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(at) => at <= now,
            None => false,
        }
    }

    /// Remaining lifetime at `now`; `None` means the entry never expires.
    ///
    /// Callers check [`is_expired`](Self::is_expired) first, so this
    /// saturates to zero rather than failing on a just-expired entry.
    #[inline]
    pub(crate) fn ttl_remaining(&self, now: Instant) -> Option<Duration> {
        self.expires_at.map(|at| at.saturating_duration_since(now))
    }

    /// Records an access: bumps the access counter and refreshes the
    /// last-access stamp. Safe under the shared shard lock.
    #[inline]
    pub(crate) fn touch(&self, epoch: Instant, now: Instant) {
        self.last_access
            .store(nanos_since(epoch, now), Ordering::Relaxed);
        self.accesses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn last_access_nanos(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn access_count(&self) -> u64 {
        self.accesses.load(Ordering::Relaxed)
    }

    /// Decomposes a destroyed entry into what its callback needs.
    pub(crate) fn into_parts(self) -> (K, V, Option<EvictionCallback<K, V>>) {
        (self.key, self.value, self.callback)
    }
}

impl<K, V> std::fmt::Debug for CacheEntry<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("hash", &self.hash)
            .field("expires_at", &self.expires_at)
            .field("created_at", &self.created_at)
            .field("accesses", &self.access_count())
            .finish_non_exhaustive()
    }
}

#[inline]
fn nanos_since(epoch: Instant, now: Instant) -> u64 {
    now.saturating_duration_since(epoch).as_nanos() as u64
}
