//! Cache facade: shard fan-out, TTL sweeping, lifecycle, stats.
//!
//! [`Cache`] routes every operation to one of its shards by the key's
//! fingerprint and otherwise stays out of the hot path. It owns the
//! optional janitor thread that sweeps expired entries on
//! [`Config::cleanup_interval`](crate::Config::cleanup_interval) and the
//! terminal `close()` state.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::config::{Config, Ttl};
use crate::entry::EvictionCallback;
use crate::error::{CacheError, Result};
use crate::fingerprint::{shard_index, Fingerprint};
use crate::shard::Shard;
use crate::stats::Stats;

/// Expired entries unlinked per shard lock acquisition during a sweep.
const CLEANUP_BATCH: usize = 256;

/// Sharded, thread-safe, in-process key-value cache.
///
/// See the [crate docs](crate) for an overview. `Cache` is `Send + Sync`;
/// share it across threads behind an `Arc`. It is not `Clone`: dropping the
/// handle closes the cache, firing every remaining callback.
///
/// # Example
///
/// ```
/// use shardcache::{Cache, Config, Ttl};
///
/// let cache: Cache<String, String> = Cache::new(Config {
///     max_size: 1000,
///     ..Config::default()
/// }).unwrap();
///
/// cache.set("k".to_string(), "v".to_string(), Ttl::Never).unwrap();
/// assert_eq!(cache.get(&"k".to_string()), Some("v".to_string()));
/// cache.close();
/// ```
pub struct Cache<K, V> {
    inner: Arc<CacheInner<K, V>>,
    janitor: Mutex<Option<JoinHandle<()>>>,
}

struct CacheInner<K, V> {
    shards: Box<[Shard<K, V>]>,
    shard_mask: usize,
    capacity: usize,
    default_ttl: Option<Duration>,
    /// Shared with every shard, which re-checks it under its write lock so
    /// no insert can land after the closing clear.
    closed: Arc<AtomicBool>,
    /// Janitor parking spot; `close()` flips the flag and notifies so the
    /// sweeper observes shutdown within one tick.
    stop: Mutex<bool>,
    stop_signal: Condvar,
}

impl<K, V> Cache<K, V>
where
    K: Fingerprint + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Builds a cache from `config`, validating it and starting the
    /// background sweeper when a cleanup interval is configured.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let shard_count = config.resolved_shard_count();
        let shard_capacity = config.shard_capacity(shard_count);
        let epoch = Instant::now();
        let closed = Arc::new(AtomicBool::new(false));

        let shards: Box<[Shard<K, V>]> = (0..shard_count)
            .map(|_| {
                Shard::new(
                    shard_capacity,
                    config.policy,
                    epoch,
                    config.stats_enabled,
                    Arc::clone(&closed),
                )
            })
            .collect();

        let inner = Arc::new(CacheInner {
            shards,
            shard_mask: shard_count - 1,
            capacity: config.max_size,
            default_ttl: config.default_ttl,
            closed,
            stop: Mutex::new(false),
            stop_signal: Condvar::new(),
        });

        let janitor = config.sweeper_period().map(|period| {
            let inner = Arc::clone(&inner);
            thread::Builder::new()
                .name("shardcache-janitor".to_string())
                .spawn(move || loop {
                    let mut stopped = inner.stop.lock();
                    if *stopped {
                        break;
                    }
                    let _ = inner.stop_signal.wait_for(&mut stopped, period);
                    if *stopped {
                        break;
                    }
                    drop(stopped);
                    inner.sweep();
                })
                .expect("failed to spawn janitor thread")
        });

        Ok(Self {
            inner,
            janitor: Mutex::new(janitor),
        })
    }

    /// Stores `key` with the given TTL. Under an admission-controlled
    /// policy the insert may be silently refused; that is still `Ok`.
    pub fn set(&self, key: K, value: V, ttl: Ttl) -> Result<()> {
        self.set_inner(key, value, ttl, None)
    }

    /// Stores `key` and registers a callback fired exactly once with the
    /// removed key and value when the entry is destroyed — by eviction,
    /// expiration, delete, overwrite, `clear`, or `close`.
    ///
    /// The callback runs under the shard's exclusive lock and must not
    /// re-enter the cache.
    pub fn set_with_callback(
        &self,
        key: K,
        value: V,
        ttl: Ttl,
        callback: impl Fn(K, V) + Send + Sync + 'static,
    ) -> Result<()> {
        self.set_inner(key, value, ttl, Some(Arc::new(callback)))
    }

    fn set_inner(
        &self,
        key: K,
        value: V,
        ttl: Ttl,
        callback: Option<EvictionCallback<K, V>>,
    ) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        let lifetime = ttl.resolve(self.inner.default_ttl)?;
        let now = Instant::now();
        let expires_at = lifetime.map(|d| now + d);
        let hash = key.fingerprint();
        if self.shard(hash).set(key, hash, value, expires_at, callback, now) {
            Ok(())
        } else {
            Err(CacheError::Closed)
        }
    }

    /// Returns a clone of the value for `key`, if present and unexpired.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.lookup(key, |v, _| v.clone())
    }

    /// Like [`get`](Self::get), but also returns the remaining TTL
    /// (`None` = never expires).
    pub fn get_with_ttl(&self, key: &K) -> Option<(V, Option<Duration>)>
    where
        V: Clone,
    {
        self.lookup(key, |v, ttl| (v.clone(), ttl))
    }

    /// Applies `f` to the value under the shard lock, avoiding a clone.
    /// Keep `f` short: it runs while the lock is held.
    pub fn get_with<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<R> {
        self.lookup(key, |v, _| f(v))
    }

    fn lookup<R>(&self, key: &K, read: impl FnOnce(&V, Option<Duration>) -> R) -> Option<R> {
        if self.inner.closed.load(Ordering::Acquire) {
            return None;
        }
        let hash = key.fingerprint();
        self.shard(hash).lookup(key, hash, Instant::now(), read)
    }

    /// Removes `key`, firing its callback. Returns whether a live entry
    /// existed.
    pub fn delete(&self, key: &K) -> Result<bool> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        let hash = key.fingerprint();
        Ok(self.shard(hash).delete(key, Instant::now()))
    }

    /// True when `key` maps to an unexpired entry. Does not count as an
    /// access for any policy.
    pub fn contains(&self, key: &K) -> bool {
        if self.inner.closed.load(Ordering::Acquire) {
            return false;
        }
        let hash = key.fingerprint();
        self.shard(hash).contains(key, Instant::now())
    }

    /// Snapshot of live keys across all shards; order unspecified. Entries
    /// scheduled for lazy expiration are excluded.
    pub fn keys(&self) -> Vec<K> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Vec::new();
        }
        let now = Instant::now();
        let mut out = Vec::new();
        for shard in self.inner.shards.iter() {
            out.extend(shard.keys(now));
        }
        out
    }

    /// Current entry count. May transiently include entries whose TTL
    /// elapsed but which cleanup has not yet observed.
    pub fn len(&self) -> usize {
        self.inner.shards.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured total capacity; `0` means unlimited.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn shard_count(&self) -> usize {
        self.inner.shards.len()
    }

    /// Aggregates per-shard counters. Counters are read independently;
    /// the result is eventually consistent, not a transactional snapshot.
    pub fn stats(&self) -> Stats {
        let mut agg = Stats {
            capacity: self.inner.capacity as u64,
            shards: self.inner.shards.len(),
            ..Stats::default()
        };
        for shard in self.inner.shards.iter() {
            shard.stats_into(&mut agg);
        }
        agg.size = self.len() as u64;
        agg.finalize()
    }

    /// Synchronously sweeps expired entries from every shard. Each shard is
    /// swept in bounded batches so no lock is held for long.
    pub fn trigger_cleanup(&self) {
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }
        self.inner.sweep();
    }

    /// Removes every entry, firing callbacks, and resets policy state.
    pub fn clear(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        for shard in self.inner.shards.iter() {
            shard.clear();
        }
        Ok(())
    }

    #[inline]
    fn shard(&self, hash: u64) -> &Shard<K, V> {
        &self.inner.shards[shard_index(hash, self.inner.shard_mask)]
    }
}

impl<K, V> Cache<K, V> {
    /// Closes the cache: stops the janitor, clears every shard (firing the
    /// remaining callbacks), and makes the closed state terminal. Mutating
    /// calls afterwards return [`CacheError::Closed`]; reads return absent.
    /// Idempotent; also invoked on drop.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut stopped = self.inner.stop.lock();
            *stopped = true;
            self.inner.stop_signal.notify_all();
        }
        if let Some(handle) = self.janitor.lock().take() {
            let _ = handle.join();
        }
        for shard in self.inner.shards.iter() {
            shard.clear();
        }
        debug!("cache closed");
    }
}

impl<K, V> CacheInner<K, V>
where
    K: Eq + std::hash::Hash + Clone,
{
    fn sweep(&self) {
        for shard in self.shards.iter() {
            // Re-acquire the lock between batches; a shard full of expired
            // entries is drained without a long exclusive hold.
            loop {
                let removed = shard.cleanup(Instant::now(), CLEANUP_BATCH);
                if removed < CLEANUP_BATCH {
                    break;
                }
            }
        }
    }
}

impl<K, V> Drop for Cache<K, V> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<K, V> fmt::Debug for Cache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("shards", &self.inner.shards.len())
            .field("capacity", &self.inner.capacity)
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::EvictionPolicy;
    use std::sync::atomic::AtomicUsize;

    fn small_cache(policy: EvictionPolicy) -> Cache<String, i32> {
        Cache::new(Config {
            max_size: 4,
            shard_count: 1,
            policy,
            ..Config::default()
        })
        .unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result: Result<Cache<String, i32>> = Cache::new(Config {
            shard_count: 3,
            max_size: 100,
            ..Config::default()
        });
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    #[test]
    fn test_auto_sharding_uses_power_of_two() {
        let cache: Cache<u64, u64> = Cache::new(Config {
            max_size: 100_000,
            ..Config::default()
        })
        .unwrap();
        assert!(cache.shard_count().is_power_of_two());
        cache.close();
    }

    #[test]
    fn test_set_get_delete() {
        let cache = small_cache(EvictionPolicy::Lru);
        cache.set("a".to_string(), 1, Ttl::Never).unwrap();
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert!(cache.contains(&"a".to_string()));
        assert!(cache.delete(&"a".to_string()).unwrap());
        assert!(!cache.delete(&"a".to_string()).unwrap());
        assert_eq!(cache.get(&"a".to_string()), None);
        cache.close();
    }

    #[test]
    fn test_zero_ttl_is_invalid() {
        let cache = small_cache(EvictionPolicy::Lru);
        let result = cache.set("a".to_string(), 1, Ttl::After(Duration::ZERO));
        assert_eq!(result, Err(CacheError::InvalidTtl));
        cache.close();
    }

    #[test]
    fn test_default_ttl_fallthrough() {
        let cache: Cache<String, i32> = Cache::new(Config {
            max_size: 4,
            shard_count: 1,
            default_ttl: Some(Duration::from_millis(20)),
            ..Config::default()
        })
        .unwrap();
        cache.set("a".to_string(), 1, Ttl::Default).unwrap();
        cache.set("b".to_string(), 2, Ttl::Never).unwrap();

        let (_, remaining) = cache.get_with_ttl(&"a".to_string()).unwrap();
        assert!(remaining.unwrap() <= Duration::from_millis(20));
        let (_, never) = cache.get_with_ttl(&"b".to_string()).unwrap();
        assert_eq!(never, None);

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get(&"a".to_string()), None);
        assert_eq!(cache.get(&"b".to_string()), Some(2));
        cache.close();
    }

    #[test]
    fn test_get_with_avoids_clone() {
        let cache = small_cache(EvictionPolicy::Lru);
        cache.set("a".to_string(), 41, Ttl::Never).unwrap();
        assert_eq!(cache.get_with(&"a".to_string(), |v| v + 1), Some(42));
        cache.close();
    }

    #[test]
    fn test_close_is_terminal_and_idempotent() {
        let cache = small_cache(EvictionPolicy::Lru);
        cache.set("a".to_string(), 1, Ttl::Never).unwrap();
        cache.close();
        cache.close();

        assert_eq!(cache.get(&"a".to_string()), None);
        assert!(!cache.contains(&"a".to_string()));
        assert!(cache.keys().is_empty());
        assert_eq!(cache.stats().size, 0);
        assert_eq!(
            cache.set("b".to_string(), 2, Ttl::Never),
            Err(CacheError::Closed)
        );
        assert_eq!(cache.delete(&"a".to_string()), Err(CacheError::Closed));
        assert_eq!(cache.clear(), Err(CacheError::Closed));
    }

    #[test]
    fn test_close_fires_remaining_callbacks() {
        let fired = Arc::new(AtomicUsize::new(0));
        let cache = small_cache(EvictionPolicy::Lru);
        for i in 0..3 {
            let counter = Arc::clone(&fired);
            cache
                .set_with_callback(format!("k{}", i), i, Ttl::Never, move |_k, _v| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        cache.close();
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_janitor_sweeps_in_background() {
        let cache: Cache<String, i32> = Cache::new(Config {
            max_size: 16,
            shard_count: 1,
            cleanup_interval: Some(Duration::from_millis(10)),
            ..Config::default()
        })
        .unwrap();
        cache
            .set("a".to_string(), 1, Ttl::After(Duration::from_millis(5)))
            .unwrap();
        std::thread::sleep(Duration::from_millis(50));
        // The sweeper removed it without any lookup touching the key.
        assert_eq!(cache.stats().expirations, 1);
        assert_eq!(cache.len(), 0);
        cache.close();
    }

    #[test]
    fn test_drop_closes_and_fires_callbacks() {
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let cache = small_cache(EvictionPolicy::Lru);
            let counter = Arc::clone(&fired);
            cache
                .set_with_callback("k".to_string(), 7, Ttl::Never, move |_k, _v| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stats_shape() {
        let cache = small_cache(EvictionPolicy::Lru);
        cache.set("a".to_string(), 1, Ttl::Never).unwrap();
        cache.get(&"a".to_string());
        cache.get(&"missing".to_string());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.capacity, 4);
        assert_eq!(stats.shards, 1);
        assert!((stats.hit_ratio - 0.5).abs() < 1e-9);
        cache.close();
    }

    #[test]
    fn test_stats_disabled_reports_zero() {
        let cache: Cache<String, i32> = Cache::new(Config {
            max_size: 4,
            shard_count: 1,
            stats_enabled: false,
            ..Config::default()
        })
        .unwrap();
        cache.set("a".to_string(), 1, Ttl::Never).unwrap();
        cache.get(&"a".to_string());
        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.size, 1);
        cache.close();
    }

    #[test]
    fn test_trigger_cleanup_drains_all_batches() {
        let cache: Cache<u64, u64> = Cache::new(Config {
            max_size: 0,
            shard_count: 1,
            ..Config::default()
        })
        .unwrap();
        for i in 0..600u64 {
            cache
                .set(i, i, Ttl::After(Duration::from_nanos(1)))
                .unwrap();
        }
        std::thread::sleep(Duration::from_millis(5));
        cache.trigger_cleanup();
        // More than two CLEANUP_BATCHes of entries, all gone in one call.
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().expirations, 600);
        cache.close();
    }
}
