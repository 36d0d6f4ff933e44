//! Cache shard: the unit of concurrency.
//!
//! A shard owns a hash map from key to list node, the intrusive recency
//! list those nodes live in, its eviction policy state, and a set of atomic
//! counters. Structural state sits behind a `parking_lot::RwLock`; the
//! policy's probabilistic structures and the counters are atomic and live
//! outside it, so lookup misses and FIFO/LFU hits complete under the shared
//! lock.
//!
//! # Safety
//!
//! The map stores raw pointers into the list. A pointer is valid from
//! `push_front` until the node is unlinked, and unlinking only happens
//! under the exclusive lock, so any pointer read while holding either lock
//! mode refers to a live node.

use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_utils::CachePadded;
use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::entry::{CacheEntry, EvictionCallback};
use crate::list::{List, ListEntry};
use crate::policy::{self, Admission, AdmissionState, EvictionPolicy, PolicyState, VICTIM_SAMPLE};
use crate::stats::{ShardStats, Stats};

type Node<K, V> = *mut ListEntry<CacheEntry<K, V>>;

/// Map and list of one shard; everything here mutates only under the
/// exclusive lock.
struct ShardData<K, V> {
    map: HashMap<K, Node<K, V>>,
    list: List<CacheEntry<K, V>>,
}

// SAFETY: ShardData owns all nodes through its list; the raw pointers in
// the map never outlive them and all mutation requires `&mut` through the
// shard lock. Entry atomics are safe to touch from shared references.
unsafe impl<K: Send, V: Send> Send for ShardData<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for ShardData<K, V> {}

/// One independent sub-cache.
pub(crate) struct Shard<K, V> {
    data: RwLock<ShardData<K, V>>,
    stats: CachePadded<ShardStats>,
    policy: PolicyState,
    /// Entry capacity of this shard; `0` disables eviction.
    capacity: usize,
    /// Reference instant for entry access stamps.
    epoch: Instant,
    stats_enabled: bool,
    /// Cache-wide closed flag, re-checked under the write lock so no
    /// insert can land after `close()` has cleared this shard.
    closed: Arc<AtomicBool>,
}

impl<K, V> Shard<K, V> {
    pub(crate) fn new(
        capacity: usize,
        policy: EvictionPolicy,
        epoch: Instant,
        stats_enabled: bool,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            data: RwLock::new(ShardData {
                map: HashMap::new(),
                list: List::new(),
            }),
            stats: CachePadded::new(ShardStats::default()),
            policy: PolicyState::new(policy, capacity),
            capacity,
            epoch,
            stats_enabled,
            closed,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.data.read().map.len()
    }

    /// Drops every entry, firing callbacks, and resets policy stream state.
    /// Lifetime counters survive.
    pub(crate) fn clear(&self) {
        let mut data = self.data.write();
        data.map.clear();
        while let Some(boxed) = data.list.pop_back() {
            self.fire(ListEntry::into_value(boxed));
        }
        self.policy.reset();
    }

    pub(crate) fn stats_into(&self, agg: &mut Stats) {
        self.stats.add_into(agg);
    }

    /// Fires a destroyed entry's callback, if any.
    fn fire(&self, entry: CacheEntry<K, V>) {
        let (key, value, callback) = entry.into_parts();
        self.run_callback(key, value, callback);
    }

    /// Invokes a callback with panic isolation: a panicking callback is
    /// caught, counted, and logged, and never leaves the shard unusable.
    fn run_callback(&self, key: K, value: V, callback: Option<EvictionCallback<K, V>>) {
        let Some(cb) = callback else {
            return;
        };
        if panic::catch_unwind(AssertUnwindSafe(|| cb(key, value))).is_err() {
            self.stats.record_callback_panic();
            warn!("eviction callback panicked; entry removed anyway");
        }
    }

    /// List length; equal to the map size at every quiescent point.
    #[cfg(test)]
    pub(crate) fn list_len(&self) -> usize {
        self.data.read().list.len()
    }
}

impl<K, V> Shard<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Looks up `key` and, on a live hit, applies `read` to the value and
    /// its remaining TTL. Handles policy hit bookkeeping, lazy expiration,
    /// and counters.
    pub(crate) fn lookup<R>(
        &self,
        key: &K,
        hash: u64,
        now: Instant,
        read: impl FnOnce(&V, Option<Duration>) -> R,
    ) -> Option<R> {
        if self.policy.hit_needs_exclusive() {
            // LRU-family hit: the splice needs the writer lock anyway, so
            // the whole lookup runs under it.
            let mut data = self.data.write();
            let node = match data.map.get(key) {
                Some(&node) => node,
                None => {
                    drop(data);
                    self.note_miss(hash);
                    return None;
                }
            };
            // SAFETY: node came from the map under the exclusive lock.
            unsafe {
                if (*node).value().is_expired(now) {
                    self.remove_expired(&mut data, node);
                    drop(data);
                    self.note_miss(hash);
                    return None;
                }
                data.list.move_to_front(node);
                let entry = (*node).value();
                entry.touch(self.epoch, now);
                self.stats.record_hit(self.stats_enabled);
                self.policy.record_lookup(hash, true);
                Some(read(&entry.value, entry.ttl_remaining(now)))
            }
        } else {
            // FIFO/LFU hit: no list splice, so the shared lock suffices and
            // bookkeeping goes through the entry's atomics.
            let data = self.data.read();
            let node = match data.map.get(key) {
                Some(&node) => node,
                None => {
                    drop(data);
                    self.note_miss(hash);
                    return None;
                }
            };
            // SAFETY: nodes are only unlinked under the exclusive lock,
            // which cannot be held while we hold the shared one.
            unsafe {
                let entry = (*node).value();
                if entry.is_expired(now) {
                    drop(data);
                    self.expire_lazily(key, now);
                    self.note_miss(hash);
                    return None;
                }
                entry.touch(self.epoch, now);
                self.stats.record_hit(self.stats_enabled);
                self.policy.record_lookup(hash, true);
                Some(read(&entry.value, entry.ttl_remaining(now)))
            }
        }
    }

    /// Inserts or overwrites `key`. On overwrite the old callback fires
    /// with the old value; a callback passed here replaces the registered
    /// one, `None` keeps it. Inserts into a full shard go through the
    /// policy's admission decision and may be silently refused.
    ///
    /// Returns `false` when the cache closed while the caller was en route;
    /// the entry was not stored.
    pub(crate) fn set(
        &self,
        key: K,
        hash: u64,
        value: V,
        expires_at: Option<Instant>,
        callback: Option<EvictionCallback<K, V>>,
        now: Instant,
    ) -> bool {
        let mut data = self.data.write();

        // close() flips the flag before clearing; observing it under the
        // lock means our insert would outlive the final clear.
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        if let Some(&node) = data.map.get(&key) {
            // SAFETY: node came from the map under the exclusive lock.
            unsafe {
                let entry = (*node).value_mut();
                let old_value = std::mem::replace(&mut entry.value, value);
                let old_callback = match callback {
                    Some(cb) => std::mem::replace(&mut entry.callback, Some(cb)),
                    None => entry.callback.clone(),
                };
                entry.expires_at = expires_at;
                entry.touch(self.epoch, now);
                if self.policy.relink_on_update() {
                    data.list.move_to_front(node);
                }
                self.run_callback(key, old_value, old_callback);
            }
            return true;
        }

        if let Some(adm) = self.policy.admission() {
            adm.note_attempt();
        }

        if self.capacity > 0 && data.map.len() >= self.capacity {
            match self.policy.admission() {
                Some(adm) => {
                    let (victim, victim_freq) = self.scored_victim(&data, adm);
                    match adm.decide(hash, victim_freq) {
                        Admission::Admit => self.evict(&mut data, victim),
                        Admission::Reject => {
                            // A refused admission is a quiet success from
                            // the caller's point of view.
                            self.stats.record_rejected(self.stats_enabled);
                            return true;
                        }
                    }
                }
                None => {
                    let victim = self.plain_victim(&data);
                    if !victim.is_null() {
                        self.evict(&mut data, victim);
                    }
                }
            }
        }

        let entry = CacheEntry::new(key.clone(), value, hash, expires_at, callback, self.epoch);
        let node = data.list.push_front(entry);
        data.map.insert(key, node);
        true
    }

    /// Removes `key`. Returns true when a live entry existed; an expired
    /// entry is removed but reported as absent and counted as an
    /// expiration. The callback fires either way.
    pub(crate) fn delete(&self, key: &K, now: Instant) -> bool {
        let mut data = self.data.write();
        let Some(node) = data.map.remove(key) else {
            return false;
        };
        // SAFETY: node came from the map under the exclusive lock.
        let entry = unsafe {
            let boxed = data.list.remove(node).expect("map node must be linked");
            ListEntry::into_value(boxed)
        };
        let was_live = !entry.is_expired(now);
        if !was_live {
            self.stats.record_expiration(self.stats_enabled);
        }
        self.fire(entry);
        was_live
    }

    /// True when `key` maps to an unexpired entry. Does not touch policy
    /// state.
    pub(crate) fn contains(&self, key: &K, now: Instant) -> bool {
        let data = self.data.read();
        match data.map.get(key) {
            // SAFETY: shared lock holds the node alive.
            Some(&node) => unsafe { !(*node).value().is_expired(now) },
            None => false,
        }
    }

    /// Removes up to `limit` expired entries, walking from the eviction end
    /// of the list. Returns the number removed; a return equal to `limit`
    /// means another batch may be due.
    pub(crate) fn cleanup(&self, now: Instant, limit: usize) -> usize {
        let mut data = self.data.write();
        let mut removed = 0;
        let mut node = data.list.back_node();
        while !node.is_null() && removed < limit {
            // SAFETY: walking under the exclusive lock; the neighbor is
            // captured before the node is unlinked.
            unsafe {
                let next = data.list.toward_front(node);
                if (*node).value().is_expired(now) {
                    self.remove_expired(&mut data, node);
                    removed += 1;
                }
                node = next;
            }
        }
        if removed > 0 {
            debug!(removed, "expired entries swept");
        }
        removed
    }

    /// Snapshot of live keys; order unspecified.
    pub(crate) fn keys(&self, now: Instant) -> Vec<K> {
        let data = self.data.read();
        let mut out = Vec::with_capacity(data.map.len());
        for &node in data.map.values() {
            // SAFETY: shared lock holds the nodes alive.
            unsafe {
                let entry = (*node).value();
                if !entry.is_expired(now) {
                    out.push(entry.key.clone());
                }
            }
        }
        out
    }

    fn note_miss(&self, hash: u64) {
        self.stats.record_miss(self.stats_enabled);
        self.policy.record_lookup(hash, false);
    }

    /// Re-acquires the lock exclusively to drop an entry that a shared-lock
    /// reader observed as expired. Re-checked: another thread may have
    /// overwritten or removed it in between.
    fn expire_lazily(&self, key: &K, now: Instant) {
        let mut data = self.data.write();
        if let Some(&node) = data.map.get(key) {
            // SAFETY: node came from the map under the exclusive lock.
            unsafe {
                if (*node).value().is_expired(now) {
                    self.remove_expired(&mut data, node);
                }
            }
        }
    }

    /// Unlinks an expired node, counts it, and fires its callback.
    ///
    /// # Safety
    ///
    /// `node` must be a live node of this shard and the exclusive lock must
    /// be held.
    unsafe fn remove_expired(&self, data: &mut ShardData<K, V>, node: Node<K, V>) {
        let entry = self.unlink(data, node);
        self.stats.record_expiration(self.stats_enabled);
        self.fire(entry);
    }

    /// Evicts a victim chosen by the policy.
    fn evict(&self, data: &mut ShardData<K, V>, node: Node<K, V>) {
        // SAFETY: victims are selected from the live list under the
        // exclusive lock.
        let entry = unsafe { self.unlink(data, node) };
        self.stats.record_eviction(self.stats_enabled);
        self.fire(entry);
    }

    /// Detaches a node from both map and list and returns the owned entry.
    ///
    /// # Safety
    ///
    /// `node` must be a live node of this shard and the exclusive lock must
    /// be held.
    unsafe fn unlink(&self, data: &mut ShardData<K, V>, node: Node<K, V>) -> CacheEntry<K, V> {
        data.map.remove(&(*node).value().key);
        let boxed = data.list.remove(node).expect("victim must be linked");
        ListEntry::into_value(boxed)
    }

    /// Victim for LRU and FIFO: the back of the list.
    fn plain_victim(&self, data: &ShardData<K, V>) -> Node<K, V> {
        match self.policy {
            PolicyState::Lfu => self.lfu_victim(data),
            _ => data.list.back_node(),
        }
    }

    /// LFU victim: the lowest access count among the tail sample, ties
    /// broken by older last access.
    fn lfu_victim(&self, data: &ShardData<K, V>) -> Node<K, V> {
        let mut best = data.list.back_node();
        if best.is_null() {
            return best;
        }
        // SAFETY: the walk stays within live nodes under the exclusive lock.
        unsafe {
            let mut best_count = (*best).value().access_count();
            let mut best_stamp = (*best).value().last_access_nanos();
            let mut node = data.list.toward_front(best);
            let mut examined = 1;
            while !node.is_null() && examined < VICTIM_SAMPLE {
                let entry = (*node).value();
                let count = entry.access_count();
                let stamp = entry.last_access_nanos();
                if count < best_count || (count == best_count && stamp < best_stamp) {
                    best = node;
                    best_count = count;
                    best_stamp = stamp;
                }
                node = data.list.toward_front(node);
                examined += 1;
            }
        }
        best
    }

    /// AdmissionLfu victim: lowest `freq + 0.25 * rank` among the tail
    /// sample, ties broken by older last access. Returns the victim node
    /// and its sketch frequency for the admission gate.
    ///
    /// Only called when the shard is full, so the list is non-empty.
    fn scored_victim(&self, data: &ShardData<K, V>, adm: &AdmissionState) -> (Node<K, V>, u32) {
        let mut best = data.list.back_node();
        debug_assert!(!best.is_null());
        // SAFETY: the walk stays within live nodes under the exclusive lock.
        unsafe {
            let first = (*best).value();
            let mut best_freq = adm.frequency(first.hash);
            let mut best_score = policy::victim_score(best_freq, 0);
            let mut best_stamp = first.last_access_nanos();
            let mut node = data.list.toward_front(best);
            let mut rank = 1;
            while !node.is_null() && rank < VICTIM_SAMPLE {
                let entry = (*node).value();
                let freq = adm.frequency(entry.hash);
                let score = policy::victim_score(freq, rank);
                let stamp = entry.last_access_nanos();
                if score < best_score || (score == best_score && stamp < best_stamp) {
                    best = node;
                    best_freq = freq;
                    best_score = score;
                    best_stamp = stamp;
                }
                node = data.list.toward_front(node);
                rank += 1;
            }
            (best, best_freq)
        }
    }
}
