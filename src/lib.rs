#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                         Cache<K, V>                                │
//! │                                                                    │
//! │   key ──▶ fingerprint (FNV-1a / XxHash64 / mix) ──▶ shard index    │
//! │                                                                    │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────┐      ┌──────────┐          │
//! │  │ Shard 0  │ │ Shard 1  │ │ Shard 2  │ ...  │ Shard N  │          │
//! │  │ [RwLock] │ │ [RwLock] │ │ [RwLock] │      │ [RwLock] │          │
//! │  │ map+list │ │ map+list │ │ map+list │      │ map+list │          │
//! │  │ policy   │ │ policy   │ │ policy   │      │ policy   │          │
//! │  │ counters │ │ counters │ │ counters │      │ counters │          │
//! │  └──────────┘ └──────────┘ └──────────┘      └──────────┘          │
//! │                                                                    │
//! │   janitor thread ──▶ bounded expiration sweeps per shard           │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each shard pairs a hash map with an intrusive recency list; every live
//! entry is in both, and the list length always equals the map size. Under
//! `AdmissionLfu` the shard additionally carries a Count-Min sketch, a
//! doorkeeper Bloom filter, and a scan detector — all shard-local, so the
//! probabilistic state is updated without any cross-shard contention.
//!
//! # Choosing a policy
//!
//! - Recency-driven workload, no scans: [`EvictionPolicy::Lru`].
//! - Insertion-ordered turnover (logs, queues): [`EvictionPolicy::Fifo`].
//! - Stable popularity, repeated lookups: [`EvictionPolicy::Lfu`].
//! - Mixed or adversarial traffic, one-hit wonders, sequential scans:
//!   [`EvictionPolicy::AdmissionLfu`] — the default recommendation for
//!   anything internet-facing.
//!
//! # Ordering guarantees
//!
//! Operations on the same key are linearizable with respect to that key's
//! shard lock. No ordering is guaranteed across shards, and
//! [`Cache::stats`] is eventually consistent.

/// Cache facade: shard fan-out, TTL sweeping, lifecycle.
pub mod cache;

/// Configuration and TTL sentinels.
pub mod config;

/// Error taxonomy.
pub mod error;

/// Type-aware key fingerprinting and shard routing.
pub mod fingerprint;

/// Eviction policies over the intrusive recency list.
pub mod policy;

/// Aggregated statistics and per-shard counters.
pub mod stats;

/// Doorkeeper Bloom filter for the admission policy.
mod doorkeeper;

/// Cache entry: value, expiry, access bookkeeping, callback.
mod entry;

/// Intrusive recency list (internal infrastructure).
mod list;

/// Rolling miss-ratio estimator for scan detection.
mod scan;

/// Per-shard map + list + policy state behind one lock.
mod shard;

/// Count-Min frequency sketch for the admission policy.
mod sketch;

pub use cache::Cache;
pub use config::{Config, Ttl};
pub use entry::EvictionCallback;
pub use error::{CacheError, Result};
pub use fingerprint::Fingerprint;
pub use policy::EvictionPolicy;
pub use stats::Stats;
