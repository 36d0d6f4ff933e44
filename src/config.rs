//! Cache configuration.
//!
//! [`Config`] is a plain struct with public fields; fill in what you need
//! and leave the rest to [`Config::default`]. Validation happens once, in
//! [`Cache::new`](crate::Cache::new).
//!
//! # Examples
//!
//! ```
//! use shardcache::{Cache, Config, EvictionPolicy};
//! use std::time::Duration;
//!
//! let config = Config {
//!     max_size: 10_000,
//!     policy: EvictionPolicy::AdmissionLfu,
//!     cleanup_interval: Some(Duration::from_secs(30)),
//!     ..Config::default()
//! };
//! let cache: Cache<String, i32> = Cache::new(config).unwrap();
//! # cache.close();
//! ```

use std::fmt;
use std::time::Duration;

use crate::error::{CacheError, Result};
use crate::policy::EvictionPolicy;

/// Largest shard count the auto-sizer will pick.
const MAX_AUTO_SHARDS: usize = 256;

/// Configuration for a [`Cache`](crate::Cache).
///
/// # Fields
///
/// - `max_size`: total entry capacity across all shards. `0` disables
///   eviction entirely; only TTL expiration removes entries.
/// - `shard_count`: number of independent shards. Must be a power of two,
///   or `0` to auto-size from the CPU count.
/// - `cleanup_interval`: period of the background expiration sweeper.
///   `None` (or a zero duration) disables it; expired entries are then only
///   removed lazily or via [`Cache::trigger_cleanup`](crate::Cache::trigger_cleanup).
/// - `default_ttl`: expiration applied to entries stored with
///   [`Ttl::Default`]. `None` means such entries never expire.
/// - `policy`: the eviction policy, one of [`EvictionPolicy`]'s four
///   variants.
/// - `stats_enabled`: when `false`, hit/miss/eviction counters are not
///   recorded and [`Cache::stats`](crate::Cache::stats) reports zeros.
#[derive(Clone, Copy)]
pub struct Config {
    /// Total entry capacity; `0` means unlimited (eviction disabled).
    pub max_size: usize,
    /// Number of shards; power of two, or `0` for auto-sizing.
    pub shard_count: usize,
    /// Background sweeper period; `None` or zero disables it.
    pub cleanup_interval: Option<Duration>,
    /// TTL used by `Ttl::Default`; `None` means no default expiration.
    pub default_ttl: Option<Duration>,
    /// Eviction policy.
    pub policy: EvictionPolicy,
    /// Whether hit/miss/eviction counters are maintained.
    pub stats_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_size: 0,
            shard_count: 0,
            cleanup_interval: None,
            default_ttl: None,
            policy: EvictionPolicy::Lru,
            stats_enabled: true,
        }
    }
}

impl Config {
    /// Checks the configuration for internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.shard_count != 0 && !self.shard_count.is_power_of_two() {
            return Err(CacheError::InvalidConfig(format!(
                "shard_count must be 0 or a power of two, got {}",
                self.shard_count
            )));
        }
        if self.max_size > 0 && self.shard_count > self.max_size {
            return Err(CacheError::InvalidConfig(format!(
                "shard_count ({}) exceeds max_size ({}); every shard must hold at least one entry",
                self.shard_count, self.max_size
            )));
        }
        Ok(())
    }

    /// Resolves the effective shard count, auto-sizing from the CPU count
    /// when `shard_count` is zero: `min(256, next_pow2(4 * cpus))`.
    pub(crate) fn resolved_shard_count(&self) -> usize {
        if self.shard_count != 0 {
            return self.shard_count;
        }
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let auto = (cpus * 4).next_power_of_two().min(MAX_AUTO_SHARDS);
        if self.max_size == 0 {
            auto
        } else {
            // Never auto-size past one entry per shard.
            auto.min(self.max_size.next_power_of_two() / 2).max(1)
        }
    }

    /// Per-shard entry capacity: `ceil(max_size / shard_count)`, or `0`
    /// (unbounded) when `max_size` is zero.
    pub(crate) fn shard_capacity(&self, shard_count: usize) -> usize {
        if self.max_size == 0 {
            0
        } else {
            self.max_size.div_ceil(shard_count)
        }
    }

    /// Effective sweeper period, with zero normalized to disabled.
    pub(crate) fn sweeper_period(&self) -> Option<Duration> {
        self.cleanup_interval.filter(|d| !d.is_zero())
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("max_size", &self.max_size)
            .field("shard_count", &self.shard_count)
            .field("cleanup_interval", &self.cleanup_interval)
            .field("default_ttl", &self.default_ttl)
            .field("policy", &self.policy)
            .field("stats_enabled", &self.stats_enabled)
            .finish()
    }
}

/// Time-to-live of a single entry, passed to
/// [`Cache::set`](crate::Cache::set).
///
/// Distinguishes "never expire" from "use the configured default":
///
/// - `Ttl::Default` falls through to [`Config::default_ttl`].
/// - `Ttl::Never` stores the entry without an expiry.
/// - `Ttl::After(d)` expires the entry `d` from now; a zero duration is
///   rejected with [`CacheError::InvalidTtl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Use [`Config::default_ttl`].
    Default,
    /// Never expire.
    Never,
    /// Expire this long after insertion; must be non-zero.
    After(Duration),
}

impl Ttl {
    /// Resolves to a concrete lifetime: `None` means never expires.
    pub(crate) fn resolve(self, default_ttl: Option<Duration>) -> Result<Option<Duration>> {
        match self {
            Ttl::Default => Ok(default_ttl),
            Ttl::Never => Ok(None),
            Ttl::After(d) if d.is_zero() => Err(CacheError::InvalidTtl),
            Ttl::After(d) => Ok(Some(d)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_power_of_two_shards() {
        for shards in [0, 1, 2, 4, 64, 256] {
            let config = Config {
                max_size: 10_000,
                shard_count: shards,
                ..Config::default()
            };
            assert!(config.validate().is_ok(), "shards={}", shards);
        }
        for shards in [3, 6, 7, 100] {
            let config = Config {
                max_size: 10_000,
                shard_count: shards,
                ..Config::default()
            };
            assert!(matches!(
                config.validate(),
                Err(CacheError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_more_shards_than_capacity_rejected() {
        let config = Config {
            max_size: 2,
            shard_count: 4,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_auto_shard_count_is_power_of_two() {
        let config = Config::default();
        let shards = config.resolved_shard_count();
        assert!(shards.is_power_of_two());
        assert!(shards <= MAX_AUTO_SHARDS);
    }

    #[test]
    fn test_auto_shard_count_respects_small_capacity() {
        let config = Config {
            max_size: 4,
            ..Config::default()
        };
        let shards = config.resolved_shard_count();
        assert!(shards.is_power_of_two());
        assert!(shards <= 4);
    }

    #[test]
    fn test_shard_capacity_rounds_up() {
        let config = Config {
            max_size: 10,
            shard_count: 4,
            ..Config::default()
        };
        assert_eq!(config.shard_capacity(4), 3);

        let unlimited = Config::default();
        assert_eq!(unlimited.shard_capacity(8), 0);
    }

    #[test]
    fn test_ttl_resolution() {
        let default = Some(Duration::from_secs(5));
        assert_eq!(Ttl::Default.resolve(default).unwrap(), default);
        assert_eq!(Ttl::Default.resolve(None).unwrap(), None);
        assert_eq!(Ttl::Never.resolve(default).unwrap(), None);
        assert_eq!(
            Ttl::After(Duration::from_secs(1)).resolve(None).unwrap(),
            Some(Duration::from_secs(1))
        );
        assert_eq!(
            Ttl::After(Duration::ZERO).resolve(default),
            Err(CacheError::InvalidTtl)
        );
    }

    #[test]
    fn test_zero_interval_disables_sweeper() {
        let config = Config {
            cleanup_interval: Some(Duration::ZERO),
            ..Config::default()
        };
        assert_eq!(config.sweeper_period(), None);
    }
}
