//! Cache configuration.

use std::time::Duration;

/// Number of shards used by [`CacheConfig::sharded`].
/// More shards = less lock contention, but more memory overhead.
pub const DEFAULT_SHARDS: usize = 64;

/// Construction-time settings for a [`Cache`](crate::Cache).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Expiration applied by `Ttl::Default` (None or zero = never)
    pub default_ttl: Option<Duration>,

    /// Period between background sweeps (None or zero = no sweeper)
    pub sweep_interval: Option<Duration>,

    /// Number of independently locked shards (zero is treated as one)
    pub shards: usize,

    /// Routing seed; drawn from the OS CSPRNG when None
    pub seed: Option<u32>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: None,
            sweep_interval: None,
            shards: 1,
            seed: None,
        }
    }
}

impl CacheConfig {
    /// A configuration with [`DEFAULT_SHARDS`] shards.
    pub fn sharded() -> Self {
        Self {
            shards: DEFAULT_SHARDS,
            ..Default::default()
        }
    }

    /// The default TTL with zero normalized to "never".
    pub fn effective_default_ttl(&self) -> Option<Duration> {
        self.default_ttl.filter(|d| !d.is_zero())
    }

    /// The sweep interval with zero normalized to "disabled".
    pub fn effective_sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval.filter(|d| !d.is_zero())
    }

    /// The shard count, at least one.
    pub fn effective_shards(&self) -> usize {
        self.shards.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.effective_default_ttl(), None);
        assert_eq!(config.effective_sweep_interval(), None);
        assert_eq!(config.effective_shards(), 1);
        assert_eq!(CacheConfig::sharded().effective_shards(), DEFAULT_SHARDS);
    }

    #[test]
    fn test_zero_normalization() {
        let config = CacheConfig {
            default_ttl: Some(Duration::ZERO),
            sweep_interval: Some(Duration::ZERO),
            shards: 0,
            seed: None,
        };
        assert_eq!(config.effective_default_ttl(), None);
        assert_eq!(config.effective_sweep_interval(), None);
        assert_eq!(config.effective_shards(), 1);
    }
}
