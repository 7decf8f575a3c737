//! The public cache handle.
//!
//! [`Cache`] is a cheap-to-clone handle over a [`Router`] and its optional
//! [`ExpirySweeper`]. Clones share the same storage. When the last clone is
//! dropped the sweeper's stop signal is delivered and its tasks exit, so a
//! forgotten cache never leaks background work.
//!
//! The sweeper tasks only hold the shards, never the handle itself, which is
//! what lets the handle's lifetime decide the sweeper's.

use crate::config::CacheConfig;
use crate::error::Result;
use crate::storage::{
    random_seed, Destructor, Entry, EvictionCallback, ExpirySweeper, Router, SweeperState, Ttl,
};
use std::collections::HashMap;
use std::ops::{AddAssign, SubAssign};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A concurrent, sharded key-value cache with per-entry expiration.
///
/// # Example
///
/// ```
/// use chronocache::{Cache, Ttl};
/// use std::time::Duration;
///
/// let cache: Cache<u32> = Cache::new(Duration::ZERO, Duration::ZERO, None);
///
/// cache.set("a", 1, Ttl::Never);
/// assert_eq!(cache.get("a"), Some(1));
///
/// cache.set("session", 42, Ttl::After(Duration::from_secs(60)));
/// assert!(cache.add("session", 7, Ttl::Never).is_err());
/// ```
pub struct Cache<V> {
    inner: Arc<Inner<V>>,
}

struct Inner<V> {
    router: Router<V>,
    sweeper: Option<ExpirySweeper>,
    stats: Counters,
}

/// Operation counters.
#[derive(Debug, Default)]
struct Counters {
    gets: AtomicU64,
    hits: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

/// A point-in-time copy of the cache's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries stored, including expired entries not yet swept
    pub items: u64,
    /// Total get operations
    pub gets: u64,
    /// Gets that found a live entry
    pub hits: u64,
    /// Gets that found nothing
    pub misses: u64,
    /// Writes that stored a value: set/add/replace, compute* and
    /// increment/decrement

    pub sets: u64,
    /// Delete calls that removed an entry
    pub deletes: u64,
    /// Entries removed by expiry sweeps
    pub expired: u64,
}

impl CacheStats {
    /// Fraction of gets that were hits (0.0 when there were none).
    pub fn hit_rate(&self) -> f64 {
        if self.gets == 0 {
            0.0
        } else {
            self.hits as f64 / self.gets as f64
        }
    }
}

impl<V> Clone for Cache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> std::fmt::Debug for Cache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("router", &self.inner.router)
            .field("sweeper", &self.inner.sweeper)
            .field("stats", &self.inner.stats)
            .finish()
    }
}

/// Builds a [`Cache`] from a [`CacheConfig`] plus callbacks.
pub struct CacheBuilder<V> {
    config: CacheConfig,
    on_destroy: Option<Destructor<V>>,
    on_evict: Option<EvictionCallback<V>>,
}

impl<V> Default for CacheBuilder<V> {
    fn default() -> Self {
        Self::from_config(CacheConfig::default())
    }
}

impl<V> CacheBuilder<V> {
    /// Starts from an existing configuration.
    pub fn from_config(config: CacheConfig) -> Self {
        Self {
            config,
            on_destroy: None,
            on_evict: None,
        }
    }

    /// Expiration applied by `Ttl::Default`. Zero means never.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = Some(ttl);
        self
    }

    /// Period between background sweeps. Zero disables the sweeper.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = Some(interval);
        self
    }

    /// Number of independently locked shards.
    pub fn shards(mut self, shards: usize) -> Self {
        self.config.shards = shards;
        self
    }

    /// Fixes the routing seed instead of drawing one from the OS.
    pub fn seed(mut self, seed: u32) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Called with every value removed by `delete` or a sweep.
    pub fn destructor(mut self, f: impl Fn(&V) + Send + Sync + 'static) -> Self {
        self.on_destroy = Some(Arc::new(f));
        self
    }

    /// Called with `(key, value)` after every deletion or sweep removal.
    pub fn on_evicted(mut self, f: impl Fn(String, V) + Send + Sync + 'static) -> Self {
        self.on_evict = Some(Arc::new(f));
        self
    }
}

impl<V: Send + Sync + 'static> CacheBuilder<V> {
    /// Builds an empty cache.
    ///
    /// Outside a Tokio runtime the sweeper runs on its own thread.
    pub fn build(self) -> Cache<V> {
        self.build_with_items(HashMap::new())
    }

    /// Builds a cache that starts with the given entries.
    pub fn build_with_items(self, items: HashMap<String, Entry<V>>) -> Cache<V> {
        let seed = self.config.seed.unwrap_or_else(random_seed);
        let router = Router::with_entries(
            self.config.effective_shards(),
            seed,
            self.config.effective_default_ttl(),
            items,
            self.on_destroy,
        );
        if self.on_evict.is_some() {
            router.set_on_evicted(self.on_evict);
        }

        let sweeper = self
            .config
            .effective_sweep_interval()
            .map(|interval| ExpirySweeper::start(router.shards(), interval));

        Cache {
            inner: Arc::new(Inner {
                router,
                sweeper,
                stats: Counters::default(),
            }),
        }
    }
}

impl<V: Send + Sync + 'static> Cache<V> {
    /// Creates a single-shard cache.
    ///
    /// A zero `default_ttl` means entries never expire by default; a zero
    /// `sweep_interval` disables the background sweeper.
    pub fn new(
        default_ttl: Duration,
        sweep_interval: Duration,
        destructor: Option<Destructor<V>>,
    ) -> Self {
        let mut builder = Self::builder()
            .default_ttl(default_ttl)
            .sweep_interval(sweep_interval);
        builder.on_destroy = destructor;
        builder.build()
    }

    /// Creates a single-shard cache over a pre-populated map, e.g. one
    /// restored with [`read_snapshot`](crate::persist::read_snapshot).
    pub fn from_items(
        default_ttl: Duration,
        sweep_interval: Duration,
        items: HashMap<String, Entry<V>>,
    ) -> Self {
        Self::builder()
            .default_ttl(default_ttl)
            .sweep_interval(sweep_interval)
            .build_with_items(items)
    }

    /// Creates a cache from a configuration, without callbacks.
    pub fn with_config(config: CacheConfig) -> Self {
        CacheBuilder::from_config(config).build()
    }
}

impl<V> Cache<V> {
    /// Starts building a cache.
    pub fn builder() -> CacheBuilder<V> {
        CacheBuilder::default()
    }

    /// Sets a key, overwriting any existing entry.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Ttl) {
        self.inner.stats.sets.fetch_add(1, Ordering::Relaxed);
        self.inner.router.set(key.into(), value, ttl)
    }

    /// Sets a key with the default expiration.
    pub fn set_default(&self, key: impl Into<String>, value: V) {
        self.set(key, value, Ttl::Default)
    }

    /// Sets a key only if it has no live entry.
    ///
    /// Fails with `AlreadyExists` otherwise.
    pub fn add(&self, key: impl Into<String>, value: V, ttl: Ttl) -> Result<()> {
        self.inner.router.add(key.into(), value, ttl)?;
        self.inner.stats.sets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Sets a key only if it already has a live entry.
    ///
    /// Fails with `NotFound` otherwise.
    pub fn replace(&self, key: impl Into<String>, value: V, ttl: Ttl) -> Result<()> {
        self.inner.router.replace(key.into(), value, ttl)?;
        self.inner.stats.sets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Deletes a key, returning `true` if an entry (expired or not) was removed.
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.inner.router.delete(key);
        if removed {
            self.inner.stats.deletes.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Removes every expired entry now, returning how many were removed.
    pub fn delete_expired(&self) -> usize {
        self.inner.router.delete_expired()
    }

    /// Drops every entry. No destructor or eviction callback runs.
    pub fn flush(&self) {
        self.inner.router.flush()
    }

    /// Number of stored entries, including expired entries not yet swept.
    pub fn item_count(&self) -> usize {
        self.inner.router.item_count()
    }

    /// Replaces the eviction callback on every shard.
    pub fn set_on_evicted(&self, f: impl Fn(String, V) + Send + Sync + 'static) {
        self.inner.router.set_on_evicted(Some(Arc::new(f)))
    }

    /// Removes the eviction callback.
    pub fn clear_on_evicted(&self) {
        self.inner.router.set_on_evicted(None)
    }

    /// Stops the background sweeper early. Dropping the last handle does the
    /// same; calling this more than once has no further effect.
    pub fn stop_sweeper(&self) {
        if let Some(sweeper) = &self.inner.sweeper {
            sweeper.stop();
        }
    }

    /// Lifecycle state of the sweeper, or None when sweeping is disabled.
    pub fn sweeper_state(&self) -> Option<SweeperState> {
        self.inner.sweeper.as_ref().map(|s| s.state())
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.inner.router.shard_count()
    }

    /// The shard index `key` routes to.
    pub fn route(&self, key: &str) -> usize {
        self.inner.router.route(key)
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> CacheStats {
        let stats = &self.inner.stats;
        let gets = stats.gets.load(Ordering::Relaxed);
        let hits = stats.hits.load(Ordering::Relaxed);
        CacheStats {
            items: self.item_count() as u64,
            gets,
            hits,
            misses: gets.saturating_sub(hits),
            sets: stats.sets.load(Ordering::Relaxed),
            deletes: stats.deletes.load(Ordering::Relaxed),
            expired: self.inner.router.expired_count(),
        }
    }

    fn record_get(&self, hit: bool) {
        self.inner.stats.gets.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.inner.stats.hits.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl<V: Clone> Cache<V> {
    /// Gets the value for a key.
    ///
    /// Returns `None` if the key doesn't exist or has expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let value = self.inner.router.get(key);
        self.record_get(value.is_some());
        value
    }

    /// Gets the value for a key together with its expiration instant
    /// (None if it never expires).
    pub fn get_with_expiration(&self, key: &str) -> Option<(V, Option<Instant>)> {
        let found = self.inner.router.get_with_expiration(key);
        self.record_get(found.is_some());
        found
    }

    /// A copy of every live entry.
    pub fn items(&self) -> HashMap<String, Entry<V>> {
        self.inner.router.items()
    }

    /// A copy of every live entry, one map per shard in routing order.
    pub fn items_by_shard(&self) -> Vec<HashMap<String, Entry<V>>> {
        self.inner.router.items_by_shard()
    }

    /// Inserts each entry whose key is absent or expired. Returns how many
    /// entries were inserted.
    pub fn merge(&self, items: HashMap<String, Entry<V>>) -> usize {
        self.inner.router.merge(items)
    }

    /// Atomically transforms the value at `key`.
    ///
    /// If the key is absent or expired, stores `default` with no expiration
    /// and returns it. Otherwise stores and returns `f(current, current)`,
    /// keeping the entry's expiration.
    pub fn compute<F>(&self, key: &str, f: F, default: V) -> V
    where
        F: FnOnce(V, V) -> V,
    {
        self.inner.stats.sets.fetch_add(1, Ordering::Relaxed);
        self.inner.router.compute(key, f, default)
    }

    /// Like [`Cache::compute`], but the expiration is always reset from `ttl`.
    pub fn compute_with_expiration<F>(&self, key: &str, f: F, default: V, ttl: Ttl) -> V
    where
        F: FnOnce(V, V) -> V,
    {
        self.inner.stats.sets.fetch_add(1, Ordering::Relaxed);
        self.inner.router.compute_with_expiration(key, f, default, ttl)
    }

    /// Atomically stores `f(value(key1), value(key2))` under `result_key`.
    ///
    /// Fails with `NotFound` if either source is absent or expired, in which
    /// case nothing is written.
    pub fn compute_two_keys<F>(
        &self,
        key1: &str,
        key2: &str,
        f: F,
        result_key: &str,
        ttl: Ttl,
    ) -> Result<V>
    where
        F: FnOnce(V, V) -> V,
    {
        let result = self
            .inner
            .router
            .compute_two_keys(key1, key2, f, result_key, ttl)?;
        self.inner.stats.sets.fetch_add(1, Ordering::Relaxed);
        Ok(result)
    }
}

impl<V: Clone + AddAssign> Cache<V> {
    /// Adds `delta` to a live value, keeping its expiration.
    pub fn increment(&self, key: &str, delta: V) -> Result<V> {
        let value = self.inner.router.increment(key, delta)?;
        self.inner.stats.sets.fetch_add(1, Ordering::Relaxed);
        Ok(value)
    }
}

impl<V: Clone + SubAssign> Cache<V> {
    /// Subtracts `delta` from a live value, keeping its expiration.
    pub fn decrement(&self, key: &str, delta: V) -> Result<V> {
        let value = self.inner.router.decrement(key, delta)?;
        self.inner.stats.sets.fetch_add(1, Ordering::Relaxed);
        Ok(value)
    }
}
