//! Keyspace Sharding
//!
//! The [`Router`] partitions the keyspace across N independent [`Shard`]s so
//! that operations on unrelated keys never contend on the same lock.
//!
//! ## Routing
//!
//! A key is routed with a seeded djb33 hash reduced modulo the shard count:
//!
//! ```text
//!   d = 5381 + seed + len(key)
//!   for each byte b:  d = (d * 33) ^ b      (4 bytes per step)
//!   hash = d ^ (d >> 16)
//!   shard = hash % shard_count
//! ```
//!
//! The seed is drawn from the OS CSPRNG, so a party that controls key names
//! cannot predict which keys collide on a shard. It can also be injected
//! explicitly for reproducible routing.
//!
//! ## Fan-out
//!
//! Single-key operations go to exactly one shard. Whole-cache operations
//! (`delete_expired`, `flush`, `items`, `item_count`) visit every shard in turn,
//! taking one shard lock at a time.

use crate::error::Result;
use crate::storage::entry::{Entry, Ttl};
use crate::storage::shard::{live_value, Destructor, EvictionCallback, Shard};
use std::collections::HashMap;
use std::ops::{AddAssign, SubAssign};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Seeded djb33 hash of `key`.
#[inline]
pub fn djb33(seed: u32, key: &[u8]) -> u32 {
    let mut d = 5381u32
        .wrapping_add(seed)
        .wrapping_add(key.len() as u32);

    let mut chunks = key.chunks_exact(4);
    for chunk in &mut chunks {
        d = d.wrapping_mul(33) ^ chunk[0] as u32;
        d = d.wrapping_mul(33) ^ chunk[1] as u32;
        d = d.wrapping_mul(33) ^ chunk[2] as u32;
        d = d.wrapping_mul(33) ^ chunk[3] as u32;
    }
    for &b in chunks.remainder() {
        d = d.wrapping_mul(33) ^ b as u32;
    }

    d ^ (d >> 16)
}

/// Draws a routing seed from the OS CSPRNG.
///
/// Falls back to a non-cryptographic generator, with a warning, if the OS
/// source is unavailable.
pub fn random_seed() -> u32 {
    let mut buf = [0u8; 4];
    match getrandom::getrandom(&mut buf) {
        Ok(()) => u32::from_ne_bytes(buf),
        Err(e) => {
            warn!(
                error = %e,
                "Failed to read from the system CSPRNG; shard routing continues with an insecure seed"
            );
            fastrand::u32(..)
        }
    }
}

/// Routes keys to a fixed set of shards.
pub struct Router<V> {
    /// Hash seed, fixed for the router's lifetime
    seed: u32,
    /// The shards, each shared with its sweeper
    shards: Box<[Arc<Shard<V>>]>,
    /// Default expiration shared by every shard
    default_ttl: Option<Duration>,
}

impl<V> std::fmt::Debug for Router<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("shards", &self.shards.len())
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl<V> Router<V> {
    /// Creates a router over `shard_count` empty shards.
    ///
    /// A `shard_count` of zero is treated as one.
    pub fn new(
        shard_count: usize,
        seed: u32,
        default_ttl: Option<Duration>,
        on_destroy: Option<Destructor<V>>,
    ) -> Self {
        Self::with_entries(shard_count, seed, default_ttl, HashMap::new(), on_destroy)
    }

    /// Creates a router and distributes a pre-populated map across its shards.
    pub fn with_entries(
        shard_count: usize,
        seed: u32,
        default_ttl: Option<Duration>,
        entries: HashMap<String, Entry<V>>,
        on_destroy: Option<Destructor<V>>,
    ) -> Self {
        let shard_count = shard_count.max(1);
        let default_ttl = default_ttl.filter(|d| !d.is_zero());

        let mut partitions: Vec<HashMap<String, Entry<V>>> =
            (0..shard_count).map(|_| HashMap::new()).collect();
        if shard_count == 1 {
            partitions[0] = entries;
        } else {
            for (key, entry) in entries {
                let idx = djb33(seed, key.as_bytes()) as usize % shard_count;
                partitions[idx].insert(key, entry);
            }
        }

        let shards = partitions
            .into_iter()
            .map(|entries| {
                Arc::new(Shard::with_entries(
                    default_ttl,
                    entries,
                    on_destroy.clone(),
                ))
            })
            .collect();

        Self {
            seed,
            shards,
            default_ttl,
        }
    }

    /// The routing seed.
    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// All shards, in routing order.
    pub fn shards(&self) -> &[Arc<Shard<V>>] {
        &self.shards
    }

    /// Determines which shard a key belongs to.
    #[inline]
    pub fn route(&self, key: &str) -> usize {
        if self.shards.len() == 1 {
            return 0;
        }
        djb33(self.seed, key.as_bytes()) as usize % self.shards.len()
    }

    /// Gets the shard for a given key.
    #[inline]
    fn shard(&self, key: &str) -> &Shard<V> {
        &self.shards[self.route(key)]
    }

    /// Installs (or clears) the eviction callback on every shard.
    pub fn set_on_evicted(&self, callback: Option<EvictionCallback<V>>) {
        for shard in self.shards.iter() {
            shard.set_on_evicted(callback.clone());
        }
    }

    pub fn set(&self, key: String, value: V, ttl: Ttl) {
        self.shard(&key).set(key, value, ttl)
    }

    pub fn add(&self, key: String, value: V, ttl: Ttl) -> Result<()> {
        self.shard(&key).add(key, value, ttl)
    }

    pub fn replace(&self, key: String, value: V, ttl: Ttl) -> Result<()> {
        self.shard(&key).replace(key, value, ttl)
    }

    pub fn delete(&self, key: &str) -> bool {
        self.shard(key).delete(key)
    }

    /// Sweeps every shard, returning the total number of entries removed.
    pub fn delete_expired(&self) -> usize {
        self.shards.iter().map(|s| s.delete_expired()).sum()
    }

    /// Flushes every shard. Each shard is emptied atomically on its own.
    pub fn flush(&self) {
        for shard in self.shards.iter() {
            shard.flush();
        }
    }

    /// Sum of every shard's item count (an upper bound on live entries).
    pub fn item_count(&self) -> usize {
        self.shards.iter().map(|s| s.item_count()).sum()
    }

    /// Total number of entries removed by sweeps across all shards.
    pub fn expired_count(&self) -> u64 {
        self.shards.iter().map(|s| s.expired_count()).sum()
    }
}

impl<V: Clone> Router<V> {
    pub fn get(&self, key: &str) -> Option<V> {
        self.shard(key).get(key)
    }

    pub fn get_with_expiration(&self, key: &str) -> Option<(V, Option<Instant>)> {
        self.shard(key).get_with_expiration(key)
    }

    /// Live entries, one map per shard, in routing order.
    pub fn items_by_shard(&self) -> Vec<HashMap<String, Entry<V>>> {
        self.shards.iter().map(|s| s.items()).collect()
    }

    /// Live entries of every shard merged into one map.
    ///
    /// Each key routes to exactly one shard, so merging never loses entries.
    pub fn items(&self) -> HashMap<String, Entry<V>> {
        let mut merged = HashMap::with_capacity(self.item_count());
        for shard in self.shards.iter() {
            merged.extend(shard.items());
        }
        merged
    }

    /// Inserts each entry whose key is absent or expired.
    pub fn merge(&self, items: HashMap<String, Entry<V>>) -> usize {
        let mut partitions: Vec<Vec<(String, Entry<V>)>> =
            (0..self.shards.len()).map(|_| Vec::new()).collect();
        for (key, entry) in items {
            let idx = self.route(&key);
            partitions[idx].push((key, entry));
        }

        self.shards
            .iter()
            .zip(partitions)
            .map(|(shard, items)| shard.merge(items))
            .sum()
    }

    pub fn compute<F>(&self, key: &str, f: F, default: V) -> V
    where
        F: FnOnce(V, V) -> V,
    {
        self.shard(key).compute(key, f, default)
    }

    pub fn compute_with_expiration<F>(&self, key: &str, f: F, default: V, ttl: Ttl) -> V
    where
        F: FnOnce(V, V) -> V,
    {
        self.shard(key).compute_with_expiration(key, f, default, ttl)
    }

    /// Stores `f(value(key1), value(key2))` under `result_key`.
    ///
    /// When the three keys live on different shards, every involved shard is
    /// write-locked in ascending index order before anything is read, and all
    /// locks are held until the result is written.
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
        let (i1, i2, ir) = (self.route(key1), self.route(key2), self.route(result_key));
        if i1 == i2 && i2 == ir {
            return self.shards[i1].compute_two_keys(key1, key2, f, result_key, ttl);
        }

        let expires_at = ttl.resolve(self.default_ttl);

        let mut order = vec![i1, i2, ir];
        order.sort_unstable();
        order.dedup();
        let mut guards: Vec<_> = order.iter().map(|&i| self.shards[i].lock()).collect();

        let now = Instant::now();
        let first = live_value(&*guards[slot(&order, i1)], key1, now)?;
        let second = live_value(&*guards[slot(&order, i2)], key2, now)?;
        let result = f(first, second);

        guards[slot(&order, ir)].entries.insert(
            result_key.to_string(),
            Entry::with_expiration(result.clone(), expires_at),
        );
        Ok(result)
    }
}

impl<V: Clone + AddAssign> Router<V> {
    pub fn increment(&self, key: &str, delta: V) -> Result<V> {
        self.shard(key).increment(key, delta)
    }
}

impl<V: Clone + SubAssign> Router<V> {
    pub fn decrement(&self, key: &str, delta: V) -> Result<V> {
        self.shard(key).decrement(key, delta)
    }
}

/// Position of `shard` in the sorted, deduplicated lock order.
#[inline]
fn slot(order: &[usize], shard: usize) -> usize {
    order.partition_point(|&i| i < shard)
}
