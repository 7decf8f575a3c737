//! Thread-Safe Shard Engine with Expiry Support
//!
//! A [`Shard`] is one independently locked partition of the keyspace. It owns a
//! `HashMap` from key to [`Entry`] behind a reader/writer lock and implements
//! every single-key operation of the cache, plus the scan-and-purge pass used
//! by the background sweeper.
//!
//! ## Lock Discipline
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Shard                              │
//! │                                                             │
//! │   get / get_with_expiration / items / item_count            │
//! │        └──> read lock (shared)                              │
//! │                                                             │
//! │   set / add / replace / delete / compute* / flush           │
//! │        └──> write lock (exclusive)                          │
//! │                                                             │
//! │   destructor + eviction callbacks                           │
//! │        └──> run after the lock is released                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Mutations that remove entries collect the removed `(key, value)` pairs while
//! holding the lock, release it, and only then notify. A callback may therefore
//! call back into the cache without deadlocking.
//!
//! ## Expiry
//!
//! An entry is logically expired once its instant has passed. Every read path
//! checks this, so an expired entry is invisible even if the sweeper has not
//! physically removed it yet.

use crate::error::{CacheError, Result};
use crate::storage::entry::{Entry, Ttl};
use parking_lot::{RwLock, RwLockWriteGuard};
use std::collections::HashMap;
use std::ops::{AddAssign, SubAssign};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Callback fired with `(key, value)` when an entry is deleted or swept.
pub type EvictionCallback<V> = Arc<dyn Fn(String, V) + Send + Sync>;

/// Callback fired with the removed value before it is dropped or evicted.
pub type Destructor<V> = Arc<dyn Fn(&V) + Send + Sync>;

/// Everything guarded by the shard lock.
pub(crate) struct ShardState<V> {
    pub(crate) entries: HashMap<String, Entry<V>>,
    on_evict: Option<EvictionCallback<V>>,
}

impl<V> ShardState<V> {
    /// Returns the entry for `key` if present and not expired at `now`.
    #[inline]
    pub(crate) fn live(&self, key: &str, now: Instant) -> Option<&Entry<V>> {
        self.entries.get(key).filter(|e| !e.is_expired_at(now))
    }

    #[inline]
    fn live_mut(&mut self, key: &str, now: Instant) -> Option<&mut Entry<V>> {
        self.entries.get_mut(key).filter(|e| !e.is_expired_at(now))
    }
}

/// A single shard containing a portion of the key-value pairs.
pub struct Shard<V> {
    /// Entries and the eviction callback
    state: RwLock<ShardState<V>>,
    /// Expiration applied by `Ttl::Default` (None = never)
    default_ttl: Option<Duration>,
    /// Called with each removed value before eviction
    on_destroy: Option<Destructor<V>>,
    /// Number of entries removed by `delete_expired`
    expired_count: AtomicU64,
}

impl<V> std::fmt::Debug for Shard<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("entries", &self.item_count())
            .field("default_ttl", &self.default_ttl)
            .field("has_destructor", &self.on_destroy.is_some())
            .field("expired_count", &self.expired_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl<V> Shard<V> {
    /// Creates an empty shard.
    ///
    /// A zero `default_ttl` is normalized to "never".
    pub fn new(default_ttl: Option<Duration>, on_destroy: Option<Destructor<V>>) -> Self {
        Self::with_entries(default_ttl, HashMap::new(), on_destroy)
    }

    /// Creates a shard that takes ownership of a pre-populated map.
    pub fn with_entries(
        default_ttl: Option<Duration>,
        entries: HashMap<String, Entry<V>>,
        on_destroy: Option<Destructor<V>>,
    ) -> Self {
        Self {
            state: RwLock::new(ShardState {
                entries,
                on_evict: None,
            }),
            default_ttl: default_ttl.filter(|d| !d.is_zero()),
            on_destroy,
            expired_count: AtomicU64::new(0),
        }
    }

    /// The default expiration applied by `Ttl::Default`.
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    /// Installs (or clears) the eviction callback.
    pub fn set_on_evicted(&self, callback: Option<EvictionCallback<V>>) {
        self.state.write().on_evict = callback;
    }

    /// Takes the write lock. Used by multi-shard operations in the router.
    pub(crate) fn lock(&self) -> RwLockWriteGuard<'_, ShardState<V>> {
        self.state.write()
    }

    /// Sets a key, overwriting any existing entry.
    ///
    /// Overwriting is not an eviction: no callback fires.
    pub fn set(&self, key: String, value: V, ttl: Ttl) {
        let expires_at = ttl.resolve(self.default_ttl);
        let previous = {
            let mut state = self.state.write();
            state
                .entries
                .insert(key, Entry::with_expiration(value, expires_at))
        };
        drop(previous);
    }

    /// Sets a key only if it has no live entry.
    pub fn add(&self, key: String, value: V, ttl: Ttl) -> Result<()> {
        let expires_at = ttl.resolve(self.default_ttl);
        let previous = {
            let mut state = self.state.write();
            if state.live(&key, Instant::now()).is_some() {
                return Err(CacheError::AlreadyExists(key));
            }
            state
                .entries
                .insert(key, Entry::with_expiration(value, expires_at))
        };
        drop(previous);
        Ok(())
    }

    /// Sets a key only if it already has a live entry.
    pub fn replace(&self, key: String, value: V, ttl: Ttl) -> Result<()> {
        let expires_at = ttl.resolve(self.default_ttl);
        let previous = {
            let mut state = self.state.write();
            if state.live(&key, Instant::now()).is_none() {
                return Err(CacheError::NotFound(key));
            }
            state
                .entries
                .insert(key, Entry::with_expiration(value, expires_at))
        };
        drop(previous);
        Ok(())
    }

    /// Deletes a key, expired or not.
    ///
    /// Returns `true` if an entry was removed. The destructor and then the
    /// eviction callback run after the lock is released.
    pub fn delete(&self, key: &str) -> bool {
        let (removed, on_evict) = {
            let mut state = self.state.write();
            let removed = state.entries.remove_entry(key);
            (removed, state.on_evict.clone())
        };

        match removed {
            Some((key, entry)) => {
                self.notify(vec![(key, entry.value)], on_evict);
                true
            }
            None => false,
        }
    }

    /// Removes every expired entry and returns how many were removed.
    ///
    /// Expired keys are collected under the read lock first, so a sweep over a
    /// shard with nothing to reclaim never blocks writers.
    pub fn delete_expired(&self) -> usize {
        let now = Instant::now();
        let candidates: Vec<String> = {
            let state = self.state.read();
            state
                .entries
                .iter()
                .filter(|(_, e)| e.is_expired_at(now))
                .map(|(k, _)| k.clone())
                .collect()
        };

        if candidates.is_empty() {
            return 0;
        }

        let (removed, on_evict) = {
            let mut state = self.state.write();
            let removed: Vec<(String, V)> = candidates
                .into_iter()
                .filter_map(|key| {
                    // A concurrent set may have refreshed the key since the scan.
                    let still_expired = state
                        .entries
                        .get(&key)
                        .is_some_and(|e| e.is_expired_at(now));
                    if still_expired {
                        state.entries.remove(&key).map(|e| (key, e.value))
                    } else {
                        None
                    }
                })
                .collect();
            (removed, state.on_evict.clone())
        };

        let count = removed.len();
        self.expired_count.fetch_add(count as u64, Ordering::Relaxed);
        self.notify(removed, on_evict);
        count
    }

    /// Runs the destructor, then the eviction callback, for each removed entry.
    fn notify(&self, removed: Vec<(String, V)>, on_evict: Option<EvictionCallback<V>>) {
        for (key, value) in removed {
            if let Some(destroy) = &self.on_destroy {
                destroy(&value);
            }
            if let Some(evict) = &on_evict {
                evict(key, value);
            }
        }
    }

    /// Number of entries in the map, including expired entries not yet swept.
    pub fn item_count(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Total number of entries removed by sweeps.
    pub fn expired_count(&self) -> u64 {
        self.expired_count.load(Ordering::Relaxed)
    }

    /// Drops every entry without running any callback.
    pub fn flush(&self) {
        let old = {
            let mut state = self.state.write();
            std::mem::take(&mut state.entries)
        };
        drop(old);
    }
}

impl<V: Clone> Shard<V> {
    /// Gets the value for a key.
    ///
    /// Returns `None` if the key doesn't exist or has expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let state = self.state.read();
        state.live(key, Instant::now()).map(|e| e.value.clone())
    }

    /// Gets the value for a key along with its expiration instant.
    pub fn get_with_expiration(&self, key: &str) -> Option<(V, Option<Instant>)> {
        let state = self.state.read();
        state
            .live(key, Instant::now())
            .map(|e| (e.value.clone(), e.expires_at))
    }

    /// Returns a copy of every live entry.
    pub fn items(&self) -> HashMap<String, Entry<V>> {
        let now = Instant::now();
        let state = self.state.read();
        state
            .entries
            .iter()
            .filter(|(_, e)| !e.is_expired_at(now))
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect()
    }

    /// Inserts each entry whose key is absent or expired.
    ///
    /// Returns the number of entries inserted.
    pub fn merge(&self, items: impl IntoIterator<Item = (String, Entry<V>)>) -> usize {
        let now = Instant::now();
        let mut state = self.state.write();
        let mut inserted = 0;
        for (key, entry) in items {
            if state.live(&key, now).is_none() {
                state.entries.insert(key, entry);
                inserted += 1;
            }
        }
        inserted
    }

    /// Atomically transforms the value stored at `key`.
    ///
    /// If the key is absent or expired, `default` is stored without expiration
    /// and returned. Otherwise the value becomes `f(current, current)` and keeps
    /// its expiration.
    pub fn compute<F>(&self, key: &str, f: F, default: V) -> V
    where
        F: FnOnce(V, V) -> V,
    {
        let mut state = self.state.write();
        compute_locked(&mut state, key, f, default, None)
    }

    /// Like [`Shard::compute`], but the expiration is always reset from `ttl`.
    pub fn compute_with_expiration<F>(&self, key: &str, f: F, default: V, ttl: Ttl) -> V
    where
        F: FnOnce(V, V) -> V,
    {
        let expires_at = ttl.resolve(self.default_ttl);
        let mut state = self.state.write();
        compute_locked(&mut state, key, f, default, Some(expires_at))
    }

    /// Stores `f(value(key1), value(key2))` under `result_key`.
    ///
    /// Both sources are read and the result is written under one held write
    /// lock. Fails with `NotFound` before any mutation if either source is
    /// absent or expired.
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
        let expires_at = ttl.resolve(self.default_ttl);
        let now = Instant::now();
        let mut state = self.state.write();

        let first = live_value(&state, key1, now)?;
        let second = live_value(&state, key2, now)?;
        let result = f(first, second);
        state.entries.insert(
            result_key.to_string(),
            Entry::with_expiration(result.clone(), expires_at),
        );
        Ok(result)
    }
}

impl<V: Clone + AddAssign> Shard<V> {
    /// Adds `delta` to a live value, keeping its expiration.
    pub fn increment(&self, key: &str, delta: V) -> Result<V> {
        let mut state = self.state.write();
        let entry = state
            .live_mut(key, Instant::now())
            .ok_or_else(|| CacheError::NotFound(key.to_string()))?;
        entry.value += delta;
        Ok(entry.value.clone())
    }
}

impl<V: Clone + SubAssign> Shard<V> {
    /// Subtracts `delta` from a live value, keeping its expiration.
    pub fn decrement(&self, key: &str, delta: V) -> Result<V> {
        let mut state = self.state.write();
        let entry = state
            .live_mut(key, Instant::now())
            .ok_or_else(|| CacheError::NotFound(key.to_string()))?;
        entry.value -= delta;
        Ok(entry.value.clone())
    }
}

/// Clones the live value at `key` or fails with `NotFound`.
pub(crate) fn live_value<V: Clone>(state: &ShardState<V>, key: &str, now: Instant) -> Result<V> {
    state
        .live(key, now)
        .map(|e| e.value.clone())
        .ok_or_else(|| CacheError::NotFound(key.to_string()))
}

/// Shared body of `compute` and `compute_with_expiration`.
///
/// `expires_at` of `None` keeps the existing expiration (and stores the
/// default with no expiration); `Some(instant)` always applies `instant`.
// NOTE: `f` receives the current value twice. Callers that want to fold in a
// second operand should capture it in the closure.
fn compute_locked<V, F>(
    state: &mut ShardState<V>,
    key: &str,
    f: F,
    default: V,
    expires_at: Option<Option<Instant>>,
) -> V
where
    V: Clone,
    F: FnOnce(V, V) -> V,
{
    let now = Instant::now();
    match state.live_mut(key, now) {
        Some(entry) => {
            let current = entry.value.clone();
            let updated = f(current.clone(), current);
            entry.value = updated.clone();
            if let Some(expires_at) = expires_at {
                entry.expires_at = expires_at;
            }
            updated
        }
        None => {
            state.entries.insert(
                key.to_string(),
                Entry::with_expiration(default.clone(), expires_at.flatten()),
            );
            default
        }
    }
}
