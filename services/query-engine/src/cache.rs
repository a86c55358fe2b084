//! TTL result cache with single-flight computation
//!
//! Entries expire a fixed TTL after insertion; reads never extend their life.
//! Concurrent misses on one key share a single computation: the first caller
//! spawns it on the runtime and registers a shared future, later callers await
//! that same future. The spawned task inserts the value (on success only) and
//! then clears the in-flight marker, so a caller that gives up does not stop
//! the computation for the others or leave the key stuck.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL used by callers that don't pass their own
    pub ttl_ms: u64,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 300_000,
            max_entries: 1_024,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_entries == 0 {
            return Err("cache.max_entries must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Callers that waited on another caller's computation
    pub coalesced: u64,
    pub evictions: u64,
    pub entries: usize,
}

type SharedResult<V, E> = Shared<BoxFuture<'static, Result<Arc<V>, E>>>;

struct CacheEntry<V> {
    value: Arc<V>,
    inserted_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) > self.ttl
    }
}

struct Inner<K, V, E> {
    config: CacheConfig,
    entries: DashMap<K, CacheEntry<V>>,
    in_flight: DashMap<K, SharedResult<V, E>>,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
}

impl<K, V, E> Inner<K, V, E>
where
    K: Eq + Hash + Clone,
{
    fn lookup(&self, key: &K) -> Option<Arc<V>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Some(Arc::clone(&entry.value));
            }
        }
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        None
    }

    fn insert(&self, key: K, value: Arc<V>, ttl: Duration) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.config.max_entries {
            self.purge_expired();
            while self.entries.len() >= self.config.max_entries {
                if !self.evict_oldest() {
                    break;
                }
            }
        }
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                ttl,
            },
        );
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let purged = before.saturating_sub(self.entries.len());
        self.evictions.fetch_add(purged as u64, Ordering::Relaxed);
        purged
    }

    fn evict_oldest(&self) -> bool {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.inserted_at)
            .map(|entry| entry.key().clone());
        match oldest {
            Some(key) => {
                self.entries.remove(&key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }
}

/// Clears the in-flight marker when the computation task ends, including by
/// panic.
struct InFlightGuard<K, V, E>
where
    K: Eq + Hash,
{
    inner: Arc<Inner<K, V, E>>,
    key: Option<K>,
}

impl<K, V, E> Drop for InFlightGuard<K, V, E>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.inner.in_flight.remove(&key);
        }
    }
}

pub struct ResultCache<K, V, E>
where
    K: Eq + Hash,
{
    inner: Arc<Inner<K, V, E>>,
}

impl<K, V, E> Clone for ResultCache<K, V, E>
where
    K: Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, E> ResultCache<K, V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                entries: DashMap::new(),
                in_flight: DashMap::new(),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Live value for `key`, if any. Counts a hit or a miss.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let found = self.inner.lookup(key);
        let counter = if found.is_some() {
            &self.inner.hits
        } else {
            &self.inner.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub fn put(&self, key: K, value: Arc<V>, ttl: Duration) {
        self.inner.insert(key, value, ttl);
    }

    /// Cached value for `key`, or the result of `compute`.
    ///
    /// At most one `compute` runs per key at a time. Errors reach every
    /// waiting caller and are not cached.
    pub async fn get_or_compute<F, Fut>(&self, key: K, ttl: Duration, compute: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        if let Some(value) = self.inner.lookup(&key) {
            self.inner.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }

        let shared = match self.inner.in_flight.entry(key.clone()) {
            Entry::Occupied(flight) => {
                self.inner.coalesced.fetch_add(1, Ordering::Relaxed);
                flight.get().clone()
            }
            Entry::Vacant(slot) => {
                // A computation may have finished since the first lookup.
                if let Some(value) = self.inner.lookup(&key) {
                    self.inner.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
                self.inner.misses.fetch_add(1, Ordering::Relaxed);

                let guard = InFlightGuard {
                    inner: Arc::clone(&self.inner),
                    key: Some(key),
                };
                let work = compute();
                let handle = tokio::spawn(async move {
                    let guard = guard;
                    let result = work.await.map(Arc::new);
                    if let (Ok(value), Some(key)) = (&result, guard.key.as_ref()) {
                        guard.inner.insert(key.clone(), Arc::clone(value), ttl);
                    }
                    drop(guard);
                    result
                });
                let shared = async move { handle.await.unwrap_or_else(|e| Err(E::from(e))) }
                    .boxed()
                    .shared();
                slot.insert(shared.clone());
                shared
            }
        };
        shared.await
    }

    pub fn invalidate(&self, key: &K) -> bool {
        self.inner.entries.remove(key).is_some()
    }

    /// Drop every entry matching `predicate`; returns how many were removed.
    pub fn invalidate_where<P>(&self, mut predicate: P) -> usize
    where
        P: FnMut(&K) -> bool,
    {
        let before = self.inner.entries.len();
        self.inner.entries.retain(|key, _| !predicate(key));
        before.saturating_sub(self.inner.entries.len())
    }

    pub fn invalidate_all(&self) {
        self.inner.entries.clear();
        debug!("Result cache cleared");
    }

    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Keys with a computation currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            coalesced: self.inner.coalesced.load(Ordering::Relaxed),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
            entries: self.inner.entries.len(),
        }
    }
}
