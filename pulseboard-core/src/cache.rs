//! Query result memoization
//!
//! Each [`QueryCache`] memoizes one kind of query result for the lifetime of
//! the [`crate::Dashboard`] that owns it. There is no TTL and no eviction:
//! the key space is bounded by the filter combinations the UI can select.
//!
//! Concurrency: the key map is guarded by one mutex, held only to look up or
//! create a per-key slot. Computation runs under the slot's own mutex, so
//! concurrent callers of the same missing key wait for a single computation
//! while other keys proceed in parallel.

use crate::error::Result;
use crate::types::{CountrySelection, DateRange, Granularity};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Deterministic cache key built from a full query parameter tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Usage table: `pb:chart:{view}:{start}:{end}`
    pub fn chart_data(granularity: Granularity, range: &DateRange) -> Self {
        CacheKey(format!(
            "pb:chart:{}:{}:{}",
            granularity.as_str(),
            range.start(),
            range.end()
        ))
    }

    /// DAU/MAU ratios: `pb:ratio:{start}:{end}:{countries}`
    pub fn ratio(range: &DateRange, countries: &CountrySelection) -> Self {
        CacheKey(format!(
            "pb:ratio:{}:{}:{}",
            range.start(),
            range.end(),
            countries.key_fragment()
        ))
    }

    /// Per-country series: `pb:series:{view}:{selector}:{start}:{end}:{countries}`
    pub fn country_series(
        granularity: Granularity,
        selector: &str,
        range: &DateRange,
        countries: &CountrySelection,
    ) -> Self {
        CacheKey(format!(
            "pb:series:{}:{}:{}:{}:{}",
            granularity.as_str(),
            selector,
            range.start(),
            range.end(),
            countries.key_fragment()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hit/miss counters of one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

type Slot<V> = Arc<Mutex<Option<V>>>;

/// Memoizes `V` per [`CacheKey`].
pub struct QueryCache<V> {
    name: &'static str,
    slots: Mutex<HashMap<CacheKey, Slot<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> QueryCache<V> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slots: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Return the stored value for `key`, computing and storing it first if
    /// absent.
    ///
    /// A failed computation is not stored; the next caller computes again.
    pub fn get_or_compute<F>(&self, key: &CacheKey, compute: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        let slot = {
            let mut slots = lock(&self.slots);
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        let mut value = lock(&slot);
        if let Some(cached) = value.as_ref() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(cache = self.name, key = %key, "Cache hit");
            return Ok(cached.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(cache = self.name, key = %key, "Cache miss, computing");

        match compute() {
            Ok(computed) => {
                *value = Some(computed.clone());
                Ok(computed)
            }
            Err(e) => {
                tracing::debug!(cache = self.name, key = %key, error = %e, "Computation failed, not cached");
                // Drop the empty slot unless another caller is waiting on it
                let mut slots = lock(&self.slots);
                if Arc::strong_count(&slot) == 2 {
                    slots.remove(key);
                }
                Err(e)
            }
        }
    }

    /// Stored value for `key`, without computing.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let slot = lock(&self.slots).get(key).cloned()?;
        let value = lock(&slot).clone();
        value
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        let slots: Vec<Slot<V>> = lock(&self.slots).values().cloned().collect();
        slots.iter().filter(|slot| lock(slot).is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

/// Lock a mutex, recovering the data if a computing thread panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
