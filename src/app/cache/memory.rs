//! In-memory LRU cache bounded by total cost and entry count
//!
//! The strong store is an unbounded [`LruCache`] trimmed by hand after every
//! insert, so both the cost limit and the count limit are enforced
//! independently. When the weak table is enabled, every stored value is
//! also registered there as a [`Weak`] reference. A value purged from the
//! strong store that is still held elsewhere is resurrected on the next
//! `get`, avoiding a redundant disk or network fetch.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::app::image::Image;

use super::config::CacheConfig;

/// Weight of a cached value for cost-based eviction
pub trait CacheCost {
    fn cost(&self) -> usize;
}

impl CacheCost for Image {
    fn cost(&self) -> usize {
        self.memory_cost()
    }
}

impl CacheCost for Vec<u8> {
    fn cost(&self) -> usize {
        self.len()
    }
}

impl CacheCost for Bytes {
    fn cost(&self) -> usize {
        self.len()
    }
}

struct Entry<V> {
    value: Arc<V>,
    cost: usize,
}

struct StrongStore<V> {
    entries: LruCache<String, Entry<V>>,
    total_cost: usize,
}

impl<V> StrongStore<V> {
    /// Pop least recently used entries until both limits hold
    fn trim(&mut self, max_cost: usize, max_count: usize) -> usize {
        let mut evicted = 0;
        loop {
            let over_cost = max_cost > 0 && self.total_cost > max_cost;
            let over_count = max_count > 0 && self.entries.len() > max_count;
            if !over_cost && !over_count {
                break;
            }
            match self.entries.pop_lru() {
                Some((key, entry)) => {
                    self.total_cost = self.total_cost.saturating_sub(entry.cost);
                    evicted += 1;
                    trace!("Evicted memory cache entry {}", key);
                }
                None => break,
            }
        }
        evicted
    }
}

/// Thread-safe memory cache
pub struct MemoryCache<V> {
    strong: Mutex<StrongStore<V>>,
    /// Weak reference and the cost it was stored with
    weak: Mutex<HashMap<String, (Weak<V>, usize)>>,
    use_weak_table: bool,
    max_cost: AtomicUsize,
    max_count: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: CacheCost> MemoryCache<V> {
    /// Create a memory cache from a cache configuration
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            strong: Mutex::new(StrongStore {
                entries: LruCache::unbounded(),
                total_cost: 0,
            }),
            weak: Mutex::new(HashMap::new()),
            use_weak_table: config.should_use_weak_memory_cache,
            max_cost: AtomicUsize::new(config.max_memory_cost),
            max_count: AtomicUsize::new(config.max_memory_count),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a value, refreshing its recency
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        let found = {
            let mut strong = self.strong.lock();
            strong.entries.get(key).map(|entry| entry.value.clone())
        };

        if let Some(value) = found {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(value);
        }

        if let Some(value) = self.resurrect_from_weak(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(value);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a value with an explicit cost
    pub fn set(&self, key: impl Into<String>, value: Arc<V>, cost: usize) {
        let key = key.into();
        let weak_ref = self.use_weak_table.then(|| (Arc::downgrade(&value), cost));

        let evicted = {
            let mut strong = self.strong.lock();
            if let Some(previous) = strong.entries.put(key.clone(), Entry { value, cost }) {
                strong.total_cost = strong.total_cost.saturating_sub(previous.cost);
            }
            strong.total_cost += cost;
            strong.trim(self.max_cost(), self.max_count())
        };

        if evicted > 0 {
            debug!("Memory cache evicted {} entries to stay within limits", evicted);
        }

        if let Some(weak_ref) = weak_ref {
            self.weak.lock().insert(key, weak_ref);
        }
    }

    /// Store a value using its own cost
    pub fn set_with_default_cost(&self, key: impl Into<String>, value: Arc<V>) {
        let cost = value.cost();
        self.set(key, value, cost);
    }

    /// Remove a value from both tables
    pub fn remove(&self, key: &str) -> Option<Arc<V>> {
        let removed = {
            let mut strong = self.strong.lock();
            let removed = strong.entries.pop(key);
            if let Some(entry) = &removed {
                strong.total_cost = strong.total_cost.saturating_sub(entry.cost);
            }
            removed.map(|entry| entry.value)
        };

        if self.use_weak_table {
            self.weak.lock().remove(key);
        }
        removed
    }

    /// Check for a key without refreshing its recency
    pub fn contains(&self, key: &str) -> bool {
        if self.strong.lock().entries.contains(key) {
            return true;
        }
        self.use_weak_table
            && self
                .weak
                .lock()
                .get(key)
                .map_or(false, |(weak, _)| weak.strong_count() > 0)
    }

    /// Remove every value from both tables
    pub fn clear(&self) {
        {
            let mut strong = self.strong.lock();
            strong.entries.clear();
            strong.total_cost = 0;
        }
        self.weak.lock().clear();
        debug!("Cleared memory cache");
    }

    /// Purge the strong store on a low-memory signal
    ///
    /// The weak table is kept so values still held by callers can be
    /// resurrected later.
    pub fn handle_memory_warning(&self) {
        let purged = {
            let mut strong = self.strong.lock();
            let count = strong.entries.len();
            strong.entries.clear();
            strong.total_cost = 0;
            count
        };
        debug!("Memory warning purged {} memory cache entries", purged);
    }

    /// Drop weak references whose values no longer exist
    pub fn sync_weak_cache(&self) -> usize {
        if !self.use_weak_table {
            return 0;
        }
        let mut weak = self.weak.lock();
        let before = weak.len();
        weak.retain(|_, (value, _)| value.strong_count() > 0);
        let pruned = before - weak.len();
        if pruned > 0 {
            trace!("Pruned {} dead weak memory cache references", pruned);
        }
        pruned
    }

    /// Total cost of values in the strong store
    pub fn total_cost(&self) -> usize {
        self.strong.lock().total_cost
    }

    /// Number of values in the strong store
    pub fn total_count(&self) -> usize {
        self.strong.lock().entries.len()
    }

    pub fn max_cost(&self) -> usize {
        self.max_cost.load(Ordering::Relaxed)
    }

    pub fn max_count(&self) -> usize {
        self.max_count.load(Ordering::Relaxed)
    }

    /// Change the cost limit, evicting immediately if needed
    pub fn set_total_cost_limit(&self, max_cost: usize) {
        self.max_cost.store(max_cost, Ordering::Relaxed);
        let max_count = self.max_count();
        self.strong.lock().trim(max_cost, max_count);
    }

    /// Change the count limit, evicting immediately if needed
    pub fn set_count_limit(&self, max_count: usize) {
        self.max_count.store(max_count, Ordering::Relaxed);
        let max_cost = self.max_cost();
        self.strong.lock().trim(max_cost, max_count);
    }

    /// Returns cache statistics
    pub fn stats(&self) -> MemoryCacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let (count, total_cost) = {
            let strong = self.strong.lock();
            (strong.entries.len(), strong.total_cost)
        };

        MemoryCacheStats {
            hits,
            misses,
            hit_rate,
            count,
            total_cost,
        }
    }

    fn resurrect_from_weak(&self, key: &str) -> Option<Arc<V>> {
        if !self.use_weak_table {
            return None;
        }

        let (value, cost) = {
            let mut weak = self.weak.lock();
            match weak.get(key).map(|(value, cost)| (value.upgrade(), *cost)) {
                Some((Some(value), cost)) => Some((value, cost)),
                Some((None, _)) => {
                    weak.remove(key);
                    None
                }
                None => None,
            }
        }?;

        trace!("Resurrected {} from weak memory table", key);
        self.set(key, value.clone(), cost);
        Some(value)
    }
}

/// Statistics about memory cache performance
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct MemoryCacheStats {
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Hit rate as a percentage
    pub hit_rate: f64,
    /// Current number of entries in the strong store
    pub count: usize,
    /// Current total cost of the strong store
    pub total_cost: usize,
}

impl fmt::Display for MemoryCacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Memory cache: {} entries, {} bytes, {:.1}% hit rate ({} hits, {} misses)",
            self.count, self.total_cost, self.hit_rate, self.hits, self.misses
        )
    }
}
