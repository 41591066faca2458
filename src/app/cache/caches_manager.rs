//! Composition of several cache providers behind one provider interface
//!
//! Caches are kept in priority order: the most recently added cache has the
//! highest priority. Each operation kind has its own dispatch policy.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::{join_all, BoxFuture};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::app::image::Image;
use crate::errors::CacheResult;

use super::provider::{CacheQueryOptions, CacheQueryOutcome, CacheType, ImageCacheProvider};

/// How an operation is dispatched across the cache list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachesManagerOperationPolicy {
    /// Highest priority first, one after another (queries stop at the first hit)
    #[default]
    Serial,
    /// All caches at once
    Concurrent,
    /// Only the highest priority cache
    HighestOnly,
    /// Only the lowest priority cache
    LowestOnly,
}

/// A cache provider that delegates to an ordered list of providers
pub struct CachesManager {
    caches: RwLock<Vec<Arc<dyn ImageCacheProvider>>>,
    pub query_policy: CachesManagerOperationPolicy,
    pub store_policy: CachesManagerOperationPolicy,
    pub remove_policy: CachesManagerOperationPolicy,
    pub contains_policy: CachesManagerOperationPolicy,
    pub clear_policy: CachesManagerOperationPolicy,
}

impl Default for CachesManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CachesManager {
    /// Empty manager
    ///
    /// Queries and lookups run serially, stores go to the highest priority
    /// cache, removals and clears fan out to every cache.
    pub fn new() -> Self {
        Self {
            caches: RwLock::new(Vec::new()),
            query_policy: CachesManagerOperationPolicy::Serial,
            store_policy: CachesManagerOperationPolicy::HighestOnly,
            remove_policy: CachesManagerOperationPolicy::Concurrent,
            contains_policy: CachesManagerOperationPolicy::Serial,
            clear_policy: CachesManagerOperationPolicy::Concurrent,
        }
    }

    /// Add a cache with the highest priority
    pub fn add_cache(&self, cache: Arc<dyn ImageCacheProvider>) {
        self.caches.write().push(cache);
    }

    /// Remove a previously added cache
    pub fn remove_cache(&self, cache: &Arc<dyn ImageCacheProvider>) -> bool {
        let mut caches = self.caches.write();
        let before = caches.len();
        caches.retain(|existing| !Arc::ptr_eq(existing, cache));
        caches.len() != before
    }

    /// Caches ordered from lowest to highest priority
    pub fn caches(&self) -> Vec<Arc<dyn ImageCacheProvider>> {
        self.caches.read().clone()
    }

    /// Caches selected by a policy, highest priority first
    fn select(&self, policy: CachesManagerOperationPolicy) -> Vec<Arc<dyn ImageCacheProvider>> {
        let caches = self.caches.read();
        match policy {
            CachesManagerOperationPolicy::HighestOnly => caches.last().cloned().into_iter().collect(),
            CachesManagerOperationPolicy::LowestOnly => caches.first().cloned().into_iter().collect(),
            CachesManagerOperationPolicy::Serial | CachesManagerOperationPolicy::Concurrent => {
                caches.iter().rev().cloned().collect()
            }
        }
    }

    /// Drive per-cache operations under a policy, keeping the first error
    async fn run_all(
        policy: CachesManagerOperationPolicy,
        operations: Vec<BoxFuture<'_, CacheResult<()>>>,
    ) -> CacheResult<()> {
        let results = if policy == CachesManagerOperationPolicy::Concurrent {
            join_all(operations).await
        } else {
            let mut results = Vec::with_capacity(operations.len());
            for operation in operations {
                results.push(operation.await);
            }
            results
        };

        let mut first_error = None;
        for result in results {
            if let Err(e) = result {
                warn!("Cache operation failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl ImageCacheProvider for CachesManager {
    async fn query(
        &self,
        key: &str,
        options: &CacheQueryOptions,
        cache_type: CacheType,
    ) -> CacheQueryOutcome {
        let caches = self.select(self.query_policy);
        if self.query_policy == CachesManagerOperationPolicy::Concurrent {
            let outcomes =
                join_all(caches.iter().map(|cache| cache.query(key, options, cache_type))).await;
            return outcomes
                .into_iter()
                .find(CacheQueryOutcome::is_hit)
                .unwrap_or_else(CacheQueryOutcome::miss);
        }

        for (index, cache) in caches.iter().enumerate() {
            let outcome = cache.query(key, options, cache_type).await;
            if outcome.is_hit() {
                debug!("Cache #{} (by priority) answered query for {}", index, key);
                return outcome;
            }
        }
        CacheQueryOutcome::miss()
    }

    async fn store(
        &self,
        image: Option<Arc<Image>>,
        data: Option<Bytes>,
        key: &str,
        cache_type: CacheType,
    ) -> CacheResult<()> {
        let caches = self.select(self.store_policy);
        let operations = caches
            .iter()
            .map(|cache| cache.store(image.clone(), data.clone(), key, cache_type))
            .collect();
        Self::run_all(self.store_policy, operations).await
    }

    async fn remove(&self, key: &str, cache_type: CacheType) -> CacheResult<()> {
        let caches = self.select(self.remove_policy);
        let operations = caches
            .iter()
            .map(|cache| cache.remove(key, cache_type))
            .collect();
        Self::run_all(self.remove_policy, operations).await
    }

    async fn contains(&self, key: &str, cache_type: CacheType) -> CacheType {
        let caches = self.select(self.contains_policy);
        if self.contains_policy == CachesManagerOperationPolicy::Concurrent {
            let found = join_all(caches.iter().map(|cache| cache.contains(key, cache_type))).await;
            return found
                .into_iter()
                .find(|found| *found != CacheType::None)
                .unwrap_or(CacheType::None);
        }

        for cache in &caches {
            let found = cache.contains(key, cache_type).await;
            if found != CacheType::None {
                return found;
            }
        }
        CacheType::None
    }

    async fn clear(&self, cache_type: CacheType) -> CacheResult<()> {
        let caches = self.select(self.clear_policy);
        let operations = caches.iter().map(|cache| cache.clear(cache_type)).collect();
        Self::run_all(self.clear_policy, operations).await
    }

    fn query_memory(&self, key: &str) -> Option<Arc<Image>> {
        self.select(self.query_policy)
            .iter()
            .find_map(|cache| cache.query_memory(key))
    }

    fn sync_weak_cache(&self) {
        for cache in self.caches() {
            cache.sync_weak_cache();
        }
    }
}
