//! Cache scopes, query results, and the cache provider trait
//!
//! `RequestManager` talks to its cache through [`ImageCacheProvider`], so a
//! single [`CacheEngine`](super::CacheEngine) and a multi-cache
//! [`CachesManager`](super::CachesManager) are interchangeable.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::app::image::{DecodeOptions, Image};
use crate::errors::CacheResult;

/// Scope of a cache operation, and the tier a query result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheType {
    /// No cache tier; as a result source it means the network
    None,
    /// Memory tier only
    Memory,
    /// Disk tier only
    Disk,
    /// Memory first, then disk
    #[default]
    All,
}

impl CacheType {
    pub fn includes_memory(&self) -> bool {
        matches!(self, CacheType::Memory | CacheType::All)
    }

    pub fn includes_disk(&self) -> bool {
        matches!(self, CacheType::Disk | CacheType::All)
    }
}

/// Per-query behaviour switches
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheQueryOptions {
    /// Also load the raw bytes from disk when the memory tier hits
    pub query_memory_data: bool,
    /// Load those bytes on the calling thread instead of a blocking task
    pub query_memory_data_sync: bool,
    /// Read the disk tier on the calling thread instead of a blocking task
    ///
    /// This blocks the async executor for the duration of the read and is
    /// only meant for narrow synchronous use cases.
    pub query_disk_data_sync: bool,
    /// Return disk bytes without decoding them
    pub avoid_decode: bool,
    /// Decode parameters for disk hits
    pub decode: DecodeOptions,
}

/// Result of a cache query
#[derive(Debug, Clone, Default)]
pub struct CacheQueryOutcome {
    /// Decoded image, if the query hit
    pub image: Option<Arc<Image>>,
    /// Raw bytes, when they were read
    pub data: Option<Bytes>,
    /// Tier that produced the hit (`None` on a miss)
    pub cache_type: CacheType,
}

impl CacheQueryOutcome {
    /// Empty result
    pub fn miss() -> Self {
        Self {
            image: None,
            data: None,
            cache_type: CacheType::None,
        }
    }

    pub fn is_hit(&self) -> bool {
        self.image.is_some() || self.data.is_some()
    }
}

/// Converts an image into the bytes written to disk
///
/// The serializer receives the original downloaded bytes when they exist.
pub trait CacheSerializer: Send + Sync {
    fn serialize(&self, image: &Image, original: Option<&[u8]>, key: &str) -> Option<Vec<u8>>;
}

impl<F> CacheSerializer for F
where
    F: Fn(&Image, Option<&[u8]>, &str) -> Option<Vec<u8>> + Send + Sync,
{
    fn serialize(&self, image: &Image, original: Option<&[u8]>, key: &str) -> Option<Vec<u8>> {
        self(image, original, key)
    }
}

/// A cache that the request manager can query and populate
#[async_trait]
pub trait ImageCacheProvider: Send + Sync {
    /// Look up a key in the given scope
    ///
    /// Failures are absorbed and reported as a miss.
    async fn query(
        &self,
        key: &str,
        options: &CacheQueryOptions,
        cache_type: CacheType,
    ) -> CacheQueryOutcome;

    /// Store an image and/or its bytes in the given scope
    async fn store(
        &self,
        image: Option<Arc<Image>>,
        data: Option<Bytes>,
        key: &str,
        cache_type: CacheType,
    ) -> CacheResult<()>;

    /// Remove a key from the given scope
    async fn remove(&self, key: &str, cache_type: CacheType) -> CacheResult<()>;

    /// Tier containing the key, or `CacheType::None`
    async fn contains(&self, key: &str, cache_type: CacheType) -> CacheType;

    /// Remove every entry in the given scope
    async fn clear(&self, cache_type: CacheType) -> CacheResult<()>;

    /// Synchronous memory lookup, for callers that want the fast path only
    fn query_memory(&self, _key: &str) -> Option<Arc<Image>> {
        None
    }

    /// Prune dead weak references before a new load
    fn sync_weak_cache(&self) {}
}
