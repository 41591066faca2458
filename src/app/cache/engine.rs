//! Two-tier image cache combining the memory and disk stores
//!
//! The memory tier holds decoded images; the disk tier holds encoded bytes.
//! A disk hit is decoded on a blocking worker and promoted into memory.
//! All disk access goes through one mutex so writes and sweeps never
//! interleave. The disk root is mirrored outside that mutex so path lookups
//! never wait on disk work.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::app::image::{Image, ImageCoder, StandardCoder};
use crate::constants::cache::{APP_DIR_NAME, DEFAULT_NAMESPACE};
use crate::errors::{CacheError, CacheResult};

use super::config::CacheConfig;
use super::disk::{DiskCache, ExpirySweep};
use super::memory::MemoryCache;
use super::path::PathGenerator;
use super::provider::{
    CacheQueryOptions, CacheQueryOutcome, CacheSerializer, CacheType, ImageCacheProvider,
};
use super::stats::CacheStats;

/// Default parent directory for cache namespaces
pub fn default_cache_directory() -> CacheResult<PathBuf> {
    dirs::cache_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .ok_or_else(|| CacheError::DirectoryNotAccessible {
            path: PathBuf::from(APP_DIR_NAME),
        })
}

/// Namespaced image cache
pub struct CacheEngine {
    namespace: String,
    config: CacheConfig,
    memory: MemoryCache<Image>,
    disk: Arc<Mutex<DiskCache>>,
    /// Root of the disk tier, updated under the disk lock when it moves
    root: Arc<RwLock<PathBuf>>,
    coder: Arc<dyn ImageCoder>,
    serializer: Option<Arc<dyn CacheSerializer>>,
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("namespace", &self.namespace)
            .field("disk_root", &*self.root.read())
            .finish()
    }
}

impl CacheEngine {
    /// Create a cache engine rooted at `{directory}/{namespace}`
    ///
    /// When `directory` is `None` the platform cache directory is used.
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if the cache directory cannot be created
    pub fn new(
        namespace: impl Into<String>,
        directory: Option<PathBuf>,
        config: CacheConfig,
        coder: Arc<dyn ImageCoder>,
    ) -> CacheResult<Self> {
        let mut namespace = namespace.into();
        if namespace.is_empty() {
            namespace = DEFAULT_NAMESPACE.to_string();
        }
        let directory = match directory {
            Some(directory) => directory,
            None => default_cache_directory()?,
        };
        let root = directory.join(&namespace);
        let disk = DiskCache::new(&root, config.clone())?;

        info!(
            "Cache engine '{}' ready at {}",
            namespace,
            root.display()
        );

        Ok(Self {
            namespace,
            memory: MemoryCache::new(&config),
            config,
            disk: Arc::new(Mutex::new(disk)),
            root: Arc::new(RwLock::new(root)),
            coder,
            serializer: None,
        })
    }

    /// Engine with the standard coder
    pub fn with_defaults(
        namespace: impl Into<String>,
        directory: Option<PathBuf>,
    ) -> CacheResult<Self> {
        Self::new(
            namespace,
            directory,
            CacheConfig::default(),
            Arc::new(StandardCoder::new()),
        )
    }

    /// Use a custom serializer for images stored without their bytes
    pub fn with_serializer(mut self, serializer: Arc<dyn CacheSerializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn memory(&self) -> &MemoryCache<Image> {
        &self.memory
    }

    pub fn coder(&self) -> Arc<dyn ImageCoder> {
        self.coder.clone()
    }

    /// Current disk root directory
    pub fn disk_root(&self) -> PathBuf {
        self.root.read().clone()
    }

    /// Disk path a key maps to (`None` for an empty key)
    pub fn cache_path_for_key(&self, key: &str) -> Option<PathBuf> {
        if key.is_empty() {
            return None;
        }
        Some(PathGenerator::path_for_key(&self.root.read(), key))
    }

    async fn with_disk<T, F>(&self, op: F) -> CacheResult<T>
    where
        F: FnOnce(&mut DiskCache) -> T + Send + 'static,
        T: Send + 'static,
    {
        let disk = self.disk.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = disk.lock();
            op(&mut guard)
        })
        .await
        .map_err(|e| CacheError::TaskFailed {
            reason: e.to_string(),
        })
    }

    async fn read_disk(&self, key: &str, on_caller: bool) -> Option<Vec<u8>> {
        if on_caller {
            if let Some(disk) = self.disk.try_lock() {
                return disk.read(key);
            }
            debug!("Disk tier busy, reading {} on a worker", key);
        }
        let key = key.to_string();
        match self.with_disk(move |disk| disk.read(&key)).await {
            Ok(data) => data,
            Err(e) => {
                warn!("Disk read task failed: {}", e);
                None
            }
        }
    }

    /// Memory-only lookup
    pub fn query_memory(&self, key: &str) -> Option<Arc<Image>> {
        if key.is_empty() {
            return None;
        }
        self.memory.get(key)
    }

    /// Raw bytes stored on disk for a key
    pub async fn query_disk_data(&self, key: &str) -> Option<Bytes> {
        if key.is_empty() {
            return None;
        }
        self.read_disk(key, false).await.map(Bytes::from)
    }

    /// Whether the disk tier holds a key
    pub async fn disk_image_data_exists(&self, key: &str) -> bool {
        let key = key.to_string();
        self.with_disk(move |disk| disk.contains_key(&key))
            .await
            .unwrap_or(false)
    }

    /// Look up a key, memory first, then disk
    ///
    /// Disk hits are decoded and promoted into memory when memory caching
    /// is enabled. Read and decode failures count as a miss.
    pub async fn query(
        &self,
        key: &str,
        options: &CacheQueryOptions,
        cache_type: CacheType,
    ) -> CacheQueryOutcome {
        if key.is_empty() || cache_type == CacheType::None {
            return CacheQueryOutcome::miss();
        }

        if cache_type.includes_memory() {
            if let Some(image) = self.memory.get(key) {
                let data = if options.query_memory_data {
                    self.read_disk(key, options.query_memory_data_sync)
                        .await
                        .map(Bytes::from)
                } else {
                    None
                };
                return CacheQueryOutcome {
                    image: Some(image),
                    data,
                    cache_type: CacheType::Memory,
                };
            }
        }

        if !cache_type.includes_disk() {
            return CacheQueryOutcome::miss();
        }

        let Some(data) = self.read_disk(key, options.query_disk_data_sync).await else {
            return CacheQueryOutcome::miss();
        };
        let data = Bytes::from(data);

        if options.avoid_decode {
            return CacheQueryOutcome {
                image: None,
                data: Some(data),
                cache_type: CacheType::Disk,
            };
        }

        let decoded = if options.query_disk_data_sync {
            self.coder.decode(&data, &options.decode)
        } else {
            let coder = self.coder.clone();
            let bytes = data.clone();
            let decode_options = options.decode.clone();
            tokio::task::spawn_blocking(move || coder.decode(&bytes, &decode_options))
                .await
                .unwrap_or_else(|e| {
                    warn!("Decode task failed: {}", e);
                    None
                })
        };

        let Some(image) = decoded else {
            warn!("Disk cache entry for {} could not be decoded", key);
            return CacheQueryOutcome::miss();
        };

        let image = Arc::new(image);
        if self.config.should_cache_images_in_memory {
            self.memory.set_with_default_cost(key, image.clone());
        }

        debug!("Disk cache hit for {}", key);
        CacheQueryOutcome {
            image: Some(image),
            data: Some(data),
            cache_type: CacheType::Disk,
        }
    }

    /// Store an image and/or bytes under a key
    ///
    /// When only the image is given the disk tier receives the serializer or
    /// coder output.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::EncodeFailed` if no bytes could be produced for
    /// the disk tier, or an I/O error from the write
    pub async fn store(
        &self,
        image: Option<Arc<Image>>,
        data: Option<Bytes>,
        key: &str,
        cache_type: CacheType,
    ) -> CacheResult<()> {
        if key.is_empty() || cache_type == CacheType::None {
            return Ok(());
        }
        if image.is_none() && data.is_none() {
            return Ok(());
        }

        if cache_type.includes_memory() && self.config.should_cache_images_in_memory {
            if let Some(image) = &image {
                self.memory.set_with_default_cost(key, image.clone());
            }
        }

        if !cache_type.includes_disk() {
            return Ok(());
        }

        let bytes = match (data, image) {
            (Some(data), image) => match (&self.serializer, image) {
                (Some(serializer), Some(image)) => {
                    let serializer = serializer.clone();
                    let key_owned = key.to_string();
                    self.blocking(move || serializer.serialize(&image, Some(&data[..]), &key_owned))
                        .await?
                }
                _ => Some(data.to_vec()),
            },
            (None, Some(image)) => {
                let key_owned = key.to_string();
                match &self.serializer {
                    Some(serializer) => {
                        let serializer = serializer.clone();
                        self.blocking(move || serializer.serialize(&image, None, &key_owned))
                            .await?
                    }
                    None => {
                        let coder = self.coder.clone();
                        self.blocking(move || coder.encode(&image, image.format(), None))
                            .await?
                    }
                }
            }
            (None, None) => None,
        };

        let bytes = bytes.ok_or_else(|| CacheError::EncodeFailed {
            key: key.to_string(),
        })?;

        self.store_data_to_disk(bytes, key).await
    }

    async fn blocking<T, F>(&self, op: F) -> CacheResult<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(op)
            .await
            .map_err(|e| CacheError::TaskFailed {
                reason: e.to_string(),
            })
    }

    /// Put a decoded image into the memory tier only
    pub fn store_to_memory(&self, image: Arc<Image>, key: &str) {
        if key.is_empty() || !self.config.should_cache_images_in_memory {
            return;
        }
        self.memory.set_with_default_cost(key, image);
    }

    /// Write raw bytes to the disk tier only
    pub async fn store_data_to_disk(&self, data: impl Into<Vec<u8>>, key: &str) -> CacheResult<()> {
        let data = data.into();
        let key = key.to_string();
        self.with_disk(move |disk| disk.write(&key, &data)).await?
    }

    /// Remove a key from the given scope
    pub async fn remove(&self, key: &str, cache_type: CacheType) -> CacheResult<()> {
        if key.is_empty() {
            return Ok(());
        }
        if cache_type.includes_memory() {
            self.memory.remove(key);
        }
        if cache_type.includes_disk() {
            let key = key.to_string();
            self.with_disk(move |disk| disk.remove(&key)).await??;
        }
        Ok(())
    }

    /// Tier containing the key
    pub async fn contains(&self, key: &str, cache_type: CacheType) -> CacheType {
        if key.is_empty() {
            return CacheType::None;
        }
        if cache_type.includes_memory() && self.memory.contains(key) {
            return CacheType::Memory;
        }
        if cache_type.includes_disk() && self.disk_image_data_exists(key).await {
            return CacheType::Disk;
        }
        CacheType::None
    }

    /// Remove every entry from the given scope
    pub async fn clear(&self, cache_type: CacheType) -> CacheResult<()> {
        if cache_type.includes_memory() {
            self.memory.clear();
        }
        if cache_type.includes_disk() {
            self.with_disk(|disk| disk.remove_all()).await??;
            info!("Cleared disk cache '{}'", self.namespace);
        }
        Ok(())
    }

    /// Apply the age and size policies to the disk tier
    pub async fn remove_expired(&self) -> CacheResult<ExpirySweep> {
        self.with_disk(|disk| disk.remove_expired()).await?
    }

    /// Extended data stored beside a key
    pub async fn extended_data(&self, key: &str) -> Option<Vec<u8>> {
        let key = key.to_string();
        self.with_disk(move |disk| disk.read_extended(&key))
            .await
            .ok()
            .flatten()
    }

    /// Set or clear extended data for a key
    pub async fn set_extended_data(&self, key: &str, data: Option<Vec<u8>>) -> CacheResult<()> {
        let key = key.to_string();
        self.with_disk(move |disk| disk.write_extended(&key, data.as_deref()))
            .await?
    }

    pub async fn total_disk_size(&self) -> u64 {
        self.with_disk(|disk| disk.total_size()).await.unwrap_or(0)
    }

    pub async fn total_disk_count(&self) -> usize {
        self.with_disk(|disk| disk.total_count()).await.unwrap_or(0)
    }

    /// Move the disk tier to a new directory, merging into it if it exists
    pub async fn move_cache_directory(&self, destination: impl AsRef<Path>) -> CacheResult<()> {
        let destination = destination.as_ref().to_path_buf();
        let root = self.root.clone();
        self.with_disk(move |disk| {
            disk.move_cache_directory(destination)?;
            *root.write() = disk.root().to_path_buf();
            Ok(())
        })
        .await?
    }

    /// Drop the strong memory tier; live images stay reachable through weak refs
    pub fn handle_memory_warning(&self) {
        self.memory.handle_memory_warning();
    }

    /// Snapshot of both tiers
    pub async fn stats(&self) -> CacheStats {
        let (cache_root, disk_file_count, disk_size) = self
            .with_disk(|disk| {
                (
                    disk.root().to_path_buf(),
                    disk.total_count(),
                    disk.total_size(),
                )
            })
            .await
            .unwrap_or_else(|_| (self.disk_root(), 0, 0));

        CacheStats {
            namespace: self.namespace.clone(),
            cache_root,
            memory: self.memory.stats(),
            disk_file_count,
            disk_size,
            max_disk_size: self.config.max_disk_size,
        }
    }
}

#[async_trait]
impl ImageCacheProvider for CacheEngine {
    async fn query(
        &self,
        key: &str,
        options: &CacheQueryOptions,
        cache_type: CacheType,
    ) -> CacheQueryOutcome {
        CacheEngine::query(self, key, options, cache_type).await
    }

    async fn store(
        &self,
        image: Option<Arc<Image>>,
        data: Option<Bytes>,
        key: &str,
        cache_type: CacheType,
    ) -> CacheResult<()> {
        CacheEngine::store(self, image, data, key, cache_type).await
    }

    async fn remove(&self, key: &str, cache_type: CacheType) -> CacheResult<()> {
        CacheEngine::remove(self, key, cache_type).await
    }

    async fn contains(&self, key: &str, cache_type: CacheType) -> CacheType {
        CacheEngine::contains(self, key, cache_type).await
    }

    async fn clear(&self, cache_type: CacheType) -> CacheResult<()> {
        CacheEngine::clear(self, cache_type).await
    }

    fn query_memory(&self, key: &str) -> Option<Arc<Image>> {
        CacheEngine::query_memory(self, key)
    }

    fn sync_weak_cache(&self) {
        self.memory.sync_weak_cache();
    }
}
