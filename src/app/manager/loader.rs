//! Request manager: cache lookup, download, decode, transform, and store
//!
//! Each `load` runs as its own task. Loads are independent of each other;
//! concurrent loads of the same URL share a network operation through the
//! download coordinator, not through this layer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use url::Url;

use crate::app::cache::{CacheQueryOptions, CacheSerializer, CacheType, ImageCacheProvider};
use crate::app::downloader::{
    parse_download_url, BlacklistPolicy, DownloadCoordinator, DownloadEvent, DownloaderOptions,
    FailedUrls, FetchContext,
};
use crate::app::image::{Image, ImageCoder, StandardCoder};
use crate::errors::{DownloadError, ImageError, ImageResult};

use super::key::{cache_key_for_url, thumbnailed_cache_key, transformed_cache_key, CacheKeyFilter};
use super::operation::{CombinedOperation, LoadEmitter, LoadEvent, LoadedImage, OperationControl};
use super::options::{ImageOptions, LoadContext};
use super::transformer::ImageTransformer;

/// Rewrites options and context for every load
pub trait OptionsProcessor: Send + Sync {
    fn process(
        &self,
        url: &Url,
        options: ImageOptions,
        context: LoadContext,
    ) -> (ImageOptions, LoadContext);
}

impl<F> OptionsProcessor for F
where
    F: Fn(&Url, ImageOptions, LoadContext) -> (ImageOptions, LoadContext) + Send + Sync,
{
    fn process(
        &self,
        url: &Url,
        options: ImageOptions,
        context: LoadContext,
    ) -> (ImageOptions, LoadContext) {
        self(url, options, context)
    }
}

#[derive(Clone)]
struct ManagerHooks {
    coder: Arc<dyn ImageCoder>,
    transformer: Option<Arc<dyn ImageTransformer>>,
    cache_key_filter: Option<Arc<dyn CacheKeyFilter>>,
    cache_serializer: Option<Arc<dyn CacheSerializer>>,
    options_processor: Option<Arc<dyn OptionsProcessor>>,
}

struct LoadJob {
    url: Url,
    options: ImageOptions,
    context: LoadContext,
    /// Key of the delivered image, including thumbnail and transformer qualifiers
    key: String,
    /// Key of the untransformed bytes
    original_key: String,
}

impl LoadJob {
    fn is_derived(&self) -> bool {
        self.key != self.original_key
    }

    fn loaded(&self, image: Arc<Image>, data: Option<Bytes>, cache_type: CacheType) -> LoadedImage {
        LoadedImage {
            image: Some(image),
            data,
            cache_type,
            url: self.url.to_string(),
            finished: true,
        }
    }
}

struct ManagerInner {
    cache: Arc<dyn ImageCacheProvider>,
    coordinator: Arc<DownloadCoordinator>,
    failed_urls: Arc<FailedUrls>,
    hooks: RwLock<ManagerHooks>,
    running: Mutex<HashMap<u64, Arc<OperationControl>>>,
    next_id: AtomicU64,
}

/// Registration of a load in the running set
///
/// Owned by the load task, so the entry goes away when the task completes
/// or is aborted, including an abort before its first poll.
struct RunningEntry {
    inner: Arc<ManagerInner>,
    id: u64,
}

impl Drop for RunningEntry {
    fn drop(&mut self) {
        self.inner.running.lock().remove(&self.id);
    }
}

/// Loads images through the cache and the download coordinator
#[derive(Clone)]
pub struct RequestManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for RequestManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestManager")
            .field("running", &self.running_count())
            .field("failed_urls", &self.inner.failed_urls.len())
            .finish()
    }
}

impl RequestManager {
    /// Create a manager over a cache and a coordinator
    ///
    /// The manager shares the coordinator's failed URL set.
    pub fn new(cache: Arc<dyn ImageCacheProvider>, coordinator: Arc<DownloadCoordinator>) -> Self {
        let coder: Arc<dyn ImageCoder> = Arc::new(StandardCoder::new());
        coordinator.set_coder(coder.clone());
        Self {
            inner: Arc::new(ManagerInner {
                failed_urls: coordinator.failed_urls(),
                cache,
                coordinator,
                hooks: RwLock::new(ManagerHooks {
                    coder,
                    transformer: None,
                    cache_key_filter: None,
                    cache_serializer: None,
                    options_processor: None,
                }),
                running: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Replace the coder used for downloaded bytes and partial images
    pub fn with_coder(self, coder: Arc<dyn ImageCoder>) -> Self {
        self.inner.coordinator.set_coder(coder.clone());
        self.inner.hooks.write().coder = coder;
        self
    }

    pub fn with_options_processor(self, processor: Arc<dyn OptionsProcessor>) -> Self {
        self.inner.hooks.write().options_processor = Some(processor);
        self
    }

    pub fn cache(&self) -> &Arc<dyn ImageCacheProvider> {
        &self.inner.cache
    }

    pub fn coordinator(&self) -> &Arc<DownloadCoordinator> {
        &self.inner.coordinator
    }

    /// Default transformer for loads whose context sets none
    pub fn set_transformer(&self, transformer: Option<Arc<dyn ImageTransformer>>) {
        self.inner.hooks.write().transformer = transformer;
    }

    pub fn set_cache_key_filter(&self, filter: Option<Arc<dyn CacheKeyFilter>>) {
        self.inner.hooks.write().cache_key_filter = filter;
    }

    pub fn set_cache_serializer(&self, serializer: Option<Arc<dyn CacheSerializer>>) {
        self.inner.hooks.write().cache_serializer = serializer;
    }

    /// Policy deciding which failures blacklist their URL
    pub fn set_blacklist_policy(&self, policy: Arc<dyn BlacklistPolicy>) {
        self.inner.coordinator.set_blacklist_policy(policy);
    }

    /// Cache key a load of `url` with `context` would use
    pub fn cache_key_for_url(&self, url: &str, context: &LoadContext) -> Option<String> {
        let url = parse_download_url(url).ok()?;
        let context = self.inner.with_defaults(context.clone());
        Some(resolve_keys(&url, &context).0)
    }

    /// Load an image
    ///
    /// Invalid and blacklisted URLs fail before any cache or network
    /// access; the error is the single `Finished` event of the returned
    /// operation.
    pub fn load(
        &self,
        url: Option<&str>,
        options: ImageOptions,
        context: LoadContext,
    ) -> CombinedOperation {
        let raw = url.unwrap_or_default();
        let url = match url.map(parse_download_url) {
            Some(Ok(url)) => url,
            _ => {
                debug!("Rejecting invalid image URL '{}'", raw);
                return CombinedOperation::failed(ImageError::InvalidUrl {
                    url: raw.to_string(),
                });
            }
        };

        let processor = self.inner.hooks.read().options_processor.clone();
        let (options, context) = match processor {
            Some(processor) => processor.process(&url, options, context),
            None => (options, context),
        };

        if !options.contains(ImageOptions::RETRY_FAILED) && self.inner.failed_urls.contains(url.as_str()) {
            debug!("Rejecting blacklisted image URL {}", url);
            return CombinedOperation::failed(ImageError::Blacklisted {
                url: url.to_string(),
            });
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                return CombinedOperation::failed(ImageError::Download(
                    DownloadError::InvalidOperation {
                        reason: "load must be called inside a Tokio runtime".to_string(),
                    },
                ));
            }
        };

        self.inner.cache.sync_weak_cache();

        let context = self.inner.with_defaults(context);
        let (key, original_key) = resolve_keys(&url, &context);
        let job = LoadJob {
            url,
            options,
            context,
            key,
            original_key,
        };

        let (sender, events) = tokio::sync::mpsc::unbounded_channel();
        let control = OperationControl::new();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.running.lock().insert(id, control.clone());

        let inner = Arc::clone(&self.inner);
        let entry = RunningEntry {
            inner: Arc::clone(&self.inner),
            id,
        };
        let emitter = LoadEmitter::new(sender, control.clone());
        let task = runtime.spawn(async move {
            let _entry = entry;
            let result = inner.execute(&job, &emitter).await;
            if let Err(e) = &result {
                debug!("Load of {} failed: {}", job.url, e);
            }
            emitter.finish(result);
        });
        control.set_task(task);

        CombinedOperation::new(events, control)
    }

    /// Load an image and wait for the final result
    pub async fn load_image(
        &self,
        url: &str,
        options: ImageOptions,
        context: LoadContext,
    ) -> ImageResult<LoadedImage> {
        self.load(Some(url), options, context).wait().await
    }

    /// Cancel every running load
    pub fn cancel_all(&self) {
        let controls: Vec<_> = self.inner.running.lock().drain().map(|(_, c)| c).collect();
        if !controls.is_empty() {
            info!("Cancelling {} image loads", controls.len());
        }
        for control in controls {
            control.cancel();
        }
    }

    /// Whether any load is still running
    pub fn is_running(&self) -> bool {
        self.running_count() > 0
    }

    pub fn running_count(&self) -> usize {
        let mut running = self.inner.running.lock();
        running.retain(|_, control| !control.is_cancelled() && !control.is_finished());
        running.len()
    }

    pub fn remove_failed_url(&self, url: &str) -> bool {
        match parse_download_url(url) {
            Ok(parsed) => self.inner.failed_urls.remove(parsed.as_str()),
            Err(_) => self.inner.failed_urls.remove(url),
        }
    }

    pub fn remove_all_failed_urls(&self) {
        self.inner.failed_urls.clear();
    }

    pub fn is_failed_url(&self, url: &str) -> bool {
        match parse_download_url(url) {
            Ok(parsed) => self.inner.failed_urls.contains(parsed.as_str()),
            Err(_) => self.inner.failed_urls.contains(url),
        }
    }
}

/// Final key and original key for a URL under a resolved context
fn resolve_keys(url: &Url, context: &LoadContext) -> (String, String) {
    let original = cache_key_for_url(url, context.cache_key_filter.as_deref());
    let mut key = original.clone();
    if let Some(size) = context.thumbnail_pixel_size {
        key = thumbnailed_cache_key(&key, size, context.preserve_aspect_ratio);
    }
    if let Some(transformer) = &context.transformer {
        key = transformed_cache_key(&key, &transformer.transformer_key());
    }
    (key, original)
}

impl ManagerInner {
    fn with_defaults(&self, mut context: LoadContext) -> LoadContext {
        let hooks = self.hooks.read();
        if context.transformer.is_none() {
            context.transformer = hooks.transformer.clone();
        }
        if context.cache_key_filter.is_none() {
            context.cache_key_filter = hooks.cache_key_filter.clone();
        }
        if context.cache_serializer.is_none() {
            context.cache_serializer = hooks.cache_serializer.clone();
        }
        context
    }

    fn coder(&self) -> Arc<dyn ImageCoder> {
        self.hooks.read().coder.clone()
    }

    async fn execute(&self, job: &LoadJob, emitter: &LoadEmitter) -> ImageResult<LoadedImage> {
        let mut cached = None;
        if !job.options.contains(ImageOptions::FROM_LOADER_ONLY) {
            if let Some(hit) = self.query_cache(job).await {
                if !job.options.contains(ImageOptions::REFRESH_CACHED) {
                    debug!("Cache hit for {} ({:?})", job.key, hit.cache_type);
                    return Ok(hit);
                }
                emitter.emit(LoadEvent::Intermediate(LoadedImage {
                    finished: false,
                    ..hit.clone()
                }));
                cached = Some(hit);
            }
        }

        if job.options.contains(ImageOptions::FROM_CACHE_ONLY) {
            return cached.ok_or_else(|| ImageError::NotCached {
                key: job.key.clone(),
            });
        }

        self.download(job, cached, emitter).await
    }

    /// Query the final key, then fall back to the original bytes
    async fn query_cache(&self, job: &LoadJob) -> Option<LoadedImage> {
        let context = &job.context;
        if context.query_cache_type != CacheType::None {
            let query = context.query_options(&job.key, job.options);
            let outcome = self.cache.query(&job.key, &query, context.query_cache_type).await;
            if let Some(image) = outcome.image {
                return Some(job.loaded(image, outcome.data, outcome.cache_type));
            }
        }

        if !job.is_derived() || context.original_query_cache_type == CacheType::None {
            return None;
        }

        let query = CacheQueryOptions {
            avoid_decode: true,
            ..context.query_options(&job.original_key, job.options)
        };
        let outcome = self
            .cache
            .query(&job.original_key, &query, context.original_query_cache_type)
            .await;
        let source = outcome.cache_type;
        let image = match (outcome.image, outcome.data.clone()) {
            (Some(image), _) if context.thumbnail_pixel_size.is_none() => image,
            (Some(image), None) => self.thumbnail(job, image).await?,
            (_, Some(data)) => self.decode(job, data).await.ok()?,
            (None, None) => return None,
        };

        debug!("Original cache hit for {}, deriving {}", job.original_key, job.key);
        let image = self.transform(job, image).await;
        self.persist(job, image.clone(), outcome.data.clone(), false).await;
        Some(job.loaded(image, outcome.data, source))
    }

    async fn download(
        &self,
        job: &LoadJob,
        cached: Option<LoadedImage>,
        emitter: &LoadEmitter,
    ) -> ImageResult<LoadedImage> {
        let mut options = job.options.to_downloader_options();
        if cached.is_some() {
            options.remove(DownloaderOptions::PROGRESSIVE_LOAD);
            options.insert(DownloaderOptions::IGNORE_CACHED_RESPONSE);
        }
        let context = FetchContext {
            retry_failed: job.options.contains(ImageOptions::RETRY_FAILED),
            decode: job.context.decode_options(&job.key, job.options),
            request_modifier: job.context.request_modifier.clone(),
            response_modifier: job.context.response_modifier.clone(),
            decryptor: job.context.decryptor.clone(),
        };

        let mut handle = self.coordinator.fetch(job.url.as_str(), options, context);
        if !emitter.control().set_download(handle.token.clone()) {
            return Err(ImageError::Cancelled);
        }

        let result = loop {
            match handle.events.recv().await {
                Some(DownloadEvent::Progress(progress)) => {
                    let partial = progress.partial_image.clone().map(|image| LoadedImage {
                        image: Some(image),
                        data: progress.partial_data.clone(),
                        cache_type: CacheType::None,
                        url: job.url.to_string(),
                        finished: false,
                    });
                    emitter.emit(LoadEvent::Progress(progress));
                    if let Some(partial) = partial {
                        emitter.emit(LoadEvent::Intermediate(partial));
                    }
                }
                Some(DownloadEvent::Finished(result)) => break result,
                None => break Err(DownloadError::Cancelled),
            }
        };
        emitter.control().clear_download();

        let downloaded = match result {
            Ok(downloaded) => downloaded,
            Err(DownloadError::NotModified) => {
                return match cached {
                    Some(hit) => {
                        debug!("Cached copy of {} is still valid", job.url);
                        Ok(LoadedImage {
                            finished: true,
                            ..hit
                        })
                    }
                    None => Err(ImageError::CacheNotModified),
                };
            }
            Err(e) => return Err(e.into()),
        };

        let data = downloaded.data;
        let image = match self.decode(job, data.clone()).await {
            Ok(image) => image,
            Err(reason) => {
                self.record_failure(job, &DownloadError::BadImageData {
                    reason: reason.clone(),
                });
                return Err(ImageError::BadImageData {
                    url: job.url.to_string(),
                    reason,
                });
            }
        };

        let image = self.transform(job, image).await;
        self.persist(job, image.clone(), Some(data.clone()), true).await;

        Ok(job.loaded(image, Some(data), CacheType::None))
    }

    fn record_failure(&self, job: &LoadJob, error: &DownloadError) {
        if job.options.contains(ImageOptions::RETRY_FAILED) {
            return;
        }
        let policy = self.coordinator.blacklist_policy();
        if policy.should_block(job.url.as_str(), error) {
            self.failed_urls.insert(job.url.as_str());
        }
    }

    async fn decode(&self, job: &LoadJob, data: Bytes) -> Result<Arc<Image>, String> {
        let coder = self.coder();
        let options = job.context.decode_options(&job.key, job.options);
        match tokio::task::spawn_blocking(move || coder.decode(&data, &options)).await {
            Ok(Some(image)) => Ok(Arc::new(image)),
            Ok(None) => Err("Image data could not be decoded".to_string()),
            Err(e) => Err(format!("Decode task failed: {e}")),
        }
    }

    /// Shrink a full-size cached original to the requested thumbnail size
    async fn thumbnail(&self, job: &LoadJob, image: Arc<Image>) -> Option<Arc<Image>> {
        let Some(size) = job.context.thumbnail_pixel_size else {
            return Some(image);
        };
        let preserve_aspect_ratio = job.context.preserve_aspect_ratio;
        match tokio::task::spawn_blocking(move || image.fit_thumbnail(size, preserve_aspect_ratio))
            .await
        {
            Ok(thumbnail) => Some(Arc::new(thumbnail)),
            Err(e) => {
                warn!("Thumbnail task for {} failed: {}", job.key, e);
                None
            }
        }
    }

    /// Apply the transformer, keeping the input when it declines
    async fn transform(&self, job: &LoadJob, image: Arc<Image>) -> Arc<Image> {
        let Some(transformer) = job.context.transformer.clone() else {
            return image;
        };
        let key = job.key.clone();
        let input = image.clone();
        match tokio::task::spawn_blocking(move || transformer.transform(&input, &key)).await {
            Ok(Some(transformed)) => Arc::new(transformed),
            Ok(None) => image,
            Err(e) => {
                warn!("Transformer task for {} failed: {}", job.key, e);
                image
            }
        }
    }

    /// Store the delivered image, and the original bytes when derived
    ///
    /// Runs in the background unless `WAIT_STORE_CACHE` is set.
    async fn persist(
        &self,
        job: &LoadJob,
        image: Arc<Image>,
        original: Option<Bytes>,
        store_original: bool,
    ) {
        let cache = self.cache.clone();
        let serializer = job.context.cache_serializer.clone();
        let key = job.key.clone();
        let original_key = job.original_key.clone();
        let derived = job.is_derived();
        let store_type = job.context.store_cache_type;
        let original_store_type = job.context.original_store_cache_type;

        let work = async move {
            if derived && store_original && original_store_type != CacheType::None {
                if let Some(data) = original.clone() {
                    if let Err(e) = cache
                        .store(None, Some(data), &original_key, original_store_type)
                        .await
                    {
                        warn!("Failed to cache original bytes for {}: {}", original_key, e);
                    }
                }
            }

            if store_type == CacheType::None {
                return;
            }
            let data = match serializer {
                Some(serializer) => {
                    serialize(serializer, image.clone(), original.clone(), key.clone()).await
                }
                None if derived => None,
                None => original,
            };
            if let Err(e) = cache.store(Some(image), data, &key, store_type).await {
                warn!("Failed to cache image for {}: {}", key, e);
            }
        };

        if job.options.contains(ImageOptions::WAIT_STORE_CACHE) {
            work.await;
        } else {
            tokio::spawn(work);
        }
    }
}

async fn serialize(
    serializer: Arc<dyn CacheSerializer>,
    image: Arc<Image>,
    original: Option<Bytes>,
    key: String,
) -> Option<Bytes> {
    tokio::task::spawn_blocking(move || serializer.serialize(&image, original.as_deref(), &key))
        .await
        .ok()
        .flatten()
        .map(Bytes::from)
}
