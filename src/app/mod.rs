//! Core image pipeline for Image Fetcher
//!
//! This module contains the pipeline components: the image codec layer,
//! the two-tier cache, the de-duplicating downloader, the request manager
//! that ties them together, and the batch prefetcher.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use image_fetcher::app::{
//!     CacheEngine, DownloadCoordinator, DownloaderConfig, ImageOptions, LoadContext,
//!     PrefetchConfig, PrefetchCoordinator, RequestManager,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = Arc::new(CacheEngine::with_defaults("default", None)?);
//! let coordinator = Arc::new(DownloadCoordinator::with_http(DownloaderConfig::default())?);
//! let manager = RequestManager::new(cache, coordinator);
//!
//! // Warm the cache, then load from it
//! let prefetcher = PrefetchCoordinator::new(manager.clone(), PrefetchConfig::default());
//! let stats = prefetcher
//!     .prefetch_urls(["https://example.com/a.png", "https://example.com/b.png"], None)
//!     .wait()
//!     .await;
//! println!("{}", stats);
//!
//! let loaded = manager
//!     .load_image("https://example.com/a.png", ImageOptions::empty(), LoadContext::default())
//!     .await?;
//! println!("served from {:?}", loaded.cache_type);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod downloader;
pub mod image;
pub mod manager;
pub mod prefetch;

// Re-export main public API
pub use self::image::{DecodeOptions, Image, ImageCoder, ImageFormat, StandardCoder};
pub use cache::{
    CacheConfig, CacheEngine, CacheQueryOptions, CacheStats, CacheType, CachesManager,
    ImageCacheProvider,
};
pub use downloader::{
    ClientConfig, DownloadCoordinator, DownloadHandle, DownloadToken, DownloaderConfig,
    DownloaderOptions, ExecutionOrder, FetchContext, HttpTransport, Transport,
};
pub use manager::{
    CombinedOperation, ImageOptions, ImageTransformer, LoadContext, LoadEvent, LoadedImage,
    RequestManager,
};
pub use prefetch::{
    PrefetchConfig, PrefetchCoordinator, PrefetchEvent, PrefetchStats, PrefetchToken,
};
