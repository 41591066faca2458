//! Image request manager
//!
//! Ties the cache and the download coordinator together: a load checks the
//! cache, falls back to the network, decodes and transforms the result, and
//! stores it for next time.
//!
//! # Module Organization
//!
//! - [`options`] - Load options and per-load context
//! - [`key`] - Cache key derivation
//! - [`transformer`] - Post-decode transformers
//! - [`operation`] - Cancelable load handles and events
//! - [`loader`] - The request manager
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use image_fetcher::app::cache::CacheEngine;
//! use image_fetcher::app::downloader::{DownloadCoordinator, DownloaderConfig};
//! use image_fetcher::app::manager::{ImageOptions, LoadContext, RequestManager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = Arc::new(CacheEngine::with_defaults("default", None)?);
//! let coordinator = Arc::new(DownloadCoordinator::with_http(DownloaderConfig::default())?);
//! let manager = RequestManager::new(cache, coordinator);
//!
//! let loaded = manager
//!     .load_image(
//!         "https://example.com/image.png",
//!         ImageOptions::empty(),
//!         LoadContext::default(),
//!     )
//!     .await?;
//! println!("{:?} from {:?}", loaded.image.map(|i| i.dimensions()), loaded.cache_type);
//! # Ok(())
//! # }
//! ```

pub mod loader;
pub mod key;
pub mod operation;
pub mod options;
pub mod transformer;

pub use loader::{OptionsProcessor, RequestManager};
pub use key::{cache_key_for_url, thumbnailed_cache_key, transformed_cache_key, CacheKeyFilter};
pub use operation::{CombinedOperation, LoadCancelHandle, LoadEvent, LoadedImage};
pub use options::{ImageOptions, LoadContext};
pub use transformer::{GrayscaleTransformer, ImageTransformer, ResizeTransformer, TransformerPipeline};
