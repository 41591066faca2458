//! Prelude module for Image Fetcher
//!
//! This module re-exports the most commonly used items from the library,
//! providing a convenient way to import everything needed for typical usage
//! with a single `use image_fetcher::prelude::*;` statement.
//!
//! # Usage
//!
//! ```rust,no_run
//! use image_fetcher::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let cache = Arc::new(CacheEngine::with_defaults("default", None)?);
//!     let coordinator = Arc::new(DownloadCoordinator::with_http(DownloaderConfig::default())?);
//!     let manager = RequestManager::new(cache, coordinator);
//!
//!     let loaded = manager
//!         .load_image("https://example.com/a.png", ImageOptions::empty(), LoadContext::default())
//!         .await?;
//!     println!("{:?}", loaded.cache_type);
//!     Ok(())
//! }
//! ```

// Core result types
pub use crate::errors::{AppError, CacheError, DownloadError, ImageError, Result};

// Pipeline components
pub use crate::app::{
    CacheConfig, CacheEngine, CacheType, CachesManager, CombinedOperation, DownloadCoordinator,
    DownloaderConfig, DownloaderOptions, Image, ImageCacheProvider, ImageOptions, LoadContext,
    LoadEvent, LoadedImage, PrefetchConfig, PrefetchCoordinator, PrefetchStats, RequestManager,
};

// Configuration file surface
pub use crate::config::AppConfig;

// Commonly used constants
pub use crate::constants::{DEFAULT_MAX_CONCURRENT_DOWNLOADS, DEFAULT_TIMEOUT, USER_AGENT};

// Standard library re-exports that are commonly needed
pub use std::path::{Path, PathBuf};
pub use std::sync::Arc;

pub use tokio;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prelude_imports() {
        let _cache_config = CacheConfig::default();
        let _downloader_config = DownloaderConfig::default();
        let _prefetch_config = PrefetchConfig::default();
        let _app_config = AppConfig::default();

        assert_eq!(DEFAULT_MAX_CONCURRENT_DOWNLOADS, 6);
        assert_eq!(DEFAULT_TIMEOUT.as_secs(), 15);
    }

    #[tokio::test]
    async fn test_prelude_integration_pattern() {
        use tempfile::TempDir;

        let temp_dir = TempDir::new().unwrap();
        let cache = Arc::new(
            CacheEngine::with_defaults("prelude", Some(temp_dir.path().to_path_buf())).unwrap(),
        );
        let coordinator = Arc::new(DownloadCoordinator::with_http(DownloaderConfig::default()).unwrap());
        let manager = RequestManager::new(cache.clone(), coordinator);

        assert!(!manager.is_running());
        assert_eq!(cache.total_disk_count().await, 0);
    }
}
