//! Two-tier image cache
//!
//! Decoded images live in a cost-bounded LRU memory tier backed by a weak
//! reference table; encoded bytes live in a namespaced directory on disk.
//!
//! # Key Features
//!
//! - **LRU memory tier**: evicts until both the cost and count limits hold
//! - **Weak table**: images still referenced by callers survive memory warnings
//! - **Atomic writes**: payloads are written through a temp file and renamed
//! - **Expiry sweeps**: age-based removal followed by size trimming to half the limit
//! - **Composition**: several engines can be combined with [`CachesManager`]
//!
//! # Module Organization
//!
//! - [`config`] - Configuration types and defaults
//! - [`memory`] - In-memory LRU store with weak-reference fallback
//! - [`disk`] - Blocking file store with expiry and directory migration
//! - [`path`] - Key to file name mapping
//! - [`provider`] - Cache scopes and the provider trait
//! - [`engine`] - Namespaced two-tier cache engine
//! - [`caches_manager`] - Priority-ordered composition of providers
//! - [`stats`] - Cache statistics and disk usage reporting
//!
//! # Examples
//!
//! ```rust,no_run
//! use image_fetcher::app::cache::{CacheEngine, CacheQueryOptions, CacheType};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = CacheEngine::with_defaults("thumbnails", None)?;
//!
//! let outcome = engine
//!     .query("https://example.com/a.png", &CacheQueryOptions::default(), CacheType::All)
//!     .await;
//! match outcome.image {
//!     Some(image) => println!("cached {}x{} from {:?}", image.width(), image.height(), outcome.cache_type),
//!     None => println!("not cached"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod caches_manager;
pub mod config;
pub mod disk;
pub mod engine;
pub mod memory;
pub mod path;
pub mod provider;
pub mod stats;

// Re-export main public API
pub use caches_manager::{CachesManager, CachesManagerOperationPolicy};
pub use config::{CacheConfig, DiskCacheExpireType, DiskWriteMode};
pub use disk::{DiskCache, ExpirySweep};
pub use engine::{default_cache_directory, CacheEngine};
pub use memory::{CacheCost, MemoryCache, MemoryCacheStats};
pub use path::PathGenerator;
pub use provider::{
    CacheQueryOptions, CacheQueryOutcome, CacheSerializer, CacheType, ImageCacheProvider,
};
pub use stats::{format_bytes, CacheStats};
