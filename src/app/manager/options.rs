//! Load options and per-load context

use std::sync::Arc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::app::cache::{CacheQueryOptions, CacheSerializer, CacheType};
use crate::app::downloader::{
    DataDecryptor, DownloaderOptions, RequestModifier, ResponseModifier,
};
use crate::app::image::{scale_factor_for_key, DecodeOptions};

use super::key::CacheKeyFilter;
use super::transformer::ImageTransformer;

bitflags! {
    /// Options accepted by `RequestManager::load`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ImageOptions: u32 {
        /// Try URLs that previously failed permanently
        const RETRY_FAILED = 1 << 0;
        const LOW_PRIORITY = 1 << 1;
        /// Deliver partial images while downloading
        const PROGRESSIVE_LOAD = 1 << 2;
        /// Deliver the cached image, then revalidate it over the network
        const REFRESH_CACHED = 1 << 3;
        const CONTINUE_IN_BACKGROUND = 1 << 4;
        const HANDLE_COOKIES = 1 << 5;
        const ALLOW_INVALID_SSL_CERTIFICATES = 1 << 6;
        const HIGH_PRIORITY = 1 << 7;
        const DELAY_PLACEHOLDER = 1 << 8;
        const TRANSFORM_ANIMATED_IMAGE = 1 << 9;
        const AVOID_AUTO_SET_IMAGE = 1 << 10;
        const SCALE_DOWN_LARGE_IMAGES = 1 << 11;
        /// Also read disk bytes on a memory hit
        const QUERY_MEMORY_DATA = 1 << 12;
        const QUERY_MEMORY_DATA_SYNC = 1 << 13;
        const QUERY_DISK_DATA_SYNC = 1 << 14;
        /// Never touch the network
        const FROM_CACHE_ONLY = 1 << 15;
        /// Never query the cache
        const FROM_LOADER_ONLY = 1 << 16;
        const FORCE_TRANSITION = 1 << 17;
        const AVOID_DECODE_IMAGE = 1 << 18;
        const DECODE_FIRST_FRAME_ONLY = 1 << 19;
        const PRELOAD_ALL_FRAMES = 1 << 20;
        const MATCH_ANIMATED_IMAGE_CLASS = 1 << 21;
        /// Finish only after the cache store has completed
        const WAIT_STORE_CACHE = 1 << 22;
    }
}

impl ImageOptions {
    /// Downloader options carried over from load options
    pub fn to_downloader_options(&self) -> DownloaderOptions {
        let pairs = [
            (Self::LOW_PRIORITY, DownloaderOptions::LOW_PRIORITY),
            (Self::HIGH_PRIORITY, DownloaderOptions::HIGH_PRIORITY),
            (Self::PROGRESSIVE_LOAD, DownloaderOptions::PROGRESSIVE_LOAD),
            (Self::CONTINUE_IN_BACKGROUND, DownloaderOptions::CONTINUE_IN_BACKGROUND),
            (Self::HANDLE_COOKIES, DownloaderOptions::HANDLE_COOKIES),
            (
                Self::ALLOW_INVALID_SSL_CERTIFICATES,
                DownloaderOptions::ALLOW_INVALID_SSL_CERTIFICATES,
            ),
            (Self::SCALE_DOWN_LARGE_IMAGES, DownloaderOptions::SCALE_DOWN_LARGE_IMAGES),
            (Self::AVOID_DECODE_IMAGE, DownloaderOptions::AVOID_DECODE_IMAGE),
            (Self::DECODE_FIRST_FRAME_ONLY, DownloaderOptions::DECODE_FIRST_FRAME_ONLY),
            (Self::PRELOAD_ALL_FRAMES, DownloaderOptions::PRELOAD_ALL_FRAMES),
        ];

        pairs
            .iter()
            .filter(|(option, _)| self.contains(*option))
            .fold(DownloaderOptions::empty(), |acc, (_, mapped)| acc | *mapped)
    }
}

/// Typed per-load settings
///
/// Unset hooks fall back to the manager-wide ones.
#[derive(Clone)]
pub struct LoadContext {
    pub transformer: Option<Arc<dyn ImageTransformer>>,
    /// Display scale; derived from `@2x`/`@3x` in the key when unset
    pub scale_factor: Option<f32>,
    /// Decode to at most this pixel size
    pub thumbnail_pixel_size: Option<(u32, u32)>,
    pub preserve_aspect_ratio: bool,
    /// Scope queried for the final key
    pub query_cache_type: CacheType,
    /// Scope the final image is stored in
    pub store_cache_type: CacheType,
    /// Scope queried for the untransformed original
    pub original_query_cache_type: CacheType,
    /// Scope the untransformed original bytes are stored in
    pub original_store_cache_type: CacheType,
    pub request_modifier: Option<Arc<dyn RequestModifier>>,
    pub response_modifier: Option<Arc<dyn ResponseModifier>>,
    pub decryptor: Option<Arc<dyn DataDecryptor>>,
    pub cache_key_filter: Option<Arc<dyn CacheKeyFilter>>,
    pub cache_serializer: Option<Arc<dyn CacheSerializer>>,
}

impl Default for LoadContext {
    fn default() -> Self {
        Self {
            transformer: None,
            scale_factor: None,
            thumbnail_pixel_size: None,
            preserve_aspect_ratio: true,
            query_cache_type: CacheType::All,
            store_cache_type: CacheType::All,
            original_query_cache_type: CacheType::Disk,
            original_store_cache_type: CacheType::Disk,
            request_modifier: None,
            response_modifier: None,
            decryptor: None,
            cache_key_filter: None,
            cache_serializer: None,
        }
    }
}

impl std::fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadContext")
            .field(
                "transformer",
                &self.transformer.as_ref().map(|t| t.transformer_key()),
            )
            .field("scale_factor", &self.scale_factor)
            .field("thumbnail_pixel_size", &self.thumbnail_pixel_size)
            .field("preserve_aspect_ratio", &self.preserve_aspect_ratio)
            .field("query_cache_type", &self.query_cache_type)
            .field("store_cache_type", &self.store_cache_type)
            .field("original_query_cache_type", &self.original_query_cache_type)
            .field("original_store_cache_type", &self.original_store_cache_type)
            .finish_non_exhaustive()
    }
}

impl LoadContext {
    pub fn with_transformer(mut self, transformer: Arc<dyn ImageTransformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    pub fn with_thumbnail(mut self, width: u32, height: u32, preserve_aspect_ratio: bool) -> Self {
        self.thumbnail_pixel_size = Some((width, height));
        self.preserve_aspect_ratio = preserve_aspect_ratio;
        self
    }

    pub fn with_store_cache_type(mut self, cache_type: CacheType) -> Self {
        self.store_cache_type = cache_type;
        self
    }

    pub fn with_query_cache_type(mut self, cache_type: CacheType) -> Self {
        self.query_cache_type = cache_type;
        self
    }

    /// Decode parameters for a key under these options
    pub fn decode_options(&self, key: &str, options: ImageOptions) -> DecodeOptions {
        DecodeOptions {
            scale: self
                .scale_factor
                .unwrap_or_else(|| scale_factor_for_key(key)),
            thumbnail_pixel_size: self.thumbnail_pixel_size,
            preserve_aspect_ratio: self.preserve_aspect_ratio,
            first_frame_only: options.contains(ImageOptions::DECODE_FIRST_FRAME_ONLY),
            scale_down_large_images: options.contains(ImageOptions::SCALE_DOWN_LARGE_IMAGES),
        }
    }

    /// Cache query parameters for a key under these options
    pub fn query_options(&self, key: &str, options: ImageOptions) -> CacheQueryOptions {
        CacheQueryOptions {
            query_memory_data: options.contains(ImageOptions::QUERY_MEMORY_DATA),
            query_memory_data_sync: options.contains(ImageOptions::QUERY_MEMORY_DATA_SYNC),
            query_disk_data_sync: options.contains(ImageOptions::QUERY_DISK_DATA_SYNC),
            avoid_decode: false,
            decode: self.decode_options(key, options),
        }
    }
}
