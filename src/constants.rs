//! Application constants for Image Fetcher
//!
//! This module centralizes the constants used throughout the crate,
//! organized by functional domain for maintainability and clarity.

use std::time::Duration;

/// HTTP transport configuration constants
pub mod http {
    use super::Duration;

    /// Default user agent for all HTTP requests
    pub const USER_AGENT: &str = concat!("image_fetcher/", env!("CARGO_PKG_VERSION"));

    /// Default `Accept` header sent with every image request
    pub const ACCEPT_HEADER: &str = "image/*,*/*;q=0.8";

    /// Default per-request network timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

    /// Connection establishment timeout
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Connection pool idle timeout
    pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

    /// Maximum idle connections per host in pool
    pub const POOL_MAX_PER_HOST: usize = 8;

    /// First status code accepted as a successful response
    pub const ACCEPTABLE_STATUS_START: u16 = 200;

    /// First status code past the accepted range
    pub const ACCEPTABLE_STATUS_END: u16 = 400;

    /// Status code signalling that a cached copy is still valid
    pub const NOT_MODIFIED: u16 = 304;
}

/// Memory and disk cache defaults
pub mod cache {
    use super::Duration;

    /// Default namespace for the shared cache instance
    pub const DEFAULT_NAMESPACE: &str = "default";

    /// Directory name used below the platform cache directory
    pub const APP_DIR_NAME: &str = "image-fetcher";

    /// Default maximum disk age (one week)
    pub const DEFAULT_MAX_DISK_AGE: Duration = Duration::from_secs(60 * 60 * 24 * 7);

    /// Directory inside the cache root holding extended-data sidecars
    pub const EXTENDED_DATA_DIR: &str = ".extended";

    /// Longest path extension kept on hashed file names
    pub const MAX_FILE_EXTENSION_LEN: usize = 8;

    /// Default JPEG quality used when re-encoding for disk storage
    pub const DEFAULT_ENCODE_QUALITY: u8 = 90;
}

/// Image decoding limits
pub mod decoding {
    /// Decoded byte budget above which `SCALE_DOWN_LARGE_IMAGES` downsamples
    pub const SCALE_DOWN_LIMIT_BYTES: usize = 60 * 1024 * 1024;

    /// Bytes per pixel assumed for cost accounting of decoded images
    pub const BYTES_PER_PIXEL: usize = 4;
}

/// Download coordinator defaults
pub mod downloader {
    /// Default maximum number of concurrent network operations
    pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 6;

    /// Default minimum progress fraction between progress notifications
    pub const DEFAULT_MINIMUM_PROGRESS_INTERVAL: f64 = 0.0;

    /// Initial capacity of the per-operation receive buffer
    pub const INITIAL_BUFFER_CAPACITY: usize = 64 * 1024;

    /// Growth factor of the body between progressive partial-data snapshots
    pub const PROGRESSIVE_SNAPSHOT_GROWTH: usize = 2;

    /// Number of ended operations whose terminal state stays queryable
    pub const SETTLED_STATE_CAPACITY: usize = 256;
}

/// Prefetch coordinator defaults
pub mod prefetch {
    /// Default number of URLs prefetched at the same time
    pub const DEFAULT_MAX_CONCURRENT_PREFETCH: usize = 3;
}

/// Numeric error codes exposed by `DownloadError::code` and `ImageError::code`
pub mod error_codes {
    pub const INVALID_URL: i32 = 1000;
    pub const BAD_IMAGE_DATA: i32 = 1001;
    pub const CACHE_NOT_MODIFIED: i32 = 1002;
    pub const BLACKLISTED: i32 = 1003;
    pub const INVALID_DOWNLOAD_OPERATION: i32 = 2000;
    pub const INVALID_DOWNLOAD_STATUS_CODE: i32 = 2001;
    pub const CANCELLED: i32 = 2002;
    pub const INVALID_DOWNLOAD_RESPONSE: i32 = 2003;
    pub const INVALID_DOWNLOAD_CONTENT_TYPE: i32 = 2004;
}

// Re-export commonly used constants at module level for convenience
pub use cache::DEFAULT_MAX_DISK_AGE;
pub use downloader::DEFAULT_MAX_CONCURRENT_DOWNLOADS;
pub use http::{DEFAULT_TIMEOUT, USER_AGENT};
pub use prefetch::DEFAULT_MAX_CONCURRENT_PREFETCH;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_defaults() {
        assert_eq!(http::DEFAULT_TIMEOUT, Duration::from_secs(15));
        assert!(http::ACCEPTABLE_STATUS_START < http::ACCEPTABLE_STATUS_END);
        assert!(USER_AGENT.starts_with("image_fetcher/"));
    }

    #[test]
    fn test_concurrency_defaults() {
        assert_eq!(DEFAULT_MAX_CONCURRENT_DOWNLOADS, 6);
        assert_eq!(DEFAULT_MAX_CONCURRENT_PREFETCH, 3);
    }

    #[test]
    fn test_error_code_ranges() {
        // Cache/manager errors live in the 1000 range, downloader errors in 2000
        assert!(error_codes::BLACKLISTED < 2000);
        assert!(error_codes::INVALID_DOWNLOAD_CONTENT_TYPE >= 2000);
        assert_eq!(DEFAULT_MAX_DISK_AGE.as_secs(), 604_800);
    }
}
