//! Error types for Image Fetcher
//!
//! This module defines the error types for every component of the crate.
//! Download and load errors are `Clone` because a single network failure is
//! fanned out to every caller that shares the de-duplicated operation.

use std::path::PathBuf;

use thiserror::Error;

use crate::constants::error_codes;

/// Disk cache and cache engine errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// Cache directory not found or inaccessible
    #[error("Cache directory not accessible: {path}")]
    DirectoryNotAccessible { path: PathBuf },

    /// I/O error during a cache file operation
    #[error("Cache I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Empty cache key
    #[error("Cache key must not be empty")]
    InvalidKey,

    /// Atomic write could not be completed
    #[error("Atomic write failed for {path}")]
    AtomicWriteFailed { path: PathBuf },

    /// Image could not be serialized for disk storage
    #[error("Failed to encode image for key {key}")]
    EncodeFailed { key: String },

    /// Moving the cache directory failed
    #[error("Failed to move cache directory from {from} to {to}: {reason}")]
    MoveFailed {
        from: PathBuf,
        to: PathBuf,
        reason: String,
    },

    /// Background cache task failed to complete
    #[error("Background cache task failed: {reason}")]
    TaskFailed { reason: String },
}

impl CacheError {
    /// Wrap an I/O error with the path it occurred on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Classification of transport-level failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The request exceeded its timeout
    Timeout,
    /// A connection to the host could not be established
    Connect,
    /// No network connection is available
    Offline,
    /// TLS negotiation or certificate validation failed
    Tls,
    /// Host name resolution failed
    HostNotFound,
    /// The connection dropped while the body was streaming
    ConnectionLost,
    /// Any other transport failure
    Other,
}

impl TransportErrorKind {
    /// Whether a failure of this kind is likely to go away on its own
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Connect | Self::Offline | Self::HostNotFound | Self::ConnectionLost
        )
    }
}

/// Download coordinator errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DownloadError {
    /// The URL is missing or cannot be parsed
    #[error("Invalid URL: {url}")]
    InvalidUrl { url: String },

    /// The URL previously failed permanently
    #[error("URL is blacklisted after an earlier permanent failure: {url}")]
    Blacklisted { url: String },

    /// The request modifier rejected the request
    #[error("Download operation is invalid: {reason}")]
    InvalidOperation { reason: String },

    /// Server returned a status code outside the acceptable range
    #[error("Download response status code {status} is not acceptable")]
    InvalidStatusCode { status: u16 },

    /// The response was rejected or was empty
    #[error("Invalid download response: {reason}")]
    InvalidResponse { reason: String },

    /// Server returned a content type outside the acceptable set
    #[error("Download response content type {content_type} is not acceptable")]
    InvalidContentType { content_type: String },

    /// Server confirmed that the cached copy is still valid
    #[error("Cached image not modified on server")]
    NotModified,

    /// The payload could not be decoded into an image
    #[error("Bad image data: {reason}")]
    BadImageData { reason: String },

    /// The configured decryptor rejected the payload
    #[error("Failed to decrypt downloaded data")]
    DecryptionFailed,

    /// The operation was cancelled by every interested caller
    #[error("Download cancelled")]
    Cancelled,

    /// Transport failure reported by the HTTP client
    #[error("Transport error ({kind:?}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },
}

impl DownloadError {
    /// Build a transport error with a classified kind
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }

    /// Numeric code following the image loading error taxonomy
    pub fn code(&self) -> i32 {
        match self {
            DownloadError::InvalidUrl { .. } => error_codes::INVALID_URL,
            DownloadError::BadImageData { .. } => error_codes::BAD_IMAGE_DATA,
            DownloadError::NotModified => error_codes::CACHE_NOT_MODIFIED,
            DownloadError::Blacklisted { .. } => error_codes::BLACKLISTED,
            DownloadError::InvalidOperation { .. } | DownloadError::DecryptionFailed => {
                error_codes::INVALID_DOWNLOAD_OPERATION
            }
            DownloadError::InvalidStatusCode { .. } => error_codes::INVALID_DOWNLOAD_STATUS_CODE,
            DownloadError::Cancelled => error_codes::CANCELLED,
            DownloadError::InvalidResponse { .. } | DownloadError::Transport { .. } => {
                error_codes::INVALID_DOWNLOAD_RESPONSE
            }
            DownloadError::InvalidContentType { .. } => error_codes::INVALID_DOWNLOAD_CONTENT_TYPE,
        }
    }

    /// Check whether this error represents a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Cancelled)
    }

    /// Check if the error is transient and may succeed on a later attempt
    pub fn is_recoverable(&self) -> bool {
        match self {
            DownloadError::Transport { kind, .. } => kind.is_transient(),
            DownloadError::InvalidStatusCode { status } => {
                matches!(status, 408 | 429) || *status >= 500
            }
            DownloadError::Cancelled => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(error: reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            TransportErrorKind::Timeout
        } else if error.is_connect() {
            TransportErrorKind::Connect
        } else if error.is_body() || error.is_decode() {
            TransportErrorKind::ConnectionLost
        } else {
            TransportErrorKind::Other
        };
        DownloadError::transport(kind, error.to_string())
    }
}

/// Errors surfaced by the request manager and prefetcher
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImageError {
    /// The URL is missing or cannot be parsed
    #[error("Invalid image URL: {url}")]
    InvalidUrl { url: String },

    /// Cached or downloaded bytes could not be decoded
    #[error("Bad image data for {url}: {reason}")]
    BadImageData { url: String, reason: String },

    /// Revalidation confirmed the cached copy and there is nothing new to deliver
    #[error("Image not modified since it was cached")]
    CacheNotModified,

    /// The URL is in the failed URL set and retry was not requested
    #[error("Image URL is blacklisted: {url}")]
    Blacklisted { url: String },

    /// The cache-only option was set and no cached copy exists
    #[error("Image not found in cache: {key}")]
    NotCached { key: String },

    /// The load was cancelled
    #[error("Image load cancelled")]
    Cancelled,

    /// Network leg failure
    #[error(transparent)]
    Download(DownloadError),
}

impl From<DownloadError> for ImageError {
    fn from(error: DownloadError) -> Self {
        match error {
            DownloadError::Cancelled => ImageError::Cancelled,
            DownloadError::NotModified => ImageError::CacheNotModified,
            DownloadError::InvalidUrl { url } => ImageError::InvalidUrl { url },
            DownloadError::Blacklisted { url } => ImageError::Blacklisted { url },
            other => ImageError::Download(other),
        }
    }
}

impl ImageError {
    /// Numeric code following the image loading error taxonomy
    pub fn code(&self) -> i32 {
        match self {
            ImageError::InvalidUrl { .. } => error_codes::INVALID_URL,
            ImageError::BadImageData { .. } => error_codes::BAD_IMAGE_DATA,
            ImageError::CacheNotModified => error_codes::CACHE_NOT_MODIFIED,
            ImageError::Blacklisted { .. } => error_codes::BLACKLISTED,
            ImageError::NotCached { .. } => error_codes::INVALID_DOWNLOAD_OPERATION,
            ImageError::Cancelled => error_codes::CANCELLED,
            ImageError::Download(inner) => inner.code(),
        }
    }

    /// Check whether this error represents a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ImageError::Cancelled)
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Invalid configuration format
    #[error("Invalid configuration format")]
    InvalidFormat(#[from] toml::de::Error),

    /// Configuration could not be serialized
    #[error("Failed to serialize configuration")]
    Serialize(#[from] toml::ser::Error),

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}. {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// Configuration validation failed
    #[error("Configuration validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<String> },
}

/// Top-level application error that can represent any error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Cache error
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Download error
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Image loading error
    #[error(transparent)]
    Image(#[from] ImageError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON report serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic application error with context
    #[error("Application error: {message}")]
    Generic { message: String },
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Check if the error is recoverable (transient)
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Download(error) => error.is_recoverable(),
            AppError::Image(ImageError::Download(error)) => error.is_recoverable(),
            AppError::Image(ImageError::Cancelled) => true,
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Cache(_) => "cache",
            AppError::Download(_) => "download",
            AppError::Image(_) => "image",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Json(_) => "serialization",
            AppError::Generic { .. } => "generic",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Cache result type alias
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Download result type alias
pub type DownloadResult<T> = std::result::Result<T, DownloadError>;

/// Image loading result type alias
pub type ImageResult<T> = std::result::Result<T, ImageError>;

/// Configuration result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
