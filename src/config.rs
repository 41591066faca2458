//! Configuration file support for Image Fetcher
//!
//! The TOML file mirrors the runtime configuration structs section by
//! section. Every section is optional and every field falls back to the
//! runtime default, so an empty file is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::app::cache::{DiskCacheExpireType, DiskWriteMode};
use crate::app::{
    CacheConfig, ClientConfig, DownloaderConfig, ExecutionOrder, ImageOptions, PrefetchConfig,
};
use crate::constants::{cache, downloader, http, prefetch};
use crate::errors::{AppError, ConfigError, Result};

/// File name looked up in the working directory
const LOCAL_CONFIG_FILE: &str = "image-fetcher.toml";

/// Unified application configuration for TOML serialization
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Memory and disk cache settings
    pub cache: CacheConfigToml,
    /// Downloader and HTTP client settings
    pub downloader: DownloaderConfigToml,
    /// Batch prefetch settings
    pub prefetch: PrefetchConfigToml,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// TOML-friendly cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfigToml {
    /// Cache namespace, the directory name under the cache root
    pub namespace: String,
    /// Parent directory of the namespace (None = platform cache directory)
    pub directory: Option<PathBuf>,
    /// Keep decoded images in memory
    pub memory_cache: bool,
    /// Mirror memory entries into the weak table
    pub weak_memory_cache: bool,
    /// Maximum disk age in seconds (negative = never expire)
    pub max_disk_age_secs: i64,
    /// Maximum disk size in bytes (0 = unlimited)
    pub max_disk_size: u64,
    /// Maximum memory cost in bytes (0 = unlimited)
    pub max_memory_cost: usize,
    /// Maximum number of memory entries (0 = unlimited)
    pub max_memory_count: usize,
    /// Timestamp consulted by the expiry sweep
    pub expire_type: DiskCacheExpireType,
    /// Disk write strategy
    pub write_mode: DiskWriteMode,
}

impl Default for CacheConfigToml {
    fn default() -> Self {
        Self {
            namespace: cache::DEFAULT_NAMESPACE.to_string(),
            directory: None,
            memory_cache: true,
            weak_memory_cache: true,
            max_disk_age_secs: cache::DEFAULT_MAX_DISK_AGE.as_secs() as i64,
            max_disk_size: 0,
            max_memory_cost: 0,
            max_memory_count: 0,
            expire_type: DiskCacheExpireType::default(),
            write_mode: DiskWriteMode::default(),
        }
    }
}

/// TOML-friendly downloader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfigToml {
    /// Maximum number of downloads running at once
    pub max_concurrent_downloads: usize,
    /// Per-request timeout in seconds
    pub download_timeout_secs: u64,
    /// Minimum progress fraction between two progress events
    pub minimum_progress_interval: f64,
    /// Queue discipline for waiting operations
    pub execution_order: ExecutionOrder,
    /// Basic auth user name
    pub username: Option<String>,
    /// Basic auth password
    pub password: Option<String>,
    /// Accepted content types (empty = accept all)
    pub acceptable_content_types: Vec<String>,
    /// User agent sent with every request
    pub user_agent: String,
    /// Enable HTTP/2 adaptive window
    pub http2: bool,
    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Maximum idle connections per host
    pub pool_max_per_host: usize,
    /// Requests per second (0 = unlimited)
    pub rate_limit_rps: u32,
}

impl Default for DownloaderConfigToml {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: downloader::DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            download_timeout_secs: http::DEFAULT_TIMEOUT.as_secs(),
            minimum_progress_interval: downloader::DEFAULT_MINIMUM_PROGRESS_INTERVAL,
            execution_order: ExecutionOrder::Fifo,
            username: None,
            password: None,
            acceptable_content_types: Vec::new(),
            user_agent: http::USER_AGENT.to_string(),
            http2: false,
            connect_timeout_secs: http::CONNECT_TIMEOUT.as_secs(),
            pool_max_per_host: http::POOL_MAX_PER_HOST,
            rate_limit_rps: 0,
        }
    }
}

/// TOML-friendly prefetch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfigToml {
    /// URLs loaded at the same time within one batch
    pub max_concurrent_prefetch_count: usize,
    /// Queue prefetch downloads behind regular loads
    pub low_priority: bool,
    /// Retry URLs that previously failed
    pub retry_failed: bool,
    /// Downscale very large images while decoding
    pub scale_down_large_images: bool,
}

impl Default for PrefetchConfigToml {
    fn default() -> Self {
        Self {
            max_concurrent_prefetch_count: prefetch::DEFAULT_MAX_CONCURRENT_PREFETCH,
            low_priority: true,
            retry_failed: false,
            scale_down_large_images: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level for the application
    pub level: String,
    /// Enable colored output
    pub colored_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            colored_output: true,
        }
    }
}

impl AppConfig {
    /// Convert the file configuration to runtime configuration
    pub fn to_runtime_config(&self) -> (CacheConfig, DownloaderConfig, ClientConfig, PrefetchConfig) {
        (
            self.cache.to_runtime_config(),
            self.downloader.to_runtime_config(),
            self.downloader.to_client_config(),
            self.prefetch.to_runtime_config(),
        )
    }

    /// Check every section, reporting all problems at once
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.cache.namespace.trim().is_empty() {
            errors.push("cache.namespace must not be empty".to_string());
        }
        if let Err(e) = self.downloader.to_runtime_config().validate() {
            errors.push(e.to_string());
        }
        if let Err(e) = self.prefetch.to_runtime_config().validate() {
            errors.push(e.to_string());
        }
        if !matches!(
            self.logging.level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            errors.push(format!("logging.level '{}' is not a log level", self.logging.level));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationFailed { errors }.into())
        }
    }

    /// Load configuration from the first file found
    ///
    /// Lookup order: the explicit path, `./image-fetcher.toml`, then the user
    /// config directory. An explicit path that does not exist is an error;
    /// otherwise a missing file yields the defaults.
    pub async fn load(config_file_override: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_file_override {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound { path }.into());
                }
                Some(path)
            }
            None => Self::find_config_file(),
        };

        let config = match config_path {
            Some(path) => {
                debug!("Loading config from: {}", path.display());
                Self::load_from_file(&path).await?
            }
            None => Self::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Create the user config file if none exists
    ///
    /// Returns the path of the user config file.
    pub async fn initialize_first_run() -> Result<PathBuf> {
        let config_path = Self::get_default_config_path()?;

        if config_path.exists() {
            return Ok(config_path);
        }

        info!("Creating default configuration file...");

        if let Some(parent) = config_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::generic(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        tokio::fs::write(&config_path, Self::generate_default_config_content())
            .await
            .map_err(|e| {
                AppError::generic(format!(
                    "Failed to write config file {}: {}",
                    config_path.display(),
                    e
                ))
            })?;

        println!("Created default configuration file:");
        println!("   {}", config_path.display());
        println!();

        Ok(config_path)
    }

    /// Find a configuration file in the standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut search_paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
        if let Ok(path) = Self::get_default_config_path() {
            search_paths.push(path);
        }

        let found = search_paths.into_iter().find(|path| path.exists());
        match &found {
            Some(path) => debug!("Found config file: {}", path.display()),
            None => debug!("No config file found in standard locations"),
        }
        found
    }

    /// Default config file path for the current user
    pub fn get_default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::generic("Could not determine user config directory"))?;

        Ok(config_dir.join(cache::APP_DIR_NAME).join("config.toml"))
    }

    async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::generic(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: AppConfig = toml::from_str(&content).map_err(ConfigError::from)?;

        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Default configuration content with comments
    fn generate_default_config_content() -> String {
        let defaults = Self::default();
        let default_cache_root = dirs::cache_dir()
            .map(|dir| dir.join(cache::APP_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from("./cache"));

        format!(
            r#"# Image Fetcher Configuration
# This file was generated on first run. Every setting is optional.

[cache]
# Namespace directory under the cache root
namespace = "{namespace}"

# Cache root (leave unset to use {cache_root})
# directory = "/path/to/cache"

# Keep decoded images in memory
memory_cache = true
weak_memory_cache = true

# Maximum disk age in seconds (negative = never expire, 0 = expire everything)
max_disk_age_secs = {max_disk_age_secs}

# Limits (0 = unlimited)
max_disk_size = 0
max_memory_cost = 0
max_memory_count = 0

# access_date, modification_date, creation_date or change_date
expire_type = "modification_date"

# atomic or direct
write_mode = "atomic"

[downloader]
max_concurrent_downloads = {max_concurrent_downloads}
download_timeout_secs = {download_timeout_secs}
minimum_progress_interval = 0.0

# fifo or lifo
execution_order = "fifo"

# Basic auth credentials
# username = "user"
# password = "secret"

# Accepted content types (empty = accept all)
acceptable_content_types = []

http2 = false
connect_timeout_secs = {connect_timeout_secs}
pool_max_per_host = {pool_max_per_host}

# Requests per second (0 = unlimited)
rate_limit_rps = 0

[prefetch]
max_concurrent_prefetch_count = {max_concurrent_prefetch_count}
low_priority = true
retry_failed = false
scale_down_large_images = false

[logging]
# trace, debug, info, warn or error
level = "info"
colored_output = true
"#,
            namespace = defaults.cache.namespace,
            cache_root = default_cache_root.display(),
            max_disk_age_secs = defaults.cache.max_disk_age_secs,
            max_concurrent_downloads = defaults.downloader.max_concurrent_downloads,
            download_timeout_secs = defaults.downloader.download_timeout_secs,
            connect_timeout_secs = defaults.downloader.connect_timeout_secs,
            pool_max_per_host = defaults.downloader.pool_max_per_host,
            max_concurrent_prefetch_count = defaults.prefetch.max_concurrent_prefetch_count,
        )
    }
}

impl CacheConfigToml {
    pub fn to_runtime_config(&self) -> CacheConfig {
        CacheConfig {
            should_cache_images_in_memory: self.memory_cache,
            should_use_weak_memory_cache: self.weak_memory_cache,
            max_disk_size: self.max_disk_size,
            max_memory_cost: self.max_memory_cost,
            max_memory_count: self.max_memory_count,
            disk_cache_expire_type: self.expire_type,
            disk_write_mode: self.write_mode,
            ..CacheConfig::default()
        }
        .with_max_disk_age_secs(self.max_disk_age_secs)
    }
}

impl DownloaderConfigToml {
    pub fn to_runtime_config(&self) -> DownloaderConfig {
        let acceptable_content_types = if self.acceptable_content_types.is_empty() {
            None
        } else {
            Some(self.acceptable_content_types.iter().cloned().collect())
        };

        DownloaderConfig {
            max_concurrent_downloads: self.max_concurrent_downloads,
            download_timeout: Duration::from_secs(self.download_timeout_secs),
            minimum_progress_interval: self.minimum_progress_interval,
            execution_order: self.execution_order,
            username: self.username.clone(),
            password: self.password.clone(),
            acceptable_content_types,
            user_agent: self.user_agent.clone(),
            ..DownloaderConfig::default()
        }
    }

    /// HTTP client settings for the reqwest transport
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            http2: self.http2,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            pool_max_per_host: self.pool_max_per_host,
            rate_limit_rps: self.rate_limit_rps,
            user_agent: self.user_agent.clone(),
            ..ClientConfig::default()
        }
    }
}

impl PrefetchConfigToml {
    pub fn to_runtime_config(&self) -> PrefetchConfig {
        let mut options = ImageOptions::empty();
        options.set(ImageOptions::LOW_PRIORITY, self.low_priority);
        options.set(ImageOptions::RETRY_FAILED, self.retry_failed);
        options.set(
            ImageOptions::SCALE_DOWN_LARGE_IMAGES,
            self.scale_down_large_images,
        );

        PrefetchConfig::default()
            .with_concurrency(self.max_concurrent_prefetch_count)
            .with_options(options)
    }
}
