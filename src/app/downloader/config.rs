//! Downloader configuration management
//!
//! Configuration structures, a builder, and presets for the download
//! coordinator. Every coordinator owns its own copy of the configuration.

use std::collections::{BTreeMap, HashSet};
use std::ops::Range;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{downloader, http};
use crate::errors::{ConfigError, ConfigResult};

/// Order in which queued downloads are started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOrder {
    /// First queued, first started
    #[default]
    Fifo,
    /// Last queued, first started
    Lifo,
}

/// Configuration for the download coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderConfig {
    /// Maximum number of network operations in flight
    pub max_concurrent_downloads: usize,
    /// Timeout for each request
    pub download_timeout: Duration,
    /// Minimum progress fraction between two progress events (0.0 to 1.0)
    pub minimum_progress_interval: f64,
    /// Queue discipline for operations waiting for a slot
    pub execution_order: ExecutionOrder,
    /// Basic auth user name
    pub username: Option<String>,
    /// Basic auth password
    pub password: Option<String>,
    /// Status codes treated as success
    pub acceptable_status_codes: Range<u16>,
    /// Content types treated as success (`None` accepts everything)
    pub acceptable_content_types: Option<HashSet<String>>,
    /// User agent sent with every request
    pub user_agent: String,
    /// Headers sent with every request
    pub http_headers: BTreeMap<String, String>,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        let mut http_headers = BTreeMap::new();
        http_headers.insert("Accept".to_string(), http::ACCEPT_HEADER.to_string());

        Self {
            max_concurrent_downloads: downloader::DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            download_timeout: http::DEFAULT_TIMEOUT,
            minimum_progress_interval: downloader::DEFAULT_MINIMUM_PROGRESS_INTERVAL,
            execution_order: ExecutionOrder::Fifo,
            username: None,
            password: None,
            acceptable_status_codes: http::ACCEPTABLE_STATUS_START..http::ACCEPTABLE_STATUS_END,
            acceptable_content_types: None,
            user_agent: http::USER_AGENT.to_string(),
            http_headers,
        }
    }
}

impl DownloaderConfig {
    /// Validate configuration values, reporting every problem found
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if self.max_concurrent_downloads == 0 {
            errors.push("Maximum concurrent downloads cannot be zero".to_string());
        }
        if self.download_timeout.is_zero() {
            errors.push("Download timeout cannot be zero".to_string());
        }
        if !(0.0..=1.0).contains(&self.minimum_progress_interval) {
            errors.push("Minimum progress interval must be between 0.0 and 1.0".to_string());
        }
        if self.acceptable_status_codes.is_empty() {
            errors.push("Acceptable status code range is empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationFailed { errors })
        }
    }

    /// Basic auth credentials, when a user name is configured
    pub fn credentials(&self) -> Option<(String, String)> {
        self.username.as_ref().map(|username| {
            (
                username.clone(),
                self.password.clone().unwrap_or_default(),
            )
        })
    }

    /// Whether a status code counts as success
    pub fn accepts_status(&self, status: u16) -> bool {
        self.acceptable_status_codes.contains(&status)
    }

    /// Whether a content type counts as success
    ///
    /// Parameters after `;` are ignored and the comparison is case-insensitive.
    pub fn accepts_content_type(&self, content_type: Option<&str>) -> bool {
        let Some(allowed) = &self.acceptable_content_types else {
            return true;
        };
        let Some(content_type) = content_type else {
            return false;
        };
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        allowed
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(&essence))
    }
}

/// Builder for DownloaderConfig
#[derive(Debug, Default)]
pub struct DownloaderConfigBuilder {
    max_concurrent_downloads: Option<usize>,
    download_timeout: Option<Duration>,
    minimum_progress_interval: Option<f64>,
    execution_order: Option<ExecutionOrder>,
    username: Option<String>,
    password: Option<String>,
    acceptable_status_codes: Option<Range<u16>>,
    acceptable_content_types: Option<HashSet<String>>,
    user_agent: Option<String>,
    http_headers: BTreeMap<String, String>,
}

impl DownloaderConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_concurrent_downloads(mut self, count: usize) -> Self {
        self.max_concurrent_downloads = Some(count);
        self
    }

    pub fn download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = Some(timeout);
        self
    }

    pub fn minimum_progress_interval(mut self, interval: f64) -> Self {
        self.minimum_progress_interval = Some(interval);
        self
    }

    pub fn execution_order(mut self, order: ExecutionOrder) -> Self {
        self.execution_order = Some(order);
        self
    }

    /// Set basic auth credentials
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn acceptable_status_codes(mut self, codes: Range<u16>) -> Self {
        self.acceptable_status_codes = Some(codes);
        self
    }

    /// Restrict accepted content types
    pub fn acceptable_content_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.acceptable_content_types = Some(
            types
                .into_iter()
                .map(|t| t.into().to_ascii_lowercase())
                .collect(),
        );
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Add a header sent with every request
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.http_headers.insert(name.into(), value.into());
        self
    }

    /// Build the configuration, validating it
    pub fn build(self) -> ConfigResult<DownloaderConfig> {
        let defaults = DownloaderConfig::default();
        let mut http_headers = defaults.http_headers;
        http_headers.extend(self.http_headers);

        let config = DownloaderConfig {
            max_concurrent_downloads: self
                .max_concurrent_downloads
                .unwrap_or(defaults.max_concurrent_downloads),
            download_timeout: self.download_timeout.unwrap_or(defaults.download_timeout),
            minimum_progress_interval: self
                .minimum_progress_interval
                .unwrap_or(defaults.minimum_progress_interval),
            execution_order: self.execution_order.unwrap_or(defaults.execution_order),
            username: self.username,
            password: self.password,
            acceptable_status_codes: self
                .acceptable_status_codes
                .unwrap_or(defaults.acceptable_status_codes),
            acceptable_content_types: self.acceptable_content_types,
            user_agent: self.user_agent.unwrap_or(defaults.user_agent),
            http_headers,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Predefined configurations for common scenarios
pub struct ConfigPresets;

impl ConfigPresets {
    /// Default settings
    pub fn default() -> DownloaderConfig {
        DownloaderConfig::default()
    }

    /// Few connections, coarse progress reporting
    pub fn low_memory() -> DownloaderConfig {
        DownloaderConfig {
            max_concurrent_downloads: 2,
            minimum_progress_interval: 0.1,
            ..DownloaderConfig::default()
        }
    }

    /// Many connections, newest requests first
    pub fn aggressive() -> DownloaderConfig {
        DownloaderConfig {
            max_concurrent_downloads: 16,
            execution_order: ExecutionOrder::Lifo,
            ..DownloaderConfig::default()
        }
    }

    /// Short timeouts for tests
    pub fn testing() -> DownloaderConfig {
        DownloaderConfig {
            max_concurrent_downloads: 2,
            download_timeout: Duration::from_secs(2),
            ..DownloaderConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DownloaderConfig::default();
        assert_eq!(config.max_concurrent_downloads, 6);
        assert_eq!(config.download_timeout, Duration::from_secs(15));
        assert_eq!(config.execution_order, ExecutionOrder::Fifo);
        assert!(config.accepts_status(200));
        assert!(config.accepts_status(399));
        assert!(!config.accepts_status(404));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        let config = DownloaderConfig {
            max_concurrent_downloads: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DownloaderConfig {
            minimum_progress_interval: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DownloaderConfig {
            acceptable_status_codes: 300..300,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_content_type_allow_set() {
        let config = DownloaderConfigBuilder::new()
            .acceptable_content_types(["image/png", "IMAGE/JPEG"])
            .build()
            .unwrap();

        assert!(config.accepts_content_type(Some("image/png")));
        assert!(config.accepts_content_type(Some("image/jpeg; charset=binary")));
        assert!(!config.accepts_content_type(Some("text/html")));
        assert!(!config.accepts_content_type(None));

        // Without an allow-set everything passes
        assert!(DownloaderConfig::default().accepts_content_type(None));
    }

    #[test]
    fn test_builder_keeps_default_headers() {
        let config = DownloaderConfigBuilder::new()
            .header("X-Client", "tests")
            .credentials("user", "secret")
            .max_concurrent_downloads(3)
            .build()
            .unwrap();

        assert_eq!(config.max_concurrent_downloads, 3);
        assert!(config.http_headers.contains_key("Accept"));
        assert_eq!(config.http_headers.get("X-Client").unwrap(), "tests");
        assert_eq!(
            config.credentials(),
            Some(("user".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn test_builder_rejects_invalid() {
        let result = DownloaderConfigBuilder::new()
            .max_concurrent_downloads(0)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(ConfigPresets::default().validate().is_ok());
        assert!(ConfigPresets::low_memory().validate().is_ok());
        assert!(ConfigPresets::aggressive().validate().is_ok());
        assert!(ConfigPresets::testing().validate().is_ok());
        assert_eq!(
            ConfigPresets::aggressive().execution_order,
            ExecutionOrder::Lifo
        );
    }
}
