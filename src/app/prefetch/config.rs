//! Prefetch configuration

use serde::{Deserialize, Serialize};

use crate::app::manager::ImageOptions;
use crate::constants::prefetch;
use crate::errors::{ConfigError, ConfigResult};

/// Configuration for a prefetch coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefetchConfig {
    /// URLs loaded at the same time within one batch
    pub max_concurrent_prefetch_count: usize,
    /// Options passed to every load
    pub options: ImageOptions,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_prefetch_count: prefetch::DEFAULT_MAX_CONCURRENT_PREFETCH,
            options: ImageOptions::LOW_PRIORITY,
        }
    }
}

impl PrefetchConfig {
    pub fn with_concurrency(mut self, count: usize) -> Self {
        self.max_concurrent_prefetch_count = count;
        self
    }

    pub fn with_options(mut self, options: ImageOptions) -> Self {
        self.options = options;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_concurrent_prefetch_count == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_concurrent_prefetch_count".to_string(),
                value: "0".to_string(),
                reason: "At least one concurrent prefetch is required".to_string(),
            });
        }
        Ok(())
    }
}
