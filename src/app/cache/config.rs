//! Cache configuration types and defaults
//!
//! This module contains the policy object shared by the memory and disk
//! tiers. Each cache clones its configuration at construction, so changing a
//! config value afterwards never affects caches that already exist.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::cache;

/// File timestamp consulted by the disk expiry sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskCacheExpireType {
    /// Last access time, refreshed whenever an entry is read
    AccessDate,
    /// Last modification time, refreshed whenever an entry is written
    #[default]
    ModificationDate,
    /// Creation time of the file
    CreationDate,
    /// Last metadata change time (ctime on Unix)
    ChangeDate,
}

/// How disk entries are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskWriteMode {
    /// Write to a temporary file in the cache root and rename over the target
    #[default]
    Atomic,
    /// Write the target file in place
    Direct,
}

/// Configuration for the memory and disk cache tiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Keep decoded images in the memory tier
    pub should_cache_images_in_memory: bool,
    /// Mirror memory entries into a weak table that survives memory purges
    pub should_use_weak_memory_cache: bool,
    /// Maximum entry age on disk (`None` never expires, zero always expires)
    pub max_disk_age: Option<Duration>,
    /// Maximum total disk size in bytes (0 = unlimited)
    pub max_disk_size: u64,
    /// Maximum total memory cost in bytes (0 = unlimited)
    pub max_memory_cost: usize,
    /// Maximum number of memory entries (0 = unlimited)
    pub max_memory_count: usize,
    /// Timestamp used by the expiry sweep
    pub disk_cache_expire_type: DiskCacheExpireType,
    /// Disk write strategy
    pub disk_write_mode: DiskWriteMode,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            should_cache_images_in_memory: true,
            should_use_weak_memory_cache: true,
            max_disk_age: Some(cache::DEFAULT_MAX_DISK_AGE),
            max_disk_size: 0,
            max_memory_cost: 0,
            max_memory_count: 0,
            disk_cache_expire_type: DiskCacheExpireType::default(),
            disk_write_mode: DiskWriteMode::default(),
        }
    }
}

impl CacheConfig {
    /// Set maximum disk age from signed seconds (negative never expires)
    pub fn with_max_disk_age_secs(mut self, seconds: i64) -> Self {
        self.max_disk_age = u64::try_from(seconds).ok().map(Duration::from_secs);
        self
    }

    /// Set maximum disk age
    pub fn with_max_disk_age(mut self, age: Option<Duration>) -> Self {
        self.max_disk_age = age;
        self
    }

    /// Set maximum disk size in bytes
    pub fn with_max_disk_size(mut self, max_size: u64) -> Self {
        self.max_disk_size = max_size;
        self
    }

    /// Set maximum total memory cost
    pub fn with_max_memory_cost(mut self, max_cost: usize) -> Self {
        self.max_memory_cost = max_cost;
        self
    }

    /// Set maximum number of memory entries
    pub fn with_max_memory_count(mut self, max_count: usize) -> Self {
        self.max_memory_count = max_count;
        self
    }

    /// Set the timestamp used for disk expiry
    pub fn with_expire_type(mut self, expire_type: DiskCacheExpireType) -> Self {
        self.disk_cache_expire_type = expire_type;
        self
    }

    /// Enable or disable the weak memory table
    pub fn with_weak_memory_cache(mut self, enabled: bool) -> Self {
        self.should_use_weak_memory_cache = enabled;
        self
    }

    /// Enable or disable the memory tier
    pub fn with_memory_cache(mut self, enabled: bool) -> Self {
        self.should_cache_images_in_memory = enabled;
        self
    }

    /// Maximum disk age as signed seconds (-1 when entries never expire)
    pub fn max_disk_age_secs(&self) -> i64 {
        match self.max_disk_age {
            Some(age) => i64::try_from(age.as_secs()).unwrap_or(i64::MAX),
            None => -1,
        }
    }
}
