//! Cache statistics and disk usage reporting

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use super::memory::MemoryCacheStats;

/// Snapshot of both cache tiers
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Namespace of the cache engine
    pub namespace: String,
    /// Disk tier root directory
    pub cache_root: PathBuf,
    /// Memory tier counters
    pub memory: MemoryCacheStats,
    /// Number of files in the disk tier
    pub disk_file_count: usize,
    /// Total size of the disk tier in bytes
    pub disk_size: u64,
    /// Configured disk size limit (0 means unlimited)
    pub max_disk_size: u64,
}

impl CacheStats {
    /// Disk usage as a percentage of the configured limit
    pub fn disk_usage_percentage(&self) -> Option<f64> {
        if self.max_disk_size == 0 {
            return None;
        }
        Some(self.disk_size as f64 / self.max_disk_size as f64 * 100.0)
    }

    /// Check if the disk tier exceeds a percentage of its limit
    pub fn is_near_capacity(&self, threshold_percentage: f64) -> bool {
        self.disk_usage_percentage()
            .map(|usage| usage > threshold_percentage)
            .unwrap_or(false)
    }

    /// Format disk size in human-readable format
    pub fn format_disk_size(&self) -> String {
        format_bytes(self.disk_size)
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Namespace: {}", self.namespace)?;
        writeln!(f, "Location: {}", self.cache_root.display())?;
        writeln!(
            f,
            "Disk: {} files, {}",
            self.disk_file_count,
            self.format_disk_size()
        )?;
        if self.max_disk_size > 0 {
            writeln!(f, "Disk limit: {}", format_bytes(self.max_disk_size))?;
        }
        write!(f, "Memory: {}", self.memory)
    }
}

/// Format bytes in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: u64 = 1024;

    if bytes < THRESHOLD {
        return format!("{} B", bytes);
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= THRESHOLD as f64 && unit_index < UNITS.len() - 1 {
        size /= THRESHOLD as f64;
        unit_index += 1;
    }

    format!("{:.1} {}", size, UNITS[unit_index])
}
