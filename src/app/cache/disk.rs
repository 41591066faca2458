//! Persistent key to bytes store
//!
//! Every method performs blocking file I/O and must be called from a
//! blocking context (`tokio::task::spawn_blocking`), never directly from an
//! async task. The cache engine serializes access through a single mutex.
//!
//! # Layout
//!
//! ```text
//! {root}/{md5(key)}[.ext]             primary payload
//! {root}/.extended/{md5(key)}[.ext]   extended data sidecar
//! ```

use std::fs::{self, File, FileTimes, Metadata};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::errors::{CacheError, CacheResult};

use super::config::{CacheConfig, DiskCacheExpireType, DiskWriteMode};
use super::path::PathGenerator;

/// Result of an expiry sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpirySweep {
    /// Entries removed because they were older than the maximum age
    pub removed_by_age: usize,
    /// Entries removed to bring the cache under its size limit
    pub removed_by_size: usize,
    /// Entries left after the sweep
    pub remaining_count: usize,
    /// Bytes left after the sweep
    pub remaining_bytes: u64,
}

impl ExpirySweep {
    pub fn total_removed(&self) -> usize {
        self.removed_by_age + self.removed_by_size
    }
}

#[derive(Debug)]
struct DiskEntry {
    path: PathBuf,
    size: u64,
    timestamp: SystemTime,
}

/// Disk cache rooted at a single directory
#[derive(Debug)]
pub struct DiskCache {
    root: PathBuf,
    config: CacheConfig,
}

impl DiskCache {
    /// Create a disk cache, creating the root directory if necessary
    ///
    /// # Errors
    ///
    /// Returns `CacheError::DirectoryNotAccessible` if the directory cannot be created
    pub fn new(root: impl Into<PathBuf>, config: CacheConfig) -> CacheResult<Self> {
        let root = root.into();
        ensure_directory(&root)?;
        debug!("Opened disk cache at {}", root.display());
        Ok(Self { root, config })
    }

    /// Cache root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Path of the payload file for a key (`None` for an empty key)
    pub fn path_for(&self, key: &str) -> Option<PathBuf> {
        if key.is_empty() {
            return None;
        }
        Some(PathGenerator::path_for_key(&self.root, key))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.path_for(key).map_or(false, |path| path.is_file())
    }

    /// Read the payload for a key
    ///
    /// Read failures other than a missing file are logged and reported as a miss.
    pub fn read(&self, key: &str) -> Option<Vec<u8>> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(data) => {
                if self.config.disk_cache_expire_type == DiskCacheExpireType::AccessDate {
                    self.touch(key);
                }
                Some(data)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Failed to read disk cache entry {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Write the payload for a key, replacing any existing entry
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if the file cannot be written
    pub fn write(&self, key: &str, data: &[u8]) -> CacheResult<()> {
        let path = self.path_for(key).ok_or(CacheError::InvalidKey)?;
        ensure_directory(&self.root)?;

        match self.config.disk_write_mode {
            DiskWriteMode::Atomic => write_atomic(&self.root, &path, data),
            DiskWriteMode::Direct => fs::write(&path, data).map_err(|e| CacheError::io(&path, e)),
        }
    }

    /// Read extended data stored beside a key
    pub fn read_extended(&self, key: &str) -> Option<Vec<u8>> {
        if key.is_empty() {
            return None;
        }
        let path = PathGenerator::extended_path_for_key(&self.root, key);
        match fs::read(&path) {
            Ok(data) => Some(data),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Failed to read extended data {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Write or clear extended data without touching the payload
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if the sidecar cannot be written or removed
    pub fn write_extended(&self, key: &str, data: Option<&[u8]>) -> CacheResult<()> {
        if key.is_empty() {
            return Err(CacheError::InvalidKey);
        }
        let path = PathGenerator::extended_path_for_key(&self.root, key);

        match data {
            Some(data) => {
                let dir = PathGenerator::extended_data_dir(&self.root);
                ensure_directory(&dir)?;
                write_atomic(&dir, &path, data)
            }
            None => remove_if_exists(&path),
        }
    }

    /// Remove a key's payload and extended data
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if an existing file cannot be removed
    pub fn remove(&self, key: &str) -> CacheResult<()> {
        let Some(path) = self.path_for(key) else {
            return Ok(());
        };
        remove_if_exists(&path)?;
        remove_if_exists(&PathGenerator::extended_path_for_key(&self.root, key))
    }

    /// Remove every entry and recreate an empty root
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if the directory cannot be cleared
    pub fn remove_all(&self) -> CacheResult<()> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::io(&self.root, e)),
        }
        ensure_directory(&self.root)?;
        info!("Removed all disk cache entries in {}", self.root.display());
        Ok(())
    }

    /// Remove expired entries, then trim oldest-first while over the size limit
    ///
    /// A maximum age of zero removes every entry. When the cache is still
    /// larger than `max_disk_size`, the oldest remaining entries are removed
    /// until it is at most half of the limit.
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if the cache directory cannot be listed
    pub fn remove_expired(&self) -> CacheResult<ExpirySweep> {
        let expire_type = self.config.disk_cache_expire_type;
        let mut entries = self.list_entries(expire_type)?;
        let mut sweep = ExpirySweep::default();

        let cutoff = self.config.max_disk_age.map(|age| {
            if age.is_zero() {
                None
            } else {
                Some(SystemTime::now().checked_sub(age).unwrap_or(UNIX_EPOCH))
            }
        });

        if let Some(cutoff) = cutoff {
            let mut kept = Vec::with_capacity(entries.len());
            for entry in entries {
                // `None` cutoff means a zero age, which expires everything
                let expired = cutoff.map_or(true, |cutoff| entry.timestamp <= cutoff);
                if expired {
                    if self.remove_entry(&entry) {
                        sweep.removed_by_age += 1;
                    }
                } else {
                    kept.push(entry);
                }
            }
            entries = kept;
        }

        let max_size = self.config.max_disk_size;
        let mut total_size: u64 = entries.iter().map(|entry| entry.size).sum();

        if max_size > 0 && total_size > max_size {
            let desired_size = max_size / 2;
            entries.sort_by_key(|entry| entry.timestamp);

            let mut kept = Vec::with_capacity(entries.len());
            let mut drained = entries.into_iter();
            for entry in drained.by_ref() {
                if total_size <= desired_size {
                    kept.push(entry);
                    break;
                }
                if self.remove_entry(&entry) {
                    total_size = total_size.saturating_sub(entry.size);
                    sweep.removed_by_size += 1;
                } else {
                    kept.push(entry);
                }
            }
            kept.extend(drained);
            entries = kept;
        }

        sweep.remaining_count = entries.len();
        sweep.remaining_bytes = total_size;

        if sweep.total_removed() > 0 {
            info!(
                "Disk cache sweep removed {} expired and {} oversize entries ({} left)",
                sweep.removed_by_age, sweep.removed_by_size, sweep.remaining_count
            );
        }
        Ok(sweep)
    }

    /// Number of payload files
    pub fn total_count(&self) -> usize {
        match self.list_entries(self.config.disk_cache_expire_type) {
            Ok(entries) => entries.len(),
            Err(e) => {
                warn!("Failed to count disk cache entries: {}", e);
                0
            }
        }
    }

    /// Total size of payload files in bytes
    pub fn total_size(&self) -> u64 {
        match self.list_entries(self.config.disk_cache_expire_type) {
            Ok(entries) => entries.iter().map(|entry| entry.size).sum(),
            Err(e) => {
                warn!("Failed to size disk cache: {}", e);
                0
            }
        }
    }

    /// Refresh a key's access and modification time (best effort)
    pub fn touch(&self, key: &str) {
        let Some(path) = self.path_for(key) else {
            return;
        };
        let now = SystemTime::now();
        let result = File::options()
            .write(true)
            .open(&path)
            .and_then(|file| file.set_times(FileTimes::new().set_accessed(now).set_modified(now)));
        if let Err(e) = result {
            debug!("Failed to touch {}: {}", path.display(), e);
        }
    }

    /// Move the cache root, merging into an existing destination
    ///
    /// Entries are copied before the source is deleted, so an interruption
    /// leaves at least one complete copy of every entry. When both
    /// directories contain the same entry the destination copy is kept.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::MoveFailed` if entries cannot be copied
    pub fn move_cache_directory(&mut self, destination: impl Into<PathBuf>) -> CacheResult<()> {
        let destination = destination.into();
        if destination == self.root {
            return Ok(());
        }

        move_directory(&self.root, &destination)?;
        info!(
            "Moved disk cache from {} to {}",
            self.root.display(),
            destination.display()
        );
        self.root = destination;
        Ok(())
    }

    fn remove_entry(&self, entry: &DiskEntry) -> bool {
        if let Err(e) = fs::remove_file(&entry.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", entry.path.display(), e);
                return false;
            }
        }
        if let Some(name) = entry.path.file_name() {
            let sidecar = PathGenerator::extended_data_dir(&self.root).join(name);
            let _ = remove_if_exists(&sidecar);
        }
        true
    }

    fn list_entries(&self, expire_type: DiskCacheExpireType) -> CacheResult<Vec<DiskEntry>> {
        let reader = match fs::read_dir(&self.root) {
            Ok(reader) => reader,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::io(&self.root, e)),
        };

        let mut entries = Vec::new();
        for dir_entry in reader.flatten() {
            // Sidecar directory and temporary files start with a dot
            if dir_entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let Ok(metadata) = dir_entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            entries.push(DiskEntry {
                path: dir_entry.path(),
                size: metadata.len(),
                timestamp: entry_timestamp(&metadata, expire_type),
            });
        }
        Ok(entries)
    }
}

/// Timestamp of a file according to the configured expiry type
fn entry_timestamp(metadata: &Metadata, expire_type: DiskCacheExpireType) -> SystemTime {
    let timestamp = match expire_type {
        DiskCacheExpireType::AccessDate => metadata.accessed(),
        DiskCacheExpireType::ModificationDate => metadata.modified(),
        DiskCacheExpireType::CreationDate => metadata.created().or_else(|_| metadata.modified()),
        DiskCacheExpireType::ChangeDate => change_time(metadata),
    };
    timestamp.unwrap_or(UNIX_EPOCH)
}

#[cfg(unix)]
fn change_time(metadata: &Metadata) -> std::io::Result<SystemTime> {
    use std::os::unix::fs::MetadataExt;

    let seconds = u64::try_from(metadata.ctime()).unwrap_or(0);
    let nanos = u32::try_from(metadata.ctime_nsec()).unwrap_or(0);
    Ok(UNIX_EPOCH + Duration::new(seconds, nanos))
}

#[cfg(not(unix))]
fn change_time(metadata: &Metadata) -> std::io::Result<SystemTime> {
    metadata.modified()
}

fn ensure_directory(path: &Path) -> CacheResult<()> {
    if path.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(path).map_err(|e| {
        warn!("Failed to create cache directory {}: {}", path.display(), e);
        CacheError::DirectoryNotAccessible {
            path: path.to_path_buf(),
        }
    })
}

fn write_atomic(dir: &Path, path: &Path, data: &[u8]) -> CacheResult<()> {
    let mut temp_file =
        tempfile::NamedTempFile::new_in(dir).map_err(|e| CacheError::io(dir, e))?;
    temp_file
        .write_all(data)
        .map_err(|e| CacheError::io(temp_file.path(), e))?;
    temp_file.persist(path).map_err(|e| {
        warn!("Failed to persist {}: {}", path.display(), e.error);
        CacheError::AtomicWriteFailed {
            path: path.to_path_buf(),
        }
    })?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> CacheResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::io(path, e)),
    }
}

/// Copy-then-delete directory move that merges into an existing destination
///
/// # Errors
///
/// Returns `CacheError::MoveFailed` describing the first entry that failed
pub fn move_directory(source: &Path, destination: &Path) -> CacheResult<()> {
    if !source.exists() {
        return ensure_directory(destination);
    }

    // A plain rename is atomic when the destination does not exist yet
    if !destination.exists() {
        if let Some(parent) = destination.parent() {
            ensure_directory(parent)?;
        }
        if fs::rename(source, destination).is_ok() {
            return Ok(());
        }
    }

    merge_directory(source, destination).map_err(|e| CacheError::MoveFailed {
        from: source.to_path_buf(),
        to: destination.to_path_buf(),
        reason: e.to_string(),
    })?;

    if let Err(e) = fs::remove_dir_all(source) {
        warn!("Failed to remove old cache directory {}: {}", source.display(), e);
    }
    Ok(())
}

fn merge_directory(source: &Path, destination: &Path) -> std::io::Result<()> {
    fs::create_dir_all(destination)?;

    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let from = entry.path();
        let to = destination.join(entry.file_name());

        if entry.file_type()?.is_dir() {
            merge_directory(&from, &to)?;
        } else if !to.exists() {
            fs::copy(&from, &to)?;
            fs::remove_file(&from)?;
        }
    }
    Ok(())
}
