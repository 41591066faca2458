//! Cache file naming
//!
//! Every disk entry lives at a path derived only from its key, so lookups
//! never scan the directory. The file name is the MD5 digest of the key in
//! hex, followed by the key's own extension when it has a short one.

use std::path::{Path, PathBuf};

use crate::constants::cache;

/// Path generation utility for cache files
pub struct PathGenerator;

impl PathGenerator {
    /// Deterministic file name for a cache key
    ///
    /// Structure: `{md5(key)}` or `{md5(key)}.{ext}` when the key's path
    /// component ends in a short alphanumeric extension.
    pub fn file_name_for_key(key: &str) -> String {
        let digest = format!("{:x}", md5::compute(key.as_bytes()));

        match Self::key_extension(key) {
            Some(extension) => format!("{}.{}", digest, extension),
            None => digest,
        }
    }

    /// Full path of the primary payload for a key
    pub fn path_for_key(root: &Path, key: &str) -> PathBuf {
        root.join(Self::file_name_for_key(key))
    }

    /// Directory holding extended-data sidecars
    pub fn extended_data_dir(root: &Path) -> PathBuf {
        root.join(cache::EXTENDED_DATA_DIR)
    }

    /// Full path of the extended-data sidecar for a key
    pub fn extended_path_for_key(root: &Path, key: &str) -> PathBuf {
        Self::extended_data_dir(root).join(Self::file_name_for_key(key))
    }

    /// Extract a short extension from the path part of a key
    fn key_extension(key: &str) -> Option<&str> {
        // Ignore query and fragment so `a.png?size=2` keeps `png`
        let path = key.split(['?', '#']).next().unwrap_or(key);
        let last_segment = path.rsplit('/').next().unwrap_or(path);
        let (_, extension) = last_segment.rsplit_once('.')?;

        let valid = !extension.is_empty()
            && extension.len() <= cache::MAX_FILE_EXTENSION_LEN
            && extension.chars().all(|c| c.is_ascii_alphanumeric());

        valid.then_some(extension)
    }
}
