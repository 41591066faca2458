//! Failed URL tracking
//!
//! URLs that failed permanently are recorded so later fetches fail fast
//! without touching the network. The set is shared between the download
//! coordinator and the request manager.

use std::collections::HashSet;

use parking_lot::RwLock;
use tracing::debug;

use crate::errors::DownloadError;

/// Decides whether a failure should blacklist its URL
pub trait BlacklistPolicy: Send + Sync {
    fn should_block(&self, url: &str, error: &DownloadError) -> bool;
}

impl<F> BlacklistPolicy for F
where
    F: Fn(&str, &DownloadError) -> bool + Send + Sync,
{
    fn should_block(&self, url: &str, error: &DownloadError) -> bool {
        self(url, error)
    }
}

/// Blocks permanent failures, never transient ones
///
/// Permanent: unparseable URLs, undecodable or undecryptable payloads,
/// rejected content types, and 4xx responses other than 408 and 429.
/// Transport failures are blocked only when they are not transient.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBlacklistPolicy;

impl BlacklistPolicy for DefaultBlacklistPolicy {
    fn should_block(&self, _url: &str, error: &DownloadError) -> bool {
        match error {
            DownloadError::InvalidUrl { .. }
            | DownloadError::BadImageData { .. }
            | DownloadError::DecryptionFailed
            | DownloadError::InvalidContentType { .. } => true,
            DownloadError::InvalidStatusCode { status } => {
                (400..500).contains(status) && *status != 408 && *status != 429
            }
            DownloadError::Transport { kind, .. } => !kind.is_transient(),
            DownloadError::Blacklisted { .. }
            | DownloadError::InvalidOperation { .. }
            | DownloadError::InvalidResponse { .. }
            | DownloadError::NotModified
            | DownloadError::Cancelled => false,
        }
    }
}

/// Thread-safe set of blacklisted URLs
#[derive(Debug, Default)]
pub struct FailedUrls {
    urls: RwLock<HashSet<String>>,
}

impl FailedUrls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a URL; returns true if it was not already present
    pub fn insert(&self, url: &str) -> bool {
        let inserted = self.urls.write().insert(url.to_string());
        if inserted {
            debug!("Blacklisted {}", url);
        }
        inserted
    }

    pub fn remove(&self, url: &str) -> bool {
        self.urls.write().remove(url)
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.read().contains(url)
    }

    pub fn clear(&self) {
        self.urls.write().clear();
    }

    pub fn len(&self) -> usize {
        self.urls.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.read().is_empty()
    }

    /// Copy of the current set
    pub fn snapshot(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.urls.read().iter().cloned().collect();
        urls.sort();
        urls
    }
}
