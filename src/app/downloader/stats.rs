//! Download coordinator statistics

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the coordinator
#[derive(Debug, Default)]
pub(crate) struct DownloadCounters {
    pub started: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub cancelled: AtomicU64,
    pub deduplicated: AtomicU64,
    pub blacklist_rejections: AtomicU64,
    pub bytes_received: AtomicU64,
}

impl DownloadCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }
}

/// Snapshot of coordinator activity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloaderStats {
    /// Operations waiting for a slot
    pub queued: usize,
    /// Operations currently on the network
    pub in_flight: usize,
    /// Operations started since creation
    pub started: u64,
    /// Operations that delivered data
    pub completed: u64,
    /// Operations that failed
    pub failed: u64,
    /// Operations dropped because every caller cancelled
    pub cancelled: u64,
    /// Fetches that joined an operation already in progress
    pub deduplicated: u64,
    /// Fetches rejected because their URL was blacklisted
    pub blacklist_rejections: u64,
    /// Body bytes received across all operations
    pub bytes_received: u64,
    /// Whether the queue is suspended
    pub suspended: bool,
}

impl DownloaderStats {
    pub(crate) fn from_counters(
        counters: &DownloadCounters,
        queued: usize,
        in_flight: usize,
        suspended: bool,
    ) -> Self {
        Self {
            queued,
            in_flight,
            started: counters.started.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            cancelled: counters.cancelled.load(Ordering::Relaxed),
            deduplicated: counters.deduplicated.load(Ordering::Relaxed),
            blacklist_rejections: counters.blacklist_rejections.load(Ordering::Relaxed),
            bytes_received: counters.bytes_received.load(Ordering::Relaxed),
            suspended,
        }
    }

    /// Success rate over finished operations, as a percentage
    pub fn success_rate(&self) -> f64 {
        let finished = self.completed + self.failed;
        if finished == 0 {
            return 0.0;
        }
        self.completed as f64 / finished as f64 * 100.0
    }
}

impl fmt::Display for DownloaderStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Downloads: {} in flight, {} queued, {} completed, {} failed, {} cancelled, {} shared",
            self.in_flight, self.queued, self.completed, self.failed, self.cancelled, self.deduplicated
        )
    }
}
