//! Prefetch batch statistics

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress of one prefetch batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefetchStats {
    /// URLs in the batch
    pub total_count: usize,
    /// URLs resolved so far, whatever the outcome
    pub finished_count: usize,
    /// Resolved URLs that did not produce an image
    pub skipped_count: usize,
    /// When the batch started
    pub started_at: DateTime<Utc>,
    /// Time since the batch started, or its total run time once complete
    pub duration: Duration,
}

impl Default for PrefetchStats {
    fn default() -> Self {
        Self::new(0)
    }
}

impl PrefetchStats {
    pub fn new(total_count: usize) -> Self {
        Self {
            total_count,
            finished_count: 0,
            skipped_count: 0,
            started_at: Utc::now(),
            duration: Duration::ZERO,
        }
    }

    /// URLs that were loaded successfully
    pub fn succeeded_count(&self) -> usize {
        self.finished_count.saturating_sub(self.skipped_count)
    }

    /// Calculate completion percentage
    pub fn completion_percentage(&self) -> f64 {
        if self.total_count == 0 {
            return 100.0;
        }
        (self.finished_count as f64 / self.total_count as f64) * 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.finished_count >= self.total_count
    }

    pub(crate) fn record(&mut self, succeeded: bool) {
        self.finished_count += 1;
        if !succeeded {
            self.skipped_count += 1;
        }
        self.update_duration();
    }

    /// Update duration from start time
    pub fn update_duration(&mut self) {
        self.duration = Utc::now()
            .signed_duration_since(self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
    }
}

impl fmt::Display for PrefetchStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} prefetched ({} skipped) in {:.1}s",
            self.finished_count,
            self.total_count,
            self.skipped_count,
            self.duration.as_secs_f64()
        )
    }
}
