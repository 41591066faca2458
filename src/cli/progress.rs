//! Progress display for prefetch batches
//!
//! Renders an indicatif progress bar on an interactive terminal and falls
//! back to periodic text lines otherwise. The display consumes the event
//! stream of a [`PrefetchToken`](crate::app::PrefetchToken).

use std::io::IsTerminal;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use crate::app::{CacheType, PrefetchEvent, PrefetchStats};
use crate::errors::{AppError, ImageResult, Result};

/// Interval between text-mode progress lines
const TEXT_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Configuration for progress display
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Enable the visual progress bar
    pub enable_progress_bar: bool,
    /// Print a line per failed URL
    pub show_failures: bool,
    /// Suppress all output except the summary
    pub quiet: bool,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            enable_progress_bar: true,
            show_failures: true,
            quiet: false,
        }
    }
}

/// Tallies of where prefetched images came from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceCounts {
    pub memory: usize,
    pub disk: usize,
    pub network: usize,
    pub failed: usize,
}

impl SourceCounts {
    fn record(&mut self, result: &ImageResult<CacheType>) {
        match result {
            Ok(CacheType::Memory) => self.memory += 1,
            Ok(CacheType::Disk) | Ok(CacheType::All) => self.disk += 1,
            Ok(CacheType::None) => self.network += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Prefetch progress display
pub struct ProgressDisplay {
    config: ProgressConfig,
    bar: Option<ProgressBar>,
    counts: SourceCounts,
    failures: Vec<(String, String)>,
    last_report: Instant,
}

impl ProgressDisplay {
    /// Create a display for a batch of `total` URLs
    ///
    /// # Errors
    ///
    /// Returns `AppError` if the progress bar template is invalid
    pub fn start(config: ProgressConfig, total: usize) -> Result<Self> {
        let bar = if config.enable_progress_bar && !config.quiet && std::io::stderr().is_terminal()
        {
            let bar = ProgressBar::new(total as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template(
                        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
                    )
                    .map_err(|e| AppError::generic(format!("Progress bar template error: {}", e)))?
                    .progress_chars("##-"),
            );
            bar.enable_steady_tick(Duration::from_millis(120));
            Some(bar)
        } else {
            None
        };

        debug!("Progress display started for {} URLs", total);

        Ok(Self {
            config,
            bar,
            counts: SourceCounts::default(),
            failures: Vec::new(),
            last_report: Instant::now(),
        })
    }

    /// Apply one prefetch event
    pub fn update(&mut self, event: &PrefetchEvent) {
        let PrefetchEvent::Progress { url, result, stats } = event else {
            return;
        };

        self.counts.record(result);
        if let Err(e) = result {
            self.failures.push((url.clone(), e.to_string()));
        }

        match &self.bar {
            Some(bar) => {
                bar.set_position(stats.finished_count as u64);
                bar.set_message(short_name(url));
            }
            None if !self.config.quiet => {
                if self.last_report.elapsed() >= TEXT_REPORT_INTERVAL {
                    eprintln!(
                        "Progress: {}/{} URLs ({:.1}%)",
                        stats.finished_count,
                        stats.total_count,
                        stats.completion_percentage()
                    );
                    self.last_report = Instant::now();
                }
            }
            None => {}
        }
    }

    /// Tear down the bar and print the summary
    pub fn finish(self, stats: &PrefetchStats) -> SourceCounts {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }

        if !self.config.quiet && self.config.show_failures {
            for (url, error) in &self.failures {
                eprintln!("  failed: {} ({})", url, error);
            }
        }

        println!("{}", stats);
        if !self.config.quiet {
            println!(
                "  memory: {}  disk: {}  network: {}  failed: {}",
                self.counts.memory, self.counts.disk, self.counts.network, self.counts.failed
            );
        }

        self.counts
    }

    /// Counts recorded so far
    pub fn counts(&self) -> &SourceCounts {
        &self.counts
    }
}

/// Last path segment of a URL, for the bar message
fn short_name(url: &str) -> String {
    let trimmed = url.split(['?', '#']).next().unwrap_or(url);
    trimmed
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(trimmed)
        .to_string()
}
