//! Command-line argument parsing for Image Fetcher
//!
//! This module defines the CLI structure using clap derive macros: loading
//! images through the cache, warming the cache in bulk, and maintaining the
//! cache directory.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::app::{CacheType, ImageOptions};

/// Image Fetcher - cached, de-duplicating image downloads
#[derive(Parser, Debug)]
#[command(
    name = "image_fetcher",
    version,
    about = "Download images through a two-tier memory and disk cache",
    long_about = "Loads images over HTTP through a memory and disk cache.
Concurrent requests for the same URL share one download, failed URLs are remembered,
and whole lists of URLs can be prefetched into the cache."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Cache directory path (overrides the configuration file)
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load images, from cache when possible
    Fetch(FetchArgs),

    /// Warm the cache with a list of URLs
    Prefetch(PrefetchArgs),

    /// Cache maintenance
    Cache(CacheArgs),

    /// Configuration file management
    Config(ConfigArgs),
}

/// Arguments for the fetch command
#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    /// Image URLs to load
    #[arg(value_name = "URL", required = true)]
    pub urls: Vec<String>,

    /// Revalidate cached images with the server
    #[arg(long)]
    pub refresh: bool,

    /// Never touch the network
    #[arg(long, conflicts_with = "refresh")]
    pub from_cache_only: bool,

    /// Retry URLs that failed before
    #[arg(long)]
    pub retry_failed: bool,
}

/// Arguments for the prefetch command
#[derive(Args, Debug, Clone)]
pub struct PrefetchArgs {
    /// Image URLs to prefetch
    #[arg(value_name = "URL")]
    pub urls: Vec<String>,

    /// File with one URL per line (`#` starts a comment)
    #[arg(short, long, value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Number of URLs loaded at once
    #[arg(short, long)]
    pub concurrency: Option<usize>,
}

/// Arguments for cache management
#[derive(Args, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache management actions
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show cache statistics and location
    Info {
        /// Print the statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove cached images
    Clear {
        /// Clear only the memory tier
        #[arg(long, conflicts_with = "disk")]
        memory: bool,

        /// Clear only the disk tier
        #[arg(long)]
        disk: bool,
    },

    /// Remove expired entries and enforce the size limit
    Expire,

    /// Show the disk path for a cache key
    Path {
        /// Cache key, usually the image URL
        #[arg(value_name = "KEY")]
        key: String,
    },

    /// Move the disk cache to another directory
    Move {
        /// Destination directory
        #[arg(value_name = "DIR")]
        destination: PathBuf,
    },
}

/// Arguments for configuration management
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a default configuration file if none exists
    Init,

    /// Print the effective configuration
    Show,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Logging level selected by flags, if any flag was given
    pub fn log_level_override(&self) -> Option<tracing::Level> {
        if self.global.quiet {
            Some(tracing::Level::ERROR)
        } else if self.global.very_verbose {
            Some(tracing::Level::DEBUG)
        } else if self.global.verbose {
            Some(tracing::Level::INFO)
        } else {
            None
        }
    }
}

impl FetchArgs {
    /// Load options selected by the flags
    pub fn options(&self) -> ImageOptions {
        let mut options = ImageOptions::empty();
        options.set(ImageOptions::REFRESH_CACHED, self.refresh);
        options.set(ImageOptions::FROM_CACHE_ONLY, self.from_cache_only);
        options.set(ImageOptions::RETRY_FAILED, self.retry_failed);
        options
    }
}

impl PrefetchArgs {
    pub fn validate(&self) -> Result<(), String> {
        if self.urls.is_empty() && self.file.is_none() {
            return Err("Provide URLs or --file".to_string());
        }
        if self.concurrency == Some(0) {
            return Err("Concurrency must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl CacheAction {
    /// Tiers affected by a clear request
    pub fn clear_target(memory: bool, disk: bool) -> CacheType {
        match (memory, disk) {
            (true, false) => CacheType::Memory,
            (false, true) => CacheType::Disk,
            _ => CacheType::All,
        }
    }
}

/// Parse a URL list, skipping blank lines and `#` comments
pub fn parse_url_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
