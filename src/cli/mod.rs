//! Command-line interface components
//!
//! This module contains CLI-specific code for the Image Fetcher application,
//! including argument parsing, command handlers and progress display.

pub mod args;
pub mod commands;
pub mod progress;

pub use args::{
    CacheAction, CacheArgs, Cli, Commands, ConfigAction, ConfigArgs, FetchArgs, GlobalArgs,
    PrefetchArgs,
};
pub use commands::{handle_cache, handle_config, handle_fetch, handle_prefetch, Pipeline};
pub use progress::{ProgressConfig, ProgressDisplay, SourceCounts};
