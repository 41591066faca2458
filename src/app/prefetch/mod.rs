//! Cache warming for batches of URLs
//!
//! # Module Organization
//!
//! - [`config`] - Batch concurrency and load options
//! - [`coordinator`] - Batch execution and tokens
//! - [`stats`] - Per-batch statistics

pub mod config;
pub mod coordinator;
pub mod stats;

pub use config::PrefetchConfig;
pub use coordinator::{PrefetchCoordinator, PrefetchEvent, PrefetchProgressFn, PrefetchToken};
pub use stats::PrefetchStats;
