//! Image Fetcher Library
//!
//! An asynchronous image loading pipeline: a two-tier memory/disk cache in
//! front of a concurrent, de-duplicating HTTP downloader, with post-decode
//! transformers and batch prefetching.

pub mod app;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;
pub mod prelude;

// Re-export commonly used types for convenience
pub use errors::{AppError, Result};
