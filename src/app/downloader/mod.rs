//! Concurrent, de-duplicating image downloader
//!
//! # Key Features
//!
//! - **Shared operations**: identical requests issued concurrently hit the network once
//! - **Per-caller cancellation**: an operation stops only when its last caller cancels
//! - **Bounded concurrency**: FIFO or LIFO queue with priority re-ordering
//! - **Validation**: acceptable status range, optional content-type allow-set
//! - **Hooks**: request/response modifiers, payload decryptor, blacklist policy
//! - **Progressive delivery**: throttled progress events with partial data and images
//!
//! # Module Organization
//!
//! - [`config`] - Configuration, builder, and presets
//! - [`types`] - Options, requests, and events
//! - [`transport`] - Transport trait and the reqwest implementation
//! - [`hooks`] - Request, response, and payload hooks
//! - [`blacklist`] - Failed URL set and blacklist policy
//! - [`token`] - Per-caller tokens and handles
//! - [`coordinator`] - Operation bookkeeping and execution
//! - [`stats`] - Coordinator statistics
//!
//! # Examples
//!
//! ```rust,no_run
//! use image_fetcher::app::downloader::{
//!     DownloadCoordinator, DownloaderConfig, DownloaderOptions, FetchContext,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = DownloadCoordinator::with_http(DownloaderConfig::default())?;
//! let handle = coordinator.fetch(
//!     "https://example.com/image.png",
//!     DownloaderOptions::empty(),
//!     FetchContext::default(),
//! );
//! let downloaded = handle.wait().await?;
//! println!("{} bytes", downloaded.data.len());
//! # Ok(())
//! # }
//! ```

pub mod blacklist;
pub mod config;
pub mod coordinator;
pub mod hooks;
pub mod stats;
pub mod token;
pub mod transport;
pub mod types;

// Re-export main public API
pub use blacklist::{BlacklistPolicy, DefaultBlacklistPolicy, FailedUrls};
pub use config::{ConfigPresets, DownloaderConfig, DownloaderConfigBuilder, ExecutionOrder};
pub use coordinator::{parse_download_url, DownloadCoordinator};
pub use hooks::{DataDecryptor, RequestModifier, ResponseModifier, XorDecryptor};
pub use stats::DownloaderStats;
pub use token::{DownloadHandle, DownloadToken};
pub use transport::{ClientConfig, HttpTransport, Transport, TransportResponse};
pub use types::{
    DownloadEvent, DownloadPriority, DownloadProgress, DownloadRequest, DownloadedData,
    DownloaderOptions, FetchContext, OperationKey, OperationState, ResponseHead,
};
