//! Request, event, and option types for the download coordinator

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::app::image::{DecodeOptions, Image};
use crate::errors::DownloadResult;

use super::hooks::{DataDecryptor, RequestModifier, ResponseModifier};

bitflags! {
    /// Per-request downloader options
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct DownloaderOptions: u32 {
        const LOW_PRIORITY = 1 << 0;
        const PROGRESSIVE_LOAD = 1 << 1;
        const IGNORE_CACHED_RESPONSE = 1 << 2;
        const CONTINUE_IN_BACKGROUND = 1 << 3;
        const HANDLE_COOKIES = 1 << 4;
        const ALLOW_INVALID_SSL_CERTIFICATES = 1 << 5;
        const HIGH_PRIORITY = 1 << 6;
        const SCALE_DOWN_LARGE_IMAGES = 1 << 7;
        const AVOID_DECODE_IMAGE = 1 << 8;
        const DECODE_FIRST_FRAME_ONLY = 1 << 9;
        const PRELOAD_ALL_FRAMES = 1 << 10;
    }
}

impl DownloaderOptions {
    /// Options that change the request sent on the wire
    pub const WIRE_RELEVANT: Self = Self::HANDLE_COOKIES
        .union(Self::ALLOW_INVALID_SSL_CERTIFICATES)
        .union(Self::IGNORE_CACHED_RESPONSE);

    /// Subset used to decide whether two fetches can share one operation
    pub fn wire_relevant(&self) -> Self {
        self.intersection(Self::WIRE_RELEVANT)
    }

    /// Queue priority implied by the options
    pub fn priority(&self) -> DownloadPriority {
        if self.contains(Self::HIGH_PRIORITY) {
            DownloadPriority::High
        } else if self.contains(Self::LOW_PRIORITY) {
            DownloadPriority::Low
        } else {
            DownloadPriority::Normal
        }
    }
}

/// Queue priority of an operation that has not started yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// Lifecycle of a tracked network operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Idle,
    Enqueued,
    InFlight,
    Completed,
    Failed,
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Key identifying operations that can be shared
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationKey {
    pub url: String,
    pub options: DownloaderOptions,
}

impl OperationKey {
    pub fn new(url: &Url, options: DownloaderOptions) -> Self {
        Self {
            url: url.as_str().to_string(),
            options: options.wire_relevant(),
        }
    }
}

/// A request as handed to the transport
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRequest {
    pub url: Url,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
    pub handle_cookies: bool,
    pub allow_invalid_certificates: bool,
    pub ignore_cached_response: bool,
    pub credentials: Option<(String, String)>,
}

impl DownloadRequest {
    /// Plain GET request with no extra headers
    pub fn new(url: Url, timeout: Duration) -> Self {
        Self {
            url,
            headers: BTreeMap::new(),
            timeout,
            handle_cookies: false,
            allow_invalid_certificates: false,
            ignore_cached_response: false,
            credentials: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Status line and headers of a response, before the body is read
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResponseHead {
    pub status: u16,
    pub content_type: Option<String>,
    pub expected_length: Option<u64>,
    pub headers: BTreeMap<String, String>,
}

/// Progress of a running download
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    /// Bytes received so far
    pub received: u64,
    /// Expected total, when the server announced it
    pub expected: Option<u64>,
    /// Bytes received so far, for progressive requests
    pub partial_data: Option<Bytes>,
    /// Partial decode of `partial_data`, when the coder supports it
    pub partial_image: Option<Arc<Image>>,
}

impl DownloadProgress {
    /// Fraction complete in `0.0..=1.0`, when the total is known
    pub fn fraction(&self) -> Option<f64> {
        match self.expected {
            Some(expected) if expected > 0 => {
                Some((self.received as f64 / expected as f64).min(1.0))
            }
            _ => None,
        }
    }
}

/// Body and metadata of a finished download
#[derive(Debug, Clone)]
pub struct DownloadedData {
    pub url: Url,
    pub data: Bytes,
    pub head: ResponseHead,
}

/// Event delivered to each caller of `fetch`
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    Progress(DownloadProgress),
    /// Terminal event, delivered exactly once
    Finished(DownloadResult<DownloadedData>),
}

/// Per-call settings that are not part of the wire request
///
/// Hooks set here take precedence over the coordinator's own hooks. When
/// several calls share one operation, the first caller's context is used.
#[derive(Clone, Default)]
pub struct FetchContext {
    /// Skip the blacklist check for this call
    pub retry_failed: bool,
    /// Decode parameters used for progressive partial images
    pub decode: DecodeOptions,
    pub request_modifier: Option<Arc<dyn RequestModifier>>,
    pub response_modifier: Option<Arc<dyn ResponseModifier>>,
    pub decryptor: Option<Arc<dyn DataDecryptor>>,
}

impl std::fmt::Debug for FetchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchContext")
            .field("retry_failed", &self.retry_failed)
            .field("decode", &self.decode)
            .field("request_modifier", &self.request_modifier.is_some())
            .field("response_modifier", &self.response_modifier.is_some())
            .field("decryptor", &self.decryptor.is_some())
            .finish()
    }
}
