//! Per-caller handles on shared download operations

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use url::Url;

use crate::errors::{DownloadError, DownloadResult};

use super::coordinator::CoordinatorInner;
use super::types::{DownloadEvent, DownloadedData};

/// Cancels one caller's interest in a download
///
/// Cancelling removes this caller's event channel. The network operation
/// itself stops only when no interested caller remains.
#[derive(Clone)]
pub struct DownloadToken {
    pub(crate) operation_id: u64,
    pub(crate) subscriber_id: u64,
    url: Option<Url>,
    cancelled: Arc<AtomicBool>,
    coordinator: Weak<CoordinatorInner>,
}

impl std::fmt::Debug for DownloadToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadToken")
            .field("operation_id", &self.operation_id)
            .field("subscriber_id", &self.subscriber_id)
            .field("url", &self.url.as_ref().map(Url::as_str))
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl DownloadToken {
    pub(crate) fn new(
        operation_id: u64,
        subscriber_id: u64,
        url: Option<Url>,
        coordinator: Weak<CoordinatorInner>,
    ) -> Self {
        Self {
            operation_id,
            subscriber_id,
            url,
            cancelled: Arc::new(AtomicBool::new(false)),
            coordinator,
        }
    }

    /// Token for a fetch that failed before an operation existed
    pub(crate) fn detached(url: Option<Url>) -> Self {
        Self::new(0, 0, url, Weak::new())
    }

    /// Withdraw this caller; calling it again has no effect
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(coordinator) = self.coordinator.upgrade() {
            coordinator.unsubscribe(self.operation_id, self.subscriber_id);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// URL of the download, when it could be parsed
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }
}

/// Token plus the caller's event stream
#[derive(Debug)]
pub struct DownloadHandle {
    pub token: DownloadToken,
    pub events: mpsc::UnboundedReceiver<DownloadEvent>,
}

impl DownloadHandle {
    /// Receive the next event, or `None` once the stream is over
    ///
    /// Nothing is delivered after the token has been cancelled.
    pub async fn next_event(&mut self) -> Option<DownloadEvent> {
        if self.token.is_cancelled() {
            return None;
        }
        let event = self.events.recv().await?;
        if self.token.is_cancelled() {
            return None;
        }
        Some(event)
    }

    /// Drain progress events and return the final result
    ///
    /// Resolves to `DownloadError::Cancelled` when this caller cancelled or
    /// the coordinator dropped the operation.
    pub async fn wait(mut self) -> DownloadResult<DownloadedData> {
        while let Some(event) = self.next_event().await {
            if let DownloadEvent::Finished(result) = event {
                return result;
            }
        }
        Err(DownloadError::Cancelled)
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}
