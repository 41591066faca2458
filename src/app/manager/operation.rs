//! Cancelable handle over one `RequestManager::load`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::app::cache::CacheType;
use crate::app::downloader::{DownloadProgress, DownloadToken};
use crate::app::image::Image;
use crate::errors::{ImageError, ImageResult};

/// Image delivered by a load
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub image: Option<Arc<Image>>,
    /// Raw bytes, when available
    pub data: Option<Bytes>,
    /// Tier the image came from; `None` means the network
    pub cache_type: CacheType,
    pub url: String,
    /// False for progressive and refresh-intermediate deliveries
    pub finished: bool,
}

/// Events of a load, ending with exactly one `Finished`
#[derive(Debug, Clone)]
pub enum LoadEvent {
    Progress(DownloadProgress),
    Intermediate(LoadedImage),
    Finished(ImageResult<LoadedImage>),
}

/// Shared cancellation state of a load
///
/// Holds whichever leg is outstanding: the download token while the network
/// leg runs, and the pipeline task throughout.
#[derive(Default)]
pub(crate) struct OperationControl {
    cancelled: AtomicBool,
    finished: AtomicBool,
    download: Mutex<Option<DownloadToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl OperationControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(token) = self.download.lock().take() {
            token.cancel();
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
        self.download.lock().take();
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Track the download leg; returns false (and cancels it) if the load
    /// was already cancelled
    pub fn set_download(&self, token: DownloadToken) -> bool {
        let mut slot = self.download.lock();
        if self.is_cancelled() {
            token.cancel();
            return false;
        }
        *slot = Some(token);
        true
    }

    pub fn clear_download(&self) {
        self.download.lock().take();
    }

    pub fn set_task(&self, task: JoinHandle<()>) {
        let mut slot = self.task.lock();
        if self.is_cancelled() {
            task.abort();
            return;
        }
        *slot = Some(task);
    }
}

/// Sends events unless the load was cancelled
pub(crate) struct LoadEmitter {
    sender: mpsc::UnboundedSender<LoadEvent>,
    control: Arc<OperationControl>,
}

impl LoadEmitter {
    pub fn new(sender: mpsc::UnboundedSender<LoadEvent>, control: Arc<OperationControl>) -> Self {
        Self { sender, control }
    }

    pub fn control(&self) -> &Arc<OperationControl> {
        &self.control
    }

    pub fn emit(&self, event: LoadEvent) {
        if !self.control.is_cancelled() {
            let _ = self.sender.send(event);
        }
    }

    pub fn finish(&self, result: ImageResult<LoadedImage>) {
        self.emit(LoadEvent::Finished(result));
        self.control.mark_finished();
    }
}

/// Handle returned by `RequestManager::load`
///
/// Cancelling stops whichever of the cache query and download is
/// outstanding. No event is delivered after `cancel` returns.
pub struct CombinedOperation {
    pub events: mpsc::UnboundedReceiver<LoadEvent>,
    control: Arc<OperationControl>,
}

impl std::fmt::Debug for CombinedOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombinedOperation")
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.control.is_finished())
            .finish()
    }
}

impl CombinedOperation {
    pub(crate) fn new(
        events: mpsc::UnboundedReceiver<LoadEvent>,
        control: Arc<OperationControl>,
    ) -> Self {
        Self { events, control }
    }

    /// Operation that already failed, without touching cache or network
    pub(crate) fn failed(error: ImageError) -> Self {
        let (sender, events) = mpsc::unbounded_channel();
        let control = OperationControl::new();
        LoadEmitter::new(sender, control.clone()).finish(Err(error));
        Self { events, control }
    }

    /// Cancel the load; calling it again has no effect
    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    /// Handle that cancels this load from elsewhere, e.g. while `wait` runs
    pub fn cancel_handle(&self) -> LoadCancelHandle {
        LoadCancelHandle {
            control: self.control.clone(),
        }
    }

    /// Receive the next event, or `None` once the stream is over
    pub async fn next_event(&mut self) -> Option<LoadEvent> {
        if self.is_cancelled() {
            return None;
        }
        let event = self.events.recv().await?;
        if self.is_cancelled() {
            return None;
        }
        Some(event)
    }

    /// Drain intermediate events and return the final result
    pub async fn wait(mut self) -> ImageResult<LoadedImage> {
        while let Some(event) = self.next_event().await {
            if let LoadEvent::Finished(result) = event {
                return result;
            }
        }
        Err(ImageError::Cancelled)
    }
}

/// Detached canceller for a `CombinedOperation`
#[derive(Clone)]
pub struct LoadCancelHandle {
    control: Arc<OperationControl>,
}

impl LoadCancelHandle {
    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }
}

impl std::fmt::Debug for LoadCancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadCancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
