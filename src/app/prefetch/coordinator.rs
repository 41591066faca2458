//! Batch prefetching through the request manager
//!
//! A batch loads its URLs with bounded concurrency and reports progress
//! per resolved URL. Batches never share state, so several may run against
//! the same manager at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::app::cache::CacheType;
use crate::app::manager::{ImageOptions, LoadCancelHandle, LoadContext, RequestManager};
use crate::errors::{ImageError, ImageResult};

use super::config::PrefetchConfig;
use super::stats::PrefetchStats;

/// Called once per resolved URL with the batch statistics so far
pub type PrefetchProgressFn = Arc<dyn Fn(&PrefetchStats, &str) + Send + Sync>;

/// Progress of a batch, ending with exactly one `Finished`
#[derive(Debug, Clone)]
pub enum PrefetchEvent {
    /// One URL resolved; `result` is the tier it came from or the error
    Progress {
        url: String,
        result: ImageResult<CacheType>,
        stats: PrefetchStats,
    },
    Finished(PrefetchStats),
}

struct BatchState {
    cancelled: AtomicBool,
    stats: Mutex<PrefetchStats>,
    loads: Mutex<HashMap<usize, LoadCancelHandle>>,
    done: watch::Sender<bool>,
}

impl BatchState {
    fn new(total: usize) -> (Arc<Self>, watch::Receiver<bool>) {
        let (done, receiver) = watch::channel(false);
        let state = Arc::new(Self {
            cancelled: AtomicBool::new(false),
            stats: Mutex::new(PrefetchStats::new(total)),
            loads: Mutex::new(HashMap::new()),
            done,
        });
        (state, receiver)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let loads: Vec<_> = self.loads.lock().drain().map(|(_, load)| load).collect();
        for load in loads {
            load.cancel();
        }
    }

    fn stats(&self) -> PrefetchStats {
        let mut stats = self.stats.lock().clone();
        if !stats.is_complete() {
            stats.update_duration();
        }
        stats
    }

    fn complete(&self) -> PrefetchStats {
        let stats = {
            let mut stats = self.stats.lock();
            stats.update_duration();
            stats.clone()
        };
        self.done.send_replace(true);
        stats
    }
}

/// Handle on one prefetch batch
pub struct PrefetchToken {
    pub events: mpsc::UnboundedReceiver<PrefetchEvent>,
    state: Arc<BatchState>,
    done: watch::Receiver<bool>,
}

impl std::fmt::Debug for PrefetchToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefetchToken")
            .field("cancelled", &self.is_cancelled())
            .field("stats", &self.stats())
            .finish()
    }
}

impl PrefetchToken {
    /// Cancel every outstanding load of this batch
    ///
    /// URLs not yet started are counted as skipped.
    pub fn cancel(&self) {
        self.state.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    pub fn stats(&self) -> PrefetchStats {
        self.state.stats()
    }

    /// Wait until every URL has resolved
    pub async fn wait(mut self) -> PrefetchStats {
        while !*self.done.borrow_and_update() {
            if self.done.changed().await.is_err() {
                break;
            }
        }
        self.state.stats()
    }
}

/// Prefetches batches of URLs into the cache
pub struct PrefetchCoordinator {
    manager: RequestManager,
    config: PrefetchConfig,
    context: LoadContext,
    batches: Arc<Mutex<HashMap<u64, Arc<BatchState>>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for PrefetchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefetchCoordinator")
            .field("config", &self.config)
            .field("active_batches", &self.active_batches())
            .finish()
    }
}

impl PrefetchCoordinator {
    pub fn new(manager: RequestManager, config: PrefetchConfig) -> Self {
        Self {
            manager,
            config,
            context: LoadContext::default(),
            batches: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Context passed to every load
    pub fn with_context(mut self, context: LoadContext) -> Self {
        self.context = context;
        self
    }

    pub fn config(&self) -> &PrefetchConfig {
        &self.config
    }

    pub fn manager(&self) -> &RequestManager {
        &self.manager
    }

    /// Batches that have not finished yet
    pub fn active_batches(&self) -> usize {
        self.batches.lock().len()
    }

    /// Start prefetching a batch of URLs
    ///
    /// Each URL counts as finished once its load resolves, whether it
    /// succeeded, failed, or was cancelled. Failures count as skipped.
    pub fn prefetch_urls<I, S>(&self, urls: I, progress: Option<PrefetchProgressFn>) -> PrefetchToken
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let urls: Vec<String> = urls.into_iter().map(Into::into).collect();
        let (state, done) = BatchState::new(urls.len());
        let (sender, events) = mpsc::unbounded_channel();
        let token = PrefetchToken {
            events,
            state: state.clone(),
            done,
        };

        let runtime = match Handle::try_current() {
            Ok(runtime) if !urls.is_empty() => runtime,
            _ => {
                if !urls.is_empty() {
                    state.cancel();
                    let mut stats = state.stats.lock();
                    for _ in &urls {
                        stats.record(false);
                    }
                }
                let _ = sender.send(PrefetchEvent::Finished(state.complete()));
                return token;
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.batches.lock().insert(id, state.clone());
        info!("Prefetching {} URLs (batch {})", urls.len(), id);

        let batch = Batch {
            manager: self.manager.clone(),
            options: self.config.options,
            context: self.context.clone(),
            concurrency: self.config.max_concurrent_prefetch_count.max(1),
            state,
            sender,
            progress,
        };
        let batches = self.batches.clone();
        runtime.spawn(async move {
            let stats = batch.run(urls).await;
            batches.lock().remove(&id);
            info!("Prefetch batch {} finished: {}", id, stats);
        });

        token
    }

    /// Cancel every batch started by this coordinator
    pub fn cancel_prefetching(&self) {
        let batches: Vec<_> = self.batches.lock().values().cloned().collect();
        for batch in batches {
            batch.cancel();
        }
    }
}

struct Batch {
    manager: RequestManager,
    options: ImageOptions,
    context: LoadContext,
    concurrency: usize,
    state: Arc<BatchState>,
    sender: mpsc::UnboundedSender<PrefetchEvent>,
    progress: Option<PrefetchProgressFn>,
}

impl Batch {
    async fn run(self, urls: Vec<String>) -> PrefetchStats {
        let this = &self;
        futures::stream::iter(urls.into_iter().enumerate())
            .map(move |(index, url)| async move {
                let result = this.load(index, &url).await;
                (url, result)
            })
            .buffer_unordered(self.concurrency)
            .for_each(move |(url, result)| async move {
                this.record(url, result);
            })
            .await;

        let stats = self.state.complete();
        let _ = self.sender.send(PrefetchEvent::Finished(stats.clone()));
        stats
    }

    async fn load(&self, index: usize, url: &str) -> ImageResult<CacheType> {
        if self.state.is_cancelled() {
            return Err(ImageError::Cancelled);
        }
        let operation = self
            .manager
            .load(Some(url), self.options, self.context.clone());
        {
            let mut loads = self.state.loads.lock();
            if self.state.is_cancelled() {
                operation.cancel();
            } else {
                loads.insert(index, operation.cancel_handle());
            }
        }
        let result = operation.wait().await;
        self.state.loads.lock().remove(&index);
        result.map(|loaded| loaded.cache_type)
    }

    fn record(&self, url: String, result: ImageResult<CacheType>) {
        let stats = {
            let mut stats = self.state.stats.lock();
            stats.record(result.is_ok());
            stats.clone()
        };
        if let Err(e) = &result {
            debug!("Prefetch of {} skipped: {}", url, e);
        }
        if self.state.is_cancelled() {
            return;
        }
        if let Some(progress) = &self.progress {
            progress(&stats, &url);
        }
        let _ = self.sender.send(PrefetchEvent::Progress { url, result, stats });
    }
}
