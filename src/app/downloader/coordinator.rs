//! De-duplicating download coordinator
//!
//! Every distinct request (URL plus the options that change the wire
//! request) maps to one network operation. Callers that ask for the same
//! request while it is queued or in flight join the existing operation and
//! get their own event channel and token. An operation is aborted only when
//! its last caller cancels.
//!
//! Bookkeeping lives in a single mutex that is held only to register,
//! unregister, or dispatch operations, never across an `.await`.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::app::image::{DecodeOptions, Image, ImageCoder};
use crate::constants::{downloader, http};
use crate::errors::{DownloadError, DownloadResult};

use super::blacklist::{BlacklistPolicy, DefaultBlacklistPolicy, FailedUrls};
use super::config::{DownloaderConfig, ExecutionOrder};
use super::hooks::{DataDecryptor, RequestModifier, ResponseModifier};
use super::stats::{DownloadCounters, DownloaderStats};
use super::token::{DownloadHandle, DownloadToken};
use super::transport::{ClientConfig, HttpTransport, Transport};
use super::types::{
    DownloadEvent, DownloadPriority, DownloadProgress, DownloadRequest, DownloadedData,
    DownloaderOptions, FetchContext, OperationKey, OperationState,
};

/// Largest announced length used to pre-size the body buffer
const MAX_PREALLOCATION: u64 = 16 * 1024 * 1024;

type Subscriber = (u64, mpsc::UnboundedSender<DownloadEvent>);

struct Operation {
    key: OperationKey,
    url: Url,
    options: DownloaderOptions,
    context: FetchContext,
    state: OperationState,
    priority: DownloadPriority,
    sequence: u64,
    subscribers: Vec<Subscriber>,
    task: Option<JoinHandle<()>>,
}

struct CoordinatorState {
    operations: HashMap<u64, Operation>,
    by_key: HashMap<OperationKey, u64>,
    queue: Vec<u64>,
    in_flight: usize,
    suspended: bool,
    sequence: u64,
    /// Terminal state of recently ended operations, by URL
    settled: LruCache<String, OperationState>,
}

impl CoordinatorState {
    fn new() -> Self {
        let capacity =
            NonZeroUsize::new(downloader::SETTLED_STATE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            operations: HashMap::new(),
            by_key: HashMap::new(),
            queue: Vec::new(),
            in_flight: 0,
            suspended: false,
            sequence: 0,
            settled: LruCache::new(capacity),
        }
    }

    fn settle(&mut self, url: &Url, state: OperationState) {
        self.settled.put(url.to_string(), state);
    }

    /// Pop the queued operation to start next
    fn next_queued(&mut self, order: ExecutionOrder) -> Option<u64> {
        let index = self
            .queue
            .iter()
            .enumerate()
            .filter_map(|(index, id)| {
                self.operations
                    .get(id)
                    .map(|op| (index, op.priority, op.sequence))
            })
            .max_by(|a, b| {
                a.1.cmp(&b.1).then_with(|| match order {
                    ExecutionOrder::Fifo => b.2.cmp(&a.2),
                    ExecutionOrder::Lifo => a.2.cmp(&b.2),
                })
            })
            .map(|(index, _, _)| index)?;
        Some(self.queue.remove(index))
    }

    fn forget_key(&mut self, key: &OperationKey, id: u64) {
        if self.by_key.get(key) == Some(&id) {
            self.by_key.remove(key);
        }
    }
}

#[derive(Clone)]
struct CoordinatorHooks {
    coder: Option<Arc<dyn ImageCoder>>,
    request_modifier: Option<Arc<dyn RequestModifier>>,
    response_modifier: Option<Arc<dyn ResponseModifier>>,
    decryptor: Option<Arc<dyn DataDecryptor>>,
    blacklist_policy: Arc<dyn BlacklistPolicy>,
}

impl Default for CoordinatorHooks {
    fn default() -> Self {
        Self {
            coder: None,
            request_modifier: None,
            response_modifier: None,
            decryptor: None,
            blacklist_policy: Arc::new(DefaultBlacklistPolicy),
        }
    }
}

struct OperationJob {
    id: u64,
    url: Url,
    options: DownloaderOptions,
    context: FetchContext,
}

pub(crate) struct CoordinatorInner {
    config: DownloaderConfig,
    transport: Arc<dyn Transport>,
    hooks: RwLock<CoordinatorHooks>,
    failed_urls: Arc<FailedUrls>,
    state: Mutex<CoordinatorState>,
    counters: DownloadCounters,
    next_id: AtomicU64,
    runtime: OnceLock<Handle>,
}

/// Coordinates concurrent, de-duplicated image downloads
#[derive(Clone)]
pub struct DownloadCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl std::fmt::Debug for DownloadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadCoordinator")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl DownloadCoordinator {
    /// Create a coordinator on top of a transport
    pub fn new(config: DownloaderConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                config,
                transport,
                hooks: RwLock::new(CoordinatorHooks::default()),
                failed_urls: Arc::new(FailedUrls::new()),
                state: Mutex::new(CoordinatorState::new()),
                counters: DownloadCounters::default(),
                next_id: AtomicU64::new(1),
                runtime: OnceLock::new(),
            }),
        }
    }

    /// Create a coordinator backed by the reqwest transport
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` if the HTTP client cannot be built
    pub fn with_http(config: DownloaderConfig) -> DownloadResult<Self> {
        let client_config = ClientConfig {
            user_agent: config.user_agent.clone(),
            ..ClientConfig::default()
        };
        let transport = HttpTransport::new(client_config)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.inner.config
    }

    /// Coder used for progressive partial decodes
    pub fn set_coder(&self, coder: Arc<dyn ImageCoder>) {
        self.inner.hooks.write().coder = Some(coder);
    }

    pub fn set_request_modifier(&self, modifier: Option<Arc<dyn RequestModifier>>) {
        self.inner.hooks.write().request_modifier = modifier;
    }

    pub fn set_response_modifier(&self, modifier: Option<Arc<dyn ResponseModifier>>) {
        self.inner.hooks.write().response_modifier = modifier;
    }

    pub fn set_decryptor(&self, decryptor: Option<Arc<dyn DataDecryptor>>) {
        self.inner.hooks.write().decryptor = decryptor;
    }

    pub fn set_blacklist_policy(&self, policy: Arc<dyn BlacklistPolicy>) {
        self.inner.hooks.write().blacklist_policy = policy;
    }

    pub fn blacklist_policy(&self) -> Arc<dyn BlacklistPolicy> {
        self.inner.hooks.read().blacklist_policy.clone()
    }

    /// Blacklisted URLs, shared with the request manager
    pub fn failed_urls(&self) -> Arc<FailedUrls> {
        self.inner.failed_urls.clone()
    }

    /// Start or join a download
    ///
    /// Registration is synchronous. Failures detected before any network
    /// work (invalid URL, blacklisted URL, no Tokio runtime) are delivered
    /// as the single `Finished` event of the returned handle.
    pub fn fetch(
        &self,
        url: &str,
        options: DownloaderOptions,
        context: FetchContext,
    ) -> DownloadHandle {
        let (sender, events) = mpsc::unbounded_channel();

        let url = match parse_download_url(url) {
            Ok(url) => url,
            Err(e) => {
                let _ = sender.send(DownloadEvent::Finished(Err(e)));
                return DownloadHandle {
                    token: DownloadToken::detached(None),
                    events,
                };
            }
        };

        if !context.retry_failed && self.inner.failed_urls.contains(url.as_str()) {
            DownloadCounters::bump(&self.inner.counters.blacklist_rejections);
            debug!("Rejecting blacklisted URL {}", url);
            let _ = sender.send(DownloadEvent::Finished(Err(DownloadError::Blacklisted {
                url: url.to_string(),
            })));
            return DownloadHandle {
                token: DownloadToken::detached(Some(url)),
                events,
            };
        }

        match Handle::try_current() {
            Ok(runtime) => {
                self.inner.runtime.get_or_init(|| runtime);
            }
            Err(_) => {
                let _ = sender.send(DownloadEvent::Finished(Err(
                    DownloadError::InvalidOperation {
                        reason: "fetch must be called inside a Tokio runtime".to_string(),
                    },
                )));
                return DownloadHandle {
                    token: DownloadToken::detached(Some(url)),
                    events,
                };
            }
        }

        let token = self.inner.register(url, options, context, sender);
        self.inner.dispatch();
        DownloadHandle { token, events }
    }

    /// Withdraw one caller
    pub fn cancel(&self, token: &DownloadToken) {
        token.cancel();
    }

    /// Abort every operation; all callers receive `Cancelled`
    pub fn cancel_all_downloads(&self) {
        let operations: Vec<Operation> = {
            let mut state = self.inner.state.lock();
            state.queue.clear();
            state.by_key.clear();
            state.in_flight = 0;
            let operations: Vec<Operation> = state.operations.drain().map(|(_, op)| op).collect();
            for op in &operations {
                state.settle(&op.url, OperationState::Cancelled);
            }
            operations
        };

        if !operations.is_empty() {
            info!("Cancelling {} download operations", operations.len());
        }

        for op in operations {
            if let Some(task) = op.task {
                task.abort();
            }
            DownloadCounters::bump(&self.inner.counters.cancelled);
            for (_, sender) in op.subscribers {
                let _ = sender.send(DownloadEvent::Finished(Err(DownloadError::Cancelled)));
            }
        }
    }

    /// Pause or resume starting queued operations
    ///
    /// Operations already in flight are not affected.
    pub fn set_suspended(&self, suspended: bool) {
        self.inner.state.lock().suspended = suspended;
        if !suspended {
            self.inner.dispatch();
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.inner.state.lock().suspended
    }

    /// Operations queued or in flight
    pub fn current_download_count(&self) -> usize {
        self.inner.state.lock().operations.len()
    }

    /// Re-prioritize a queued operation; returns false once it has started
    pub fn set_priority(&self, token: &DownloadToken, priority: DownloadPriority) -> bool {
        let mut state = self.inner.state.lock();
        match state.operations.get_mut(&token.operation_id) {
            Some(op) if op.state == OperationState::Enqueued => {
                op.priority = priority;
                true
            }
            _ => false,
        }
    }

    /// Where a URL is in its download lifecycle
    ///
    /// A live operation reports `Enqueued` or `InFlight`. Once it ends, the
    /// URL reports `Completed`, `Failed` or `Cancelled` until it is fetched
    /// again or ages out of the bounded history. Unknown URLs are `Idle`.
    pub fn operation_state(&self, url: &str) -> OperationState {
        let Ok(url) = parse_download_url(url) else {
            return OperationState::Idle;
        };
        let mut state = self.inner.state.lock();
        if let Some(op) = state.operations.values().find(|op| op.url == url) {
            return op.state;
        }
        state
            .settled
            .get(url.as_str())
            .copied()
            .unwrap_or(OperationState::Idle)
    }

    pub fn stats(&self) -> DownloaderStats {
        let state = self.inner.state.lock();
        DownloaderStats::from_counters(
            &self.inner.counters,
            state.queue.len(),
            state.in_flight,
            state.suspended,
        )
    }
}

impl CoordinatorInner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn register(
        self: &Arc<Self>,
        url: Url,
        options: DownloaderOptions,
        context: FetchContext,
        sender: mpsc::UnboundedSender<DownloadEvent>,
    ) -> DownloadToken {
        let key = OperationKey::new(&url, options);
        let subscriber_id = self.next_id();
        let priority = options.priority();
        let mut state = self.state.lock();

        if let Some(&operation_id) = state.by_key.get(&key) {
            if let Some(op) = state.operations.get_mut(&operation_id) {
                op.subscribers.push((subscriber_id, sender));
                if op.state == OperationState::Enqueued && priority > op.priority {
                    op.priority = priority;
                }
                DownloadCounters::bump(&self.counters.deduplicated);
                debug!(
                    "Joined existing download of {} ({} callers)",
                    url,
                    op.subscribers.len()
                );
                return DownloadToken::new(
                    operation_id,
                    subscriber_id,
                    Some(url),
                    Arc::downgrade(self),
                );
            }
        }

        let operation_id = self.next_id();
        state.settled.pop(url.as_str());
        state.sequence += 1;
        let sequence = state.sequence;
        state.by_key.insert(key.clone(), operation_id);
        state.queue.push(operation_id);
        state.operations.insert(
            operation_id,
            Operation {
                key,
                url: url.clone(),
                options,
                context,
                state: OperationState::Enqueued,
                priority,
                sequence,
                subscribers: vec![(subscriber_id, sender)],
                task: None,
            },
        );
        debug!("Queued download of {}", url);

        DownloadToken::new(operation_id, subscriber_id, Some(url), Arc::downgrade(self))
    }

    /// Start queued operations while slots are free
    fn dispatch(self: &Arc<Self>) {
        let Some(runtime) = self.runtime.get() else {
            return;
        };
        let mut state = self.state.lock();

        while !state.suspended && state.in_flight < self.config.max_concurrent_downloads {
            let Some(operation_id) = state.next_queued(self.config.execution_order) else {
                break;
            };
            let Some(op) = state.operations.get_mut(&operation_id) else {
                continue;
            };

            op.state = OperationState::InFlight;
            let job = OperationJob {
                id: operation_id,
                url: op.url.clone(),
                options: op.options,
                context: op.context.clone(),
            };
            let inner = Arc::clone(self);
            op.task = Some(runtime.spawn(async move {
                let result = inner.perform(&job).await;
                inner.finish(job.id, &job.url, job.context.retry_failed, result);
            }));

            state.in_flight += 1;
            DownloadCounters::bump(&self.counters.started);
        }
    }

    /// Remove one caller, aborting the operation when nobody is left
    pub(crate) fn unsubscribe(self: &Arc<Self>, operation_id: u64, subscriber_id: u64) {
        let freed_slot = {
            let mut state = self.state.lock();
            let Some(op) = state.operations.get_mut(&operation_id) else {
                return;
            };
            op.subscribers.retain(|(id, _)| *id != subscriber_id);
            if !op.subscribers.is_empty() {
                return;
            }

            let Some(op) = state.operations.remove(&operation_id) else {
                return;
            };
            state.forget_key(&op.key, operation_id);
            state.settle(&op.url, OperationState::Cancelled);

            let was_in_flight = op.state == OperationState::InFlight;
            if was_in_flight {
                if let Some(task) = &op.task {
                    task.abort();
                }
                state.in_flight = state.in_flight.saturating_sub(1);
            } else {
                state.queue.retain(|id| *id != operation_id);
            }

            DownloadCounters::bump(&self.counters.cancelled);
            debug!("Cancelled download of {} (no remaining callers)", op.url);
            was_in_flight
        };

        if freed_slot {
            self.dispatch();
        }
    }

    fn broadcast(&self, operation_id: u64, event: DownloadEvent) {
        let state = self.state.lock();
        if let Some(op) = state.operations.get(&operation_id) {
            for (_, sender) in &op.subscribers {
                let _ = sender.send(event.clone());
            }
        }
    }

    /// Deliver the terminal result and release the slot
    fn finish(
        self: &Arc<Self>,
        operation_id: u64,
        url: &Url,
        retry_failed: bool,
        result: DownloadResult<DownloadedData>,
    ) {
        let subscribers = {
            let mut state = self.state.lock();
            let Some(op) = state.operations.remove(&operation_id) else {
                return;
            };
            state.forget_key(&op.key, operation_id);
            state.in_flight = state.in_flight.saturating_sub(1);
            let settled = match &result {
                Ok(_) => OperationState::Completed,
                Err(e) if e.is_cancelled() => OperationState::Cancelled,
                Err(_) => OperationState::Failed,
            };
            state.settle(url, settled);
            op.subscribers
        };

        match &result {
            Ok(downloaded) => {
                DownloadCounters::bump(&self.counters.completed);
                self.failed_urls.remove(url.as_str());
                debug!("Downloaded {} ({} bytes)", url, downloaded.data.len());
            }
            Err(e) => {
                DownloadCounters::bump(&self.counters.failed);
                if !retry_failed && !e.is_cancelled() {
                    let policy = self.hooks.read().blacklist_policy.clone();
                    if policy.should_block(url.as_str(), e) {
                        self.failed_urls.insert(url.as_str());
                    }
                }
                warn!("Download of {} failed: {}", url, e);
            }
        }

        for (_, sender) in subscribers {
            let _ = sender.send(DownloadEvent::Finished(result.clone()));
        }

        self.dispatch();
    }

    fn build_request(&self, job: &OperationJob) -> DownloadRequest {
        let mut request = DownloadRequest::new(job.url.clone(), self.config.download_timeout);
        request.headers = self.config.http_headers.clone();
        request.handle_cookies = job.options.contains(DownloaderOptions::HANDLE_COOKIES);
        request.allow_invalid_certificates = job
            .options
            .contains(DownloaderOptions::ALLOW_INVALID_SSL_CERTIFICATES);
        request.ignore_cached_response = job
            .options
            .contains(DownloaderOptions::IGNORE_CACHED_RESPONSE);
        request.credentials = self.config.credentials();
        request
    }

    async fn perform(&self, job: &OperationJob) -> DownloadResult<DownloadedData> {
        let hooks = self.hooks.read().clone();

        let mut request = self.build_request(job);
        if let Some(modifier) = job
            .context
            .request_modifier
            .as_ref()
            .or(hooks.request_modifier.as_ref())
        {
            request = modifier
                .modify_request(request)
                .ok_or_else(|| DownloadError::InvalidOperation {
                    reason: "Request modifier discarded the request".to_string(),
                })?;
        }

        let (mut head, mut body) = self.transport.send(&request).await?.into_parts();

        if let Some(modifier) = job
            .context
            .response_modifier
            .as_ref()
            .or(hooks.response_modifier.as_ref())
        {
            head = modifier
                .modify_response(head)
                .ok_or_else(|| DownloadError::InvalidResponse {
                    reason: "Response modifier discarded the response".to_string(),
                })?;
        }

        if head.status == http::NOT_MODIFIED {
            return Err(DownloadError::NotModified);
        }
        if !self.config.accepts_status(head.status) {
            return Err(DownloadError::InvalidStatusCode {
                status: head.status,
            });
        }
        if !self.config.accepts_content_type(head.content_type.as_deref()) {
            return Err(DownloadError::InvalidContentType {
                content_type: head.content_type.clone().unwrap_or_default(),
            });
        }

        let progressive = job.options.contains(DownloaderOptions::PROGRESSIVE_LOAD);
        let interval = self.config.minimum_progress_interval;
        let capacity = head
            .expected_length
            .map(|length| length.min(MAX_PREALLOCATION) as usize)
            .unwrap_or(downloader::INITIAL_BUFFER_CAPACITY);
        let mut buffer = BytesMut::with_capacity(capacity);
        let mut last_fraction = 0.0;
        let mut last_snapshot = 0;

        self.broadcast(
            job.id,
            DownloadEvent::Progress(DownloadProgress {
                received: 0,
                expected: head.expected_length,
                partial_data: None,
                partial_image: None,
            }),
        );

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            if chunk.is_empty() {
                continue;
            }
            buffer.extend_from_slice(&chunk);
            self.counters.add_bytes(chunk.len() as u64);

            let received = buffer.len() as u64;
            if let Some(expected) = head.expected_length.filter(|expected| *expected > 0) {
                let fraction = received as f64 / expected as f64;
                if interval > 0.0 && fraction < 1.0 && fraction - last_fraction < interval {
                    continue;
                }
                last_fraction = fraction;
            }

            let complete = head
                .expected_length
                .is_some_and(|expected| received >= expected);
            let snapshot = progressive && should_snapshot(buffer.len(), last_snapshot, complete);
            let (partial_data, partial_image) = if snapshot {
                last_snapshot = buffer.len();
                let data = Bytes::copy_from_slice(&buffer);
                let image =
                    decode_partial(hooks.coder.clone(), data.clone(), &job.context.decode).await;
                (Some(data), image)
            } else {
                (None, None)
            };

            self.broadcast(
                job.id,
                DownloadEvent::Progress(DownloadProgress {
                    received,
                    expected: head.expected_length,
                    partial_data,
                    partial_image,
                }),
            );
        }

        if buffer.is_empty() {
            return Err(DownloadError::BadImageData {
                reason: "Response body is empty".to_string(),
            });
        }

        let mut data = buffer.freeze();
        if let Some(decryptor) = job.context.decryptor.as_ref().or(hooks.decryptor.as_ref()) {
            data = decryptor
                .decrypt(data, &job.url)
                .ok_or(DownloadError::DecryptionFailed)?;
        }

        Ok(DownloadedData {
            url: job.url.clone(),
            data,
            head,
        })
    }
}

/// Whether a progressive chunk gets a partial-data snapshot
///
/// Snapshots are taken when the body has grown by the snapshot factor since
/// the last one, and for the final chunk, so copying stays linear in the
/// body size.
fn should_snapshot(len: usize, last_snapshot: usize, complete: bool) -> bool {
    complete || len >= last_snapshot.saturating_mul(downloader::PROGRESSIVE_SNAPSHOT_GROWTH)
}

async fn decode_partial(
    coder: Option<Arc<dyn ImageCoder>>,
    data: Bytes,
    options: &DecodeOptions,
) -> Option<Arc<Image>> {
    let coder = coder?;
    let options = options.clone();
    tokio::task::spawn_blocking(move || coder.decode_partial(&data, &options))
        .await
        .ok()
        .flatten()
        .map(Arc::new)
}

/// Parse a URL the coordinator can fetch
pub fn parse_download_url(url: &str) -> DownloadResult<Url> {
    let invalid = || DownloadError::InvalidUrl {
        url: url.to_string(),
    };
    let parsed = Url::parse(url.trim()).map_err(|_| invalid())?;
    match parsed.scheme() {
        "http" | "https" if parsed.host().is_some() => Ok(parsed),
        _ => Err(invalid()),
    }
}
