//! Shared fixtures for the integration tests
//!
//! `MockTransport` stands in for the network: responses are scripted per
//! URL, every request is recorded, and the peak number of overlapping
//! requests is tracked.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use image::{DynamicImage, Rgb, RgbImage};
use parking_lot::Mutex;
use tempfile::TempDir;

use image_fetcher::app::downloader::{DownloadRequest, TransportResponse};
use image_fetcher::app::{
    CacheConfig, CacheEngine, DownloadCoordinator, DownloaderConfig, Image, ImageCoder,
    ImageFormat, RequestManager, StandardCoder, Transport,
};
use image_fetcher::errors::DownloadResult;

/// Encoded PNG of a solid color
pub fn png_bytes(width: u32, height: u32) -> Bytes {
    let image = Image::new(
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 40, 90]))),
        ImageFormat::Png,
    );
    Bytes::from(
        StandardCoder::new()
            .encode(&image, ImageFormat::Png, None)
            .expect("PNG encoding"),
    )
}

/// Scripted response for one URL
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub chunks: Vec<Bytes>,
    pub delay: Duration,
}

impl MockResponse {
    pub fn ok(body: Bytes) -> Self {
        Self {
            status: 200,
            content_type: Some("image/png".to_string()),
            chunks: vec![body],
            delay: Duration::ZERO,
        }
    }

    pub fn png(width: u32, height: u32) -> Self {
        Self::ok(png_bytes(width, height))
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            content_type: Some("text/html".to_string()),
            chunks: vec![Bytes::from_static(b"<html>error</html>")],
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    /// Split the body into `count` roughly equal chunks
    pub fn chunked(mut self, count: usize) -> Self {
        let body: Vec<u8> = self.chunks.concat();
        let size = body.len().div_ceil(count.max(1)).max(1);
        self.chunks = body.chunks(size).map(Bytes::copy_from_slice).collect();
        self
    }

    fn body_len(&self) -> u64 {
        self.chunks.iter().map(|chunk| chunk.len() as u64).sum()
    }
}

/// In-process transport with scripted responses
pub struct MockTransport {
    routes: Mutex<HashMap<String, MockResponse>>,
    requests: Mutex<Vec<DownloadRequest>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        })
    }

    /// Script the response for a URL; unscripted URLs answer 404
    pub fn route(&self, url: &str, response: MockResponse) {
        self.routes.lock().insert(url.to_string(), response);
    }

    pub fn total_requests(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests_for(&self, url: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|request| request.url.as_str() == url)
            .count()
    }

    pub fn last_request(&self) -> Option<DownloadRequest> {
        self.requests.lock().last().cloned()
    }

    /// URLs in the order their requests were sent
    pub fn request_order(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|request| request.url.to_string())
            .collect()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &DownloadRequest) -> DownloadResult<TransportResponse> {
        self.requests.lock().push(request.clone());
        let response = self
            .routes
            .lock()
            .get(request.url.as_str())
            .cloned()
            .unwrap_or_else(|| MockResponse::status(404));

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        if !response.delay.is_zero() {
            tokio::time::sleep(response.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let chunks = if response.status == 304 {
            Vec::new()
        } else {
            response.chunks.clone()
        };
        Ok(TransportResponse {
            status: response.status,
            content_type: response.content_type.clone(),
            expected_length: Some(response.body_len()),
            headers: Default::default(),
            body: stream::iter(chunks.into_iter().map(Ok)).boxed(),
        })
    }
}

/// Request manager wired to a mock transport and a temporary cache
pub struct TestPipeline {
    pub manager: RequestManager,
    pub cache: Arc<CacheEngine>,
    pub coordinator: Arc<DownloadCoordinator>,
    pub transport: Arc<MockTransport>,
    pub temp_dir: TempDir,
}

impl TestPipeline {
    pub fn new() -> Self {
        Self::with_configs(CacheConfig::default(), DownloaderConfig::default())
    }

    pub fn with_configs(cache_config: CacheConfig, downloader_config: DownloaderConfig) -> Self {
        let temp_dir = TempDir::new().expect("temp dir");
        let cache = Arc::new(
            CacheEngine::new(
                "integration",
                Some(temp_dir.path().to_path_buf()),
                cache_config,
                Arc::new(StandardCoder::new()),
            )
            .expect("cache engine"),
        );
        let transport = MockTransport::new();
        let coordinator = Arc::new(DownloadCoordinator::new(
            downloader_config,
            transport.clone(),
        ));
        let manager = RequestManager::new(cache.clone(), coordinator.clone());

        Self {
            manager,
            cache,
            coordinator,
            transport,
            temp_dir,
        }
    }
}
