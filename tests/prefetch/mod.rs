//! Integration tests for batch prefetching

use std::sync::Arc;
use std::time::Duration;

use image_fetcher::app::{
    CacheType, DecodeOptions, ImageCoder, ImageOptions, LoadContext, PrefetchConfig,
    PrefetchCoordinator, PrefetchEvent, StandardCoder,
};

use crate::common::{png_bytes, MockResponse, TestPipeline};

fn image_url(name: &str) -> String {
    format!("https://images.example.com/gallery/{name}.png")
}

fn prefetcher(pipeline: &TestPipeline, concurrency: usize) -> PrefetchCoordinator {
    let config = PrefetchConfig::default()
        .with_concurrency(concurrency)
        .with_options(ImageOptions::LOW_PRIORITY | ImageOptions::WAIT_STORE_CACHE);
    PrefetchCoordinator::new(pipeline.manager.clone(), config)
}

#[tokio::test]
async fn test_mixed_batch_reports_every_url() {
    let pipeline = TestPipeline::new();
    let cached = image_url("cached");
    let fresh = image_url("fresh");
    let missing = image_url("missing");

    let image = StandardCoder::new()
        .decode(&png_bytes(4, 4), &DecodeOptions::default())
        .unwrap();
    pipeline.cache.store_to_memory(Arc::new(image), &cached);
    pipeline.transport.route(&fresh, MockResponse::png(4, 4));

    let mut token = prefetcher(&pipeline, 2).prefetch_urls(
        vec![cached.clone(), fresh.clone(), missing.clone(), "not a url".to_string()],
        None,
    );

    let mut results = Vec::new();
    let mut finished = None;
    while let Some(event) = token.events.recv().await {
        match event {
            PrefetchEvent::Progress { url, result, .. } => results.push((url, result)),
            PrefetchEvent::Finished(stats) => {
                finished = Some(stats);
                break;
            }
        }
    }

    let stats = finished.unwrap();
    assert_eq!(stats.total_count, 4);
    assert_eq!(stats.finished_count, 4);
    assert_eq!(stats.skipped_count, 2);
    assert_eq!(stats.succeeded_count(), 2);
    assert!(stats.is_complete());

    assert_eq!(results.len(), 4);
    let result_for = |url: &str| {
        results
            .iter()
            .find(|(u, _)| u == url)
            .map(|(_, result)| result.clone())
            .unwrap()
    };
    assert_eq!(result_for(cached.as_str()), Ok(CacheType::Memory));
    assert_eq!(result_for(fresh.as_str()), Ok(CacheType::None));
    assert!(result_for(missing.as_str()).is_err());
    assert!(result_for("not a url").is_err());

    // Only the uncached, parseable URLs reach the network
    assert_eq!(pipeline.transport.total_requests(), 2);
}

#[tokio::test]
async fn test_batch_concurrency_is_bounded() {
    let pipeline = TestPipeline::new();
    let urls: Vec<String> = (0..6).map(|i| image_url(&format!("slow-{i}"))).collect();
    for url in &urls {
        pipeline.transport.route(
            url,
            MockResponse::png(4, 4).with_delay(Duration::from_millis(60)),
        );
    }

    let stats = prefetcher(&pipeline, 2)
        .prefetch_urls(urls, None)
        .wait()
        .await;

    assert_eq!(stats.succeeded_count(), 6);
    assert_eq!(pipeline.transport.total_requests(), 6);
    assert!(pipeline.transport.peak_in_flight() <= 2);
}

#[tokio::test]
async fn test_prefetched_images_load_from_cache() {
    let pipeline = TestPipeline::new();
    let urls: Vec<String> = ["a", "b", "c"].iter().map(|name| image_url(name)).collect();
    for url in &urls {
        pipeline.transport.route(url, MockResponse::png(6, 6));
    }

    let stats = prefetcher(&pipeline, 3)
        .prefetch_urls(urls.clone(), None)
        .wait()
        .await;
    assert_eq!(stats.succeeded_count(), 3);
    assert_eq!(pipeline.cache.total_disk_count().await, 3);

    for url in &urls {
        let loaded = pipeline
            .manager
            .load_image(url, ImageOptions::FROM_CACHE_ONLY, LoadContext::default())
            .await
            .unwrap();
        assert_eq!(loaded.cache_type, CacheType::Memory);
    }
    assert_eq!(pipeline.transport.total_requests(), 3);
}

#[tokio::test]
async fn test_prefetch_shares_download_with_direct_load() {
    let pipeline = TestPipeline::new();
    let url = image_url("shared");
    pipeline.transport.route(
        &url,
        MockResponse::png(4, 4).with_delay(Duration::from_millis(100)),
    );

    let token = prefetcher(&pipeline, 1).prefetch_urls([url.clone()], None);
    tokio::time::sleep(Duration::from_millis(20)).await;
    let direct = pipeline
        .manager
        .load_image(&url, ImageOptions::empty(), LoadContext::default())
        .await
        .unwrap();

    let stats = token.wait().await;
    assert_eq!(stats.succeeded_count(), 1);
    assert_eq!(direct.cache_type, CacheType::None);
    assert_eq!(pipeline.transport.requests_for(&url), 1);
}

#[tokio::test]
async fn test_context_applies_to_every_load() {
    let pipeline = TestPipeline::new();
    let urls: Vec<String> = ["x", "y"].iter().map(|name| image_url(name)).collect();
    for url in &urls {
        pipeline.transport.route(url, MockResponse::png(4, 4));
    }

    let coordinator = prefetcher(&pipeline, 2)
        .with_context(LoadContext::default().with_store_cache_type(CacheType::Memory));
    let stats = coordinator.prefetch_urls(urls.clone(), None).wait().await;

    assert_eq!(stats.succeeded_count(), 2);
    assert_eq!(pipeline.cache.total_disk_count().await, 0);
    for url in &urls {
        assert_eq!(
            pipeline.cache.contains(url, CacheType::All).await,
            CacheType::Memory
        );
    }
}

#[tokio::test]
async fn test_cancel_prefetching_resolves_every_url() {
    let pipeline = TestPipeline::new();
    let urls: Vec<String> = (0..4).map(|i| image_url(&format!("queued-{i}"))).collect();
    for url in &urls {
        pipeline.transport.route(
            url,
            MockResponse::png(4, 4).with_delay(Duration::from_millis(300)),
        );
    }

    let coordinator = prefetcher(&pipeline, 1);
    let token = coordinator.prefetch_urls(urls, None);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(coordinator.active_batches(), 1);

    coordinator.cancel_prefetching();
    assert!(token.is_cancelled());

    let stats = token.wait().await;
    assert_eq!(stats.finished_count, 4);
    assert_eq!(stats.skipped_count, 4);
    assert!(pipeline.transport.total_requests() <= 1);
    assert!(!pipeline.manager.is_running());
}

#[test]
fn test_prefetch_outside_runtime_skips_every_url() {
    let pipeline = TestPipeline::new();
    let coordinator = prefetcher(&pipeline, 2);

    let token = coordinator.prefetch_urls([image_url("a"), image_url("b")], None);
    assert!(token.is_cancelled());

    let stats = tokio_test::block_on(token.wait());
    assert_eq!(stats.finished_count, 2);
    assert_eq!(stats.skipped_count, 2);
    assert_eq!(coordinator.active_batches(), 0);
    assert_eq!(pipeline.transport.total_requests(), 0);
}
