//! Integration tests for the request manager
//!
//! Loads run against `MockTransport` and a temporary cache so the tests can
//! observe which tier served each image and how many requests were sent.

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use image_fetcher::app::downloader::ResponseHead;
use image_fetcher::app::manager::{
    CacheKeyFilter, GrayscaleTransformer, ResizeTransformer, TransformerPipeline,
};
use image_fetcher::app::{
    CacheConfig, CacheType, DownloaderConfig, ImageOptions, ImageTransformer, LoadContext,
    LoadEvent,
};
use image_fetcher::errors::{DownloadError, ImageError};

use crate::common::{MockResponse, TestPipeline};

const URL: &str = "https://images.example.com/photos/cat.png";

fn grayscale_resize(width: u32, height: u32) -> Arc<dyn ImageTransformer> {
    Arc::new(TransformerPipeline::new(vec![
        Arc::new(ResizeTransformer::exact(width, height)),
        Arc::new(GrayscaleTransformer),
    ]))
}

#[tokio::test]
async fn test_second_load_is_served_from_memory() {
    let pipeline = TestPipeline::new();
    pipeline.transport.route(URL, MockResponse::png(16, 16));

    let first = pipeline
        .manager
        .load_image(URL, ImageOptions::WAIT_STORE_CACHE, LoadContext::default())
        .await
        .unwrap();
    assert_eq!(first.cache_type, CacheType::None);
    assert!(first.finished);

    let second = pipeline
        .manager
        .load_image(URL, ImageOptions::empty(), LoadContext::default())
        .await
        .unwrap();
    assert_eq!(second.cache_type, CacheType::Memory);
    assert_eq!(second.image.unwrap().dimensions(), (16, 16));
    assert_eq!(pipeline.transport.requests_for(URL), 1);
}

#[tokio::test]
async fn test_transformer_pipeline_output_and_keys() {
    let pipeline = TestPipeline::new();
    pipeline.transport.route(URL, MockResponse::png(32, 32));
    let context = LoadContext::default().with_transformer(grayscale_resize(8, 8));

    let loaded = pipeline
        .manager
        .load_image(URL, ImageOptions::WAIT_STORE_CACHE, context.clone())
        .await
        .unwrap();

    let image = loaded.image.unwrap();
    assert_eq!(image.dimensions(), (8, 8));
    assert!(image.is_transformed());
    assert!(!image.buffer().color().has_color());

    let key = pipeline.manager.cache_key_for_url(URL, &context).unwrap();
    assert_eq!(
        key,
        "https://images.example.com/photos/cat-Resize(8,8,0)-Grayscale.png"
    );
    assert_eq!(pipeline.cache.contains(&key, CacheType::Memory).await, CacheType::Memory);
    assert_eq!(pipeline.cache.contains(URL, CacheType::Disk).await, CacheType::Disk);
}

#[tokio::test]
async fn test_new_variant_is_derived_from_original_on_disk() {
    let pipeline = TestPipeline::new();
    pipeline.transport.route(URL, MockResponse::png(32, 32));

    pipeline
        .manager
        .load_image(
            URL,
            ImageOptions::WAIT_STORE_CACHE,
            LoadContext::default().with_transformer(grayscale_resize(8, 8)),
        )
        .await
        .unwrap();

    let variant = pipeline
        .manager
        .load_image(
            URL,
            ImageOptions::WAIT_STORE_CACHE,
            LoadContext::default().with_transformer(Arc::new(ResizeTransformer::exact(4, 4))),
        )
        .await
        .unwrap();

    assert_eq!(variant.cache_type, CacheType::Disk);
    assert_eq!(variant.image.unwrap().dimensions(), (4, 4));
    assert_eq!(pipeline.transport.requests_for(URL), 1);
}

#[tokio::test]
async fn test_thumbnail_load_keeps_original_bytes() {
    let pipeline = TestPipeline::new();
    pipeline.transport.route(URL, MockResponse::png(64, 32));
    let context = LoadContext::default().with_thumbnail(16, 16, true);

    let loaded = pipeline
        .manager
        .load_image(URL, ImageOptions::WAIT_STORE_CACHE, context.clone())
        .await
        .unwrap();

    let (width, height) = loaded.image.unwrap().dimensions();
    assert!(width <= 16 && height <= 16);
    assert_eq!(width, 2 * height);

    let key = pipeline.manager.cache_key_for_url(URL, &context).unwrap();
    assert_ne!(key, URL);
    assert_eq!(pipeline.cache.contains(&key, CacheType::Memory).await, CacheType::Memory);
    assert_eq!(pipeline.cache.contains(URL, CacheType::Disk).await, CacheType::Disk);
}

#[tokio::test]
async fn test_thumbnail_from_full_size_original_in_memory() {
    let pipeline = TestPipeline::new();
    pipeline.transport.route(URL, MockResponse::png(64, 32));

    pipeline
        .manager
        .load_image(URL, ImageOptions::WAIT_STORE_CACHE, LoadContext::default())
        .await
        .unwrap();

    let mut context = LoadContext::default().with_thumbnail(16, 16, true);
    context.original_query_cache_type = CacheType::All;
    let loaded = pipeline
        .manager
        .load_image(URL, ImageOptions::WAIT_STORE_CACHE, context.clone())
        .await
        .unwrap();

    assert_eq!(loaded.image.unwrap().dimensions(), (16, 8));
    assert_eq!(pipeline.transport.requests_for(URL), 1);

    // The stored variant is the thumbnail too
    let key = pipeline.manager.cache_key_for_url(URL, &context).unwrap();
    let again = pipeline
        .manager
        .load_image(URL, ImageOptions::empty(), context)
        .await
        .unwrap();
    assert_eq!(again.cache_type, CacheType::Memory);
    assert_eq!(again.image.unwrap().dimensions(), (16, 8));
    assert_eq!(pipeline.cache.contains(&key, CacheType::Memory).await, CacheType::Memory);
}

#[tokio::test]
async fn test_progressive_load_delivers_partial_images() {
    let pipeline = TestPipeline::new();
    pipeline
        .transport
        .route(URL, MockResponse::png(64, 64).chunked(4));

    let mut operation =
        pipeline
            .manager
            .load(Some(URL), ImageOptions::PROGRESSIVE_LOAD, LoadContext::default());

    let mut received = Vec::new();
    let mut partial_data = 0;
    let mut intermediates = 0;
    let mut finished = Vec::new();
    while let Some(event) = operation.next_event().await {
        assert!(finished.is_empty(), "event after completion");
        match event {
            LoadEvent::Progress(progress) => {
                received.push(progress.received);
                if progress.partial_data.is_some() {
                    partial_data += 1;
                }
            }
            LoadEvent::Intermediate(partial) => {
                assert!(!partial.finished);
                assert_eq!(partial.cache_type, CacheType::None);
                assert!(partial.image.is_some());
                intermediates += 1;
            }
            LoadEvent::Finished(result) => finished.push(result),
        }
    }

    assert!(received.len() >= 2);
    assert!(received.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(partial_data >= 1);
    assert!(intermediates >= 1);
    assert_eq!(finished.len(), 1);

    let loaded = finished.pop().unwrap().unwrap();
    assert!(loaded.finished);
    assert_eq!(loaded.image.unwrap().dimensions(), (64, 64));
}

#[tokio::test]
async fn test_load_events_end_with_single_finished() {
    let pipeline = TestPipeline::new();
    pipeline
        .transport
        .route(URL, MockResponse::png(24, 24).chunked(4));

    let mut operation =
        pipeline
            .manager
            .load(Some(URL), ImageOptions::empty(), LoadContext::default());

    let mut progress = 0;
    let mut finished = Vec::new();
    while let Some(event) = operation.next_event().await {
        match event {
            LoadEvent::Progress(_) => {
                assert!(finished.is_empty(), "progress after completion");
                progress += 1;
            }
            LoadEvent::Intermediate(_) => {}
            LoadEvent::Finished(result) => finished.push(result),
        }
    }

    assert!(progress >= 1);
    assert_eq!(finished.len(), 1);
    assert!(finished[0].is_ok());
}

#[tokio::test]
async fn test_cancel_all_stops_running_loads() {
    let pipeline = TestPipeline::new();
    pipeline.transport.route(
        URL,
        MockResponse::png(8, 8).with_delay(Duration::from_millis(500)),
    );

    let operation = pipeline
        .manager
        .load(Some(URL), ImageOptions::empty(), LoadContext::default());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(pipeline.manager.is_running());

    pipeline.manager.cancel_all();

    assert!(operation.is_cancelled());
    assert_eq!(operation.wait().await.unwrap_err(), ImageError::Cancelled);
    assert!(!pipeline.manager.is_running());
    assert!(!pipeline.manager.is_failed_url(URL));
}

#[tokio::test]
async fn test_cache_key_filter_ignores_query_string() {
    let pipeline = TestPipeline::new();
    let signed = format!("{URL}?signature=first");
    pipeline.transport.route(&signed, MockResponse::png(8, 8));

    let filter: Arc<dyn CacheKeyFilter> = Arc::new(|url: &Url| {
        let mut url = url.clone();
        url.set_query(None);
        url.to_string()
    });
    pipeline.manager.set_cache_key_filter(Some(filter));

    pipeline
        .manager
        .load_image(&signed, ImageOptions::WAIT_STORE_CACHE, LoadContext::default())
        .await
        .unwrap();

    let resigned = pipeline
        .manager
        .load_image(
            &format!("{URL}?signature=second"),
            ImageOptions::empty(),
            LoadContext::default(),
        )
        .await
        .unwrap();

    assert_eq!(resigned.cache_type, CacheType::Memory);
    assert_eq!(pipeline.transport.total_requests(), 1);
    assert_eq!(
        pipeline.manager.cache_key_for_url(&signed, &LoadContext::default()),
        Some(URL.to_string())
    );
}

#[tokio::test]
async fn test_from_loader_only_skips_cache() {
    let pipeline = TestPipeline::new();
    pipeline.transport.route(URL, MockResponse::png(8, 8));

    for _ in 0..2 {
        let loaded = pipeline
            .manager
            .load_image(
                URL,
                ImageOptions::FROM_LOADER_ONLY | ImageOptions::WAIT_STORE_CACHE,
                LoadContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(loaded.cache_type, CacheType::None);
    }

    assert_eq!(pipeline.transport.requests_for(URL), 2);
}

#[tokio::test]
async fn test_memory_only_store_leaves_disk_empty() {
    let pipeline = TestPipeline::new();
    pipeline.transport.route(URL, MockResponse::png(8, 8));

    pipeline
        .manager
        .load_image(
            URL,
            ImageOptions::WAIT_STORE_CACHE,
            LoadContext::default().with_store_cache_type(CacheType::Memory),
        )
        .await
        .unwrap();

    assert_eq!(pipeline.cache.contains(URL, CacheType::All).await, CacheType::Memory);
    assert_eq!(pipeline.cache.total_disk_count().await, 0);
}

#[tokio::test]
async fn test_disk_only_query_ignores_memory() {
    let pipeline = TestPipeline::new();
    pipeline.transport.route(URL, MockResponse::png(8, 8));

    pipeline
        .manager
        .load_image(URL, ImageOptions::WAIT_STORE_CACHE, LoadContext::default())
        .await
        .unwrap();

    let loaded = pipeline
        .manager
        .load_image(
            URL,
            ImageOptions::empty(),
            LoadContext::default().with_query_cache_type(CacheType::Disk),
        )
        .await
        .unwrap();

    assert_eq!(loaded.cache_type, CacheType::Disk);
    assert_eq!(pipeline.transport.requests_for(URL), 1);
}

#[tokio::test]
async fn test_failed_url_can_be_retried_after_removal() {
    let pipeline = TestPipeline::new();

    let error = pipeline
        .manager
        .load_image(URL, ImageOptions::empty(), LoadContext::default())
        .await
        .unwrap_err();
    assert_eq!(
        error,
        ImageError::Download(DownloadError::InvalidStatusCode { status: 404 })
    );
    assert!(pipeline.manager.is_failed_url(URL));

    let blocked = pipeline
        .manager
        .load_image(URL, ImageOptions::empty(), LoadContext::default())
        .await
        .unwrap_err();
    assert!(matches!(blocked, ImageError::Blacklisted { .. }));
    assert_eq!(pipeline.transport.requests_for(URL), 1);

    pipeline.transport.route(URL, MockResponse::png(8, 8));
    assert!(pipeline.manager.remove_failed_url(URL));

    let loaded = pipeline
        .manager
        .load_image(URL, ImageOptions::empty(), LoadContext::default())
        .await
        .unwrap();
    assert_eq!(loaded.cache_type, CacheType::None);
    assert_eq!(pipeline.transport.requests_for(URL), 2);
}

#[tokio::test]
async fn test_context_response_modifier_fixes_content_type() {
    let config = DownloaderConfig {
        acceptable_content_types: Some(["image/png".to_string()].into_iter().collect()),
        ..DownloaderConfig::default()
    };
    let pipeline = TestPipeline::with_configs(CacheConfig::default(), config);
    pipeline.transport.route(
        URL,
        MockResponse::png(8, 8).with_content_type("application/octet-stream"),
    );

    let rejected = pipeline
        .manager
        .load_image(URL, ImageOptions::RETRY_FAILED, LoadContext::default())
        .await
        .unwrap_err();
    assert!(matches!(
        rejected,
        ImageError::Download(DownloadError::InvalidContentType { .. })
    ));

    let mut context = LoadContext::default();
    context.response_modifier = Some(Arc::new(|mut head: ResponseHead| {
        head.content_type = Some("image/png".to_string());
        Some(head)
    }));

    let loaded = pipeline
        .manager
        .load_image(URL, ImageOptions::RETRY_FAILED, context)
        .await
        .unwrap();
    assert_eq!(loaded.image.unwrap().dimensions(), (8, 8));
}
