//! Integration tests for the download coordinator
//!
//! These tests drive `DownloadCoordinator` through the mock transport and
//! check queueing, sharing, cancellation and failure bookkeeping.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use image_fetcher::app::downloader::{
    DownloadEvent, DownloadPriority, DownloadRequest, OperationState, XorDecryptor,
};
use image_fetcher::app::{
    DownloadCoordinator, DownloaderConfig, DownloaderOptions, ExecutionOrder, FetchContext,
};
use image_fetcher::errors::DownloadError;

use crate::common::{png_bytes, MockResponse, MockTransport};

fn coordinator_with(config: DownloaderConfig) -> (DownloadCoordinator, Arc<MockTransport>) {
    let transport = MockTransport::new();
    (DownloadCoordinator::new(config, transport.clone()), transport)
}

fn url(name: &str) -> String {
    format!("https://images.example.com/{}.png", name)
}

#[tokio::test]
async fn test_concurrency_limit_is_respected() {
    let config = DownloaderConfig {
        max_concurrent_downloads: 2,
        ..DownloaderConfig::default()
    };
    let (coordinator, transport) = coordinator_with(config);
    for i in 0..6 {
        transport.route(
            &url(&i.to_string()),
            MockResponse::png(2, 2).with_delay(Duration::from_millis(40)),
        );
    }

    let handles: Vec<_> = (0..6)
        .map(|i| {
            coordinator.fetch(
                &url(&i.to_string()),
                DownloaderOptions::empty(),
                FetchContext::default(),
            )
        })
        .collect();
    assert_eq!(coordinator.current_download_count(), 6);

    for handle in handles {
        assert!(handle.wait().await.is_ok());
    }

    assert_eq!(transport.total_requests(), 6);
    assert!(transport.peak_in_flight() <= 2);
    assert_eq!(coordinator.current_download_count(), 0);
    assert_eq!(coordinator.stats().completed, 6);
}

#[tokio::test]
async fn test_cancelling_one_caller_keeps_shared_download() {
    let (coordinator, transport) = coordinator_with(DownloaderConfig::default());
    let target = url("shared");
    transport.route(
        &target,
        MockResponse::png(4, 4).with_delay(Duration::from_millis(50)),
    );

    let first = coordinator.fetch(&target, DownloaderOptions::empty(), FetchContext::default());
    let second = coordinator.fetch(&target, DownloaderOptions::empty(), FetchContext::default());
    first.cancel();

    assert!(matches!(first.wait().await, Err(DownloadError::Cancelled)));
    let downloaded = second.wait().await.unwrap();
    assert_eq!(downloaded.data, png_bytes(4, 4));
    assert_eq!(transport.requests_for(&target), 1);
    assert_eq!(coordinator.stats().deduplicated, 1);
}

#[tokio::test]
async fn test_cancelling_every_caller_aborts_operation() {
    let (coordinator, transport) = coordinator_with(DownloaderConfig::default());
    let target = url("abandoned");
    transport.route(
        &target,
        MockResponse::png(4, 4).with_delay(Duration::from_millis(200)),
    );

    let handle = coordinator.fetch(&target, DownloaderOptions::empty(), FetchContext::default());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(coordinator.operation_state(&target), OperationState::InFlight);

    handle.cancel();
    assert!(matches!(handle.wait().await, Err(DownloadError::Cancelled)));
    assert_eq!(coordinator.current_download_count(), 0);
    assert_eq!(coordinator.stats().cancelled, 1);
    assert_eq!(coordinator.operation_state(&target), OperationState::Cancelled);
    // Cancellation never blacklists
    assert!(!coordinator.failed_urls().contains(&target));
}

#[tokio::test]
async fn test_cancel_all_downloads_notifies_every_caller() {
    let config = DownloaderConfig {
        max_concurrent_downloads: 1,
        ..DownloaderConfig::default()
    };
    let (coordinator, transport) = coordinator_with(config);
    for name in ["a", "b", "c"] {
        transport.route(
            &url(name),
            MockResponse::png(2, 2).with_delay(Duration::from_millis(200)),
        );
    }

    let handles: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|name| coordinator.fetch(&url(name), DownloaderOptions::empty(), FetchContext::default()))
        .collect();
    tokio::time::sleep(Duration::from_millis(20)).await;

    coordinator.cancel_all_downloads();
    for handle in handles {
        assert!(matches!(handle.wait().await, Err(DownloadError::Cancelled)));
    }
    assert_eq!(coordinator.current_download_count(), 0);
    assert_eq!(transport.total_requests(), 1);
}

#[tokio::test]
async fn test_lifo_order_starts_newest_first() {
    let config = DownloaderConfig {
        max_concurrent_downloads: 1,
        execution_order: ExecutionOrder::Lifo,
        ..DownloaderConfig::default()
    };
    let (coordinator, transport) = coordinator_with(config);
    for name in ["a", "b", "c"] {
        transport.route(&url(name), MockResponse::png(2, 2));
    }

    coordinator.set_suspended(true);
    let handles: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|name| coordinator.fetch(&url(name), DownloaderOptions::empty(), FetchContext::default()))
        .collect();
    assert_eq!(coordinator.stats().queued, 3);
    assert_eq!(transport.total_requests(), 0);

    coordinator.set_suspended(false);
    for handle in handles {
        handle.wait().await.unwrap();
    }

    assert_eq!(transport.request_order(), vec![url("c"), url("b"), url("a")]);
}

#[tokio::test]
async fn test_priority_overrides_fifo_order() {
    let config = DownloaderConfig {
        max_concurrent_downloads: 1,
        ..DownloaderConfig::default()
    };
    let (coordinator, transport) = coordinator_with(config);
    for name in ["low", "normal", "high", "raised"] {
        transport.route(&url(name), MockResponse::png(2, 2));
    }

    coordinator.set_suspended(true);
    let low = coordinator.fetch(
        &url("low"),
        DownloaderOptions::LOW_PRIORITY,
        FetchContext::default(),
    );
    let normal = coordinator.fetch(&url("normal"), DownloaderOptions::empty(), FetchContext::default());
    let high = coordinator.fetch(
        &url("high"),
        DownloaderOptions::HIGH_PRIORITY,
        FetchContext::default(),
    );
    let raised = coordinator.fetch(
        &url("raised"),
        DownloaderOptions::LOW_PRIORITY,
        FetchContext::default(),
    );
    assert!(coordinator.set_priority(&raised.token, DownloadPriority::High));

    coordinator.set_suspended(false);
    for handle in [low, normal, high, raised] {
        handle.wait().await.unwrap();
    }

    assert_eq!(
        transport.request_order(),
        vec![url("high"), url("raised"), url("normal"), url("low")]
    );
}

#[tokio::test]
async fn test_permanent_failure_is_blacklisted_until_retried() {
    let (coordinator, transport) = coordinator_with(DownloaderConfig::default());
    let target = url("missing");

    let result = coordinator
        .fetch(&target, DownloaderOptions::empty(), FetchContext::default())
        .wait()
        .await;
    assert!(matches!(
        result,
        Err(DownloadError::InvalidStatusCode { status: 404 })
    ));
    assert!(coordinator.failed_urls().contains(&target));

    // Blacklisted URLs fail without a request
    let result = coordinator
        .fetch(&target, DownloaderOptions::empty(), FetchContext::default())
        .wait()
        .await;
    assert!(matches!(result, Err(DownloadError::Blacklisted { .. })));
    assert_eq!(transport.requests_for(&target), 1);
    assert_eq!(coordinator.stats().blacklist_rejections, 1);

    // An explicit retry reaches the network and a success clears the entry
    transport.route(&target, MockResponse::png(3, 3));
    let retry = FetchContext {
        retry_failed: true,
        ..FetchContext::default()
    };
    coordinator
        .fetch(&target, DownloaderOptions::empty(), retry)
        .wait()
        .await
        .unwrap();
    assert!(!coordinator.failed_urls().contains(&target));
    assert_eq!(transport.requests_for(&target), 2);
}

#[tokio::test]
async fn test_transient_failure_is_not_blacklisted() {
    let (coordinator, transport) = coordinator_with(DownloaderConfig::default());
    let target = url("flaky");
    transport.route(&target, MockResponse::status(503));

    let result = coordinator
        .fetch(&target, DownloaderOptions::empty(), FetchContext::default())
        .wait()
        .await;
    assert!(matches!(
        result,
        Err(DownloadError::InvalidStatusCode { status: 503 })
    ));
    assert!(!coordinator.failed_urls().contains(&target));
}

#[tokio::test]
async fn test_unacceptable_content_type() {
    let config = DownloaderConfig {
        acceptable_content_types: Some(["image/png".to_string()].into_iter().collect()),
        ..DownloaderConfig::default()
    };
    let (coordinator, transport) = coordinator_with(config);
    let page = url("page");
    let image = url("image");
    transport.route(&page, MockResponse::png(2, 2).with_content_type("text/html"));
    transport.route(
        &image,
        MockResponse::png(2, 2).with_content_type("image/PNG; charset=binary"),
    );

    let rejected = coordinator
        .fetch(&page, DownloaderOptions::empty(), FetchContext::default())
        .wait()
        .await;
    assert!(matches!(
        rejected,
        Err(DownloadError::InvalidContentType { .. })
    ));

    let accepted = coordinator
        .fetch(&image, DownloaderOptions::empty(), FetchContext::default())
        .wait()
        .await;
    assert!(accepted.is_ok());
}

#[tokio::test]
async fn test_progress_events_track_received_bytes() {
    let (coordinator, transport) = coordinator_with(DownloaderConfig::default());
    let target = url("chunked");
    let body = png_bytes(32, 32);
    transport.route(&target, MockResponse::ok(body.clone()).chunked(4));

    let mut handle = coordinator.fetch(&target, DownloaderOptions::empty(), FetchContext::default());
    let mut received = Vec::new();
    let result = loop {
        match handle.next_event().await {
            Some(DownloadEvent::Progress(progress)) => {
                assert_eq!(progress.expected, Some(body.len() as u64));
                received.push(progress.received);
            }
            Some(DownloadEvent::Finished(result)) => break result,
            None => panic!("stream ended without a result"),
        }
    };

    assert_eq!(result.unwrap().data, body);
    assert_eq!(received.first(), Some(&0));
    assert_eq!(received.last(), Some(&(body.len() as u64)));
    assert!(received.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(received.len(), 5);
}

#[tokio::test]
async fn test_minimum_progress_interval_throttles_events() {
    let config = DownloaderConfig {
        minimum_progress_interval: 0.5,
        ..DownloaderConfig::default()
    };
    let (coordinator, transport) = coordinator_with(config);
    let target = url("throttled");
    transport.route(&target, MockResponse::ok(png_bytes(32, 32)).chunked(10));

    let mut handle = coordinator.fetch(&target, DownloaderOptions::empty(), FetchContext::default());
    let mut progress_events = 0;
    while let Some(event) = handle.next_event().await {
        match event {
            DownloadEvent::Progress(_) => progress_events += 1,
            DownloadEvent::Finished(result) => {
                assert!(result.is_ok());
                break;
            }
        }
    }

    // Initial event, the halfway mark and completion
    assert!(progress_events < 6, "got {} progress events", progress_events);
}

#[tokio::test]
async fn test_request_carries_credentials_and_modifier_headers() {
    let config = DownloaderConfig {
        username: Some("reader".to_string()),
        password: Some("secret".to_string()),
        ..DownloaderConfig::default()
    };
    let (coordinator, transport) = coordinator_with(config);
    let target = url("private");
    transport.route(&target, MockResponse::png(2, 2));

    let context = FetchContext {
        request_modifier: Some(Arc::new(|request: DownloadRequest| {
            Some(request.with_header("X-Trace", "42"))
        })),
        ..FetchContext::default()
    };
    coordinator
        .fetch(&target, DownloaderOptions::IGNORE_CACHED_RESPONSE, context)
        .wait()
        .await
        .unwrap();

    let request = transport.last_request().unwrap();
    assert_eq!(
        request.credentials,
        Some(("reader".to_string(), "secret".to_string()))
    );
    assert_eq!(request.headers.get("X-Trace").map(String::as_str), Some("42"));
    assert!(request.headers.contains_key("Accept"));
    assert!(request.ignore_cached_response);
}

#[tokio::test]
async fn test_request_modifier_can_discard_request() {
    let (coordinator, transport) = coordinator_with(DownloaderConfig::default());
    coordinator.set_request_modifier(Some(Arc::new(
        |_request: DownloadRequest| -> Option<DownloadRequest> { None },
    )));

    let result = coordinator
        .fetch(&url("vetoed"), DownloaderOptions::empty(), FetchContext::default())
        .wait()
        .await;

    assert!(matches!(result, Err(DownloadError::InvalidOperation { .. })));
    assert_eq!(transport.total_requests(), 0);
}

#[tokio::test]
async fn test_decryptor_restores_payload() {
    let (coordinator, transport) = coordinator_with(DownloaderConfig::default());
    let target = url("obfuscated");
    let plain = png_bytes(5, 5);
    let key = b"k3y".to_vec();
    let scrambled: Vec<u8> = plain
        .iter()
        .zip(key.iter().cycle())
        .map(|(byte, k)| byte ^ k)
        .collect();
    transport.route(&target, MockResponse::ok(Bytes::from(scrambled)));

    let context = FetchContext {
        decryptor: Some(Arc::new(XorDecryptor::new(key))),
        ..FetchContext::default()
    };
    let downloaded = coordinator
        .fetch(&target, DownloaderOptions::empty(), context)
        .wait()
        .await
        .unwrap();

    assert_eq!(downloaded.data, plain);
}

#[tokio::test]
async fn test_empty_body_is_bad_image_data() {
    let (coordinator, transport) = coordinator_with(DownloaderConfig::default());
    let target = url("empty");
    transport.route(&target, MockResponse::ok(Bytes::new()));

    let result = coordinator
        .fetch(&target, DownloaderOptions::empty(), FetchContext::default())
        .wait()
        .await;

    assert!(matches!(result, Err(DownloadError::BadImageData { .. })));
}
