//! Integration tests for the cache layer
//!
//! These tests exercise `CacheEngine` and `CachesManager` through their
//! public interfaces, including restarts against the same directory.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tempfile::TempDir;

use image_fetcher::app::cache::CachesManagerOperationPolicy;
use image_fetcher::app::{
    CacheConfig, CacheEngine, CacheQueryOptions, CacheType, CachesManager, DecodeOptions,
    DownloadCoordinator, DownloaderConfig, Image, ImageCacheProvider, ImageCoder, ImageOptions,
    LoadContext, RequestManager, StandardCoder,
};

use crate::common::{png_bytes, MockResponse, MockTransport};

const KEY: &str = "https://images.example.com/cat.png";

fn engine(dir: &TempDir, namespace: &str, config: CacheConfig) -> Arc<CacheEngine> {
    Arc::new(
        CacheEngine::new(
            namespace,
            Some(dir.path().to_path_buf()),
            config,
            Arc::new(StandardCoder::new()),
        )
        .unwrap(),
    )
}

fn decoded(width: u32, height: u32) -> (Arc<Image>, Bytes) {
    let data = png_bytes(width, height);
    let image = StandardCoder::new()
        .decode(&data, &DecodeOptions::default())
        .unwrap();
    (Arc::new(image), data)
}

#[tokio::test]
async fn test_disk_entries_survive_restart() {
    let dir = TempDir::new().unwrap();
    let (image, data) = decoded(6, 4);

    {
        let first = engine(&dir, "photos", CacheConfig::default());
        first
            .store(Some(image), Some(data.clone()), KEY, CacheType::All)
            .await
            .unwrap();
    }

    let second = engine(&dir, "photos", CacheConfig::default());
    assert!(second.query_memory(KEY).is_none());

    let outcome = second
        .query(KEY, &CacheQueryOptions::default(), CacheType::All)
        .await;
    assert_eq!(outcome.cache_type, CacheType::Disk);
    assert_eq!(outcome.image.unwrap().dimensions(), (6, 4));
    assert_eq!(outcome.data, Some(data));

    // The disk hit was promoted to memory
    let outcome = second
        .query(KEY, &CacheQueryOptions::default(), CacheType::All)
        .await;
    assert_eq!(outcome.cache_type, CacheType::Memory);
}

#[tokio::test]
async fn test_namespaces_are_isolated() {
    let dir = TempDir::new().unwrap();
    let avatars = engine(&dir, "avatars", CacheConfig::default());
    let banners = engine(&dir, "banners", CacheConfig::default());

    avatars
        .store_data_to_disk(png_bytes(2, 2).to_vec(), KEY)
        .await
        .unwrap();

    assert_eq!(avatars.contains(KEY, CacheType::All).await, CacheType::Disk);
    assert_eq!(banners.contains(KEY, CacheType::All).await, CacheType::None);
    assert_ne!(
        avatars.cache_path_for_key(KEY),
        banners.cache_path_for_key(KEY)
    );
}

#[tokio::test]
async fn test_size_sweep_trims_to_half_the_limit() {
    let dir = TempDir::new().unwrap();
    let entry = vec![7u8; 1_000];
    let cache = engine(
        &dir,
        "bounded",
        CacheConfig::default().with_max_disk_size(4_000),
    );

    for i in 0..6 {
        cache
            .store_data_to_disk(entry.clone(), &format!("https://example.com/{}.png", i))
            .await
            .unwrap();
    }
    assert_eq!(cache.total_disk_size().await, 6_000);

    let sweep = cache.remove_expired().await.unwrap();
    assert_eq!(sweep.removed_by_age, 0);
    assert!(sweep.remaining_bytes <= 2_000);
    assert_eq!(sweep.removed_by_size, 6 - sweep.remaining_count);
    assert_eq!(cache.total_disk_size().await, sweep.remaining_bytes);
}

#[tokio::test]
async fn test_zero_age_sweep_empties_disk() {
    let dir = TempDir::new().unwrap();
    let cache = engine(
        &dir,
        "ephemeral",
        CacheConfig::default().with_max_disk_age_secs(0),
    );
    cache
        .store_data_to_disk(png_bytes(2, 2).to_vec(), KEY)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let sweep = cache.remove_expired().await.unwrap();
    assert_eq!(sweep.removed_by_age, 1);
    assert_eq!(cache.total_disk_count().await, 0);
}

#[tokio::test]
async fn test_memory_count_limit_keeps_disk_copies() {
    let dir = TempDir::new().unwrap();
    let cache = engine(
        &dir,
        "small-memory",
        CacheConfig::default()
            .with_max_memory_count(2)
            .with_weak_memory_cache(false),
    );

    for i in 0..3 {
        let (image, data) = decoded(3, 3);
        cache
            .store(
                Some(image),
                Some(data),
                &format!("https://example.com/{}.png", i),
                CacheType::All,
            )
            .await
            .unwrap();
    }

    assert_eq!(cache.memory().total_count(), 2);
    assert!(cache.query_memory("https://example.com/0.png").is_none());
    assert_eq!(cache.total_disk_count().await, 3);
    assert_eq!(
        cache
            .contains("https://example.com/0.png", CacheType::All)
            .await,
        CacheType::Disk
    );
}

#[tokio::test]
async fn test_extended_data_follows_its_entry() {
    let dir = TempDir::new().unwrap();
    let cache = engine(&dir, "extended", CacheConfig::default());
    cache
        .store_data_to_disk(png_bytes(2, 2).to_vec(), KEY)
        .await
        .unwrap();
    cache
        .set_extended_data(KEY, Some(b"etag=abc".to_vec()))
        .await
        .unwrap();

    let reopened = engine(&dir, "extended", CacheConfig::default());
    assert_eq!(
        reopened.extended_data(KEY).await,
        Some(b"etag=abc".to_vec())
    );

    reopened.remove(KEY, CacheType::All).await.unwrap();
    assert_eq!(reopened.extended_data(KEY).await, None);
}

#[tokio::test]
async fn test_moved_cache_keeps_entries() {
    let dir = TempDir::new().unwrap();
    let destination = TempDir::new().unwrap();
    let cache = engine(&dir, "movable", CacheConfig::default());
    cache
        .store_data_to_disk(png_bytes(2, 2).to_vec(), KEY)
        .await
        .unwrap();

    let target = destination.path().join("relocated");
    cache.move_cache_directory(&target).await.unwrap();

    assert_eq!(cache.disk_root(), target);
    assert!(cache.cache_path_for_key(KEY).unwrap().starts_with(&target));
    assert_eq!(cache.contains(KEY, CacheType::Disk).await, CacheType::Disk);
}

#[tokio::test]
async fn test_caches_manager_behind_request_manager() {
    let dir = TempDir::new().unwrap();
    let shared = engine(&dir, "shared", CacheConfig::default());
    let local = engine(&dir, "local", CacheConfig::default());

    // A shared cache already holds the image
    let (image, data) = decoded(9, 9);
    shared
        .store(Some(image), Some(data), KEY, CacheType::All)
        .await
        .unwrap();

    let caches = CachesManager::new();
    caches.add_cache(shared.clone());
    caches.add_cache(local.clone());
    assert_eq!(caches.store_policy, CachesManagerOperationPolicy::HighestOnly);

    let transport = MockTransport::new();
    transport.route(KEY, MockResponse::png(1, 1));
    let coordinator = Arc::new(DownloadCoordinator::new(
        DownloaderConfig::default(),
        transport.clone(),
    ));
    let manager = RequestManager::new(Arc::new(caches), coordinator);

    let loaded = manager
        .load_image(KEY, ImageOptions::WAIT_STORE_CACHE, LoadContext::default())
        .await
        .unwrap();

    // Served by the lower priority cache, no network
    assert_eq!(loaded.image.unwrap().dimensions(), (9, 9));
    assert_ne!(loaded.cache_type, CacheType::None);
    assert_eq!(transport.total_requests(), 0);

    let other = "https://images.example.com/dog.png";
    transport.route(other, MockResponse::png(2, 3));
    let loaded = manager
        .load_image(other, ImageOptions::WAIT_STORE_CACHE, LoadContext::default())
        .await
        .unwrap();
    assert_eq!(loaded.cache_type, CacheType::None);

    // Stores land in the highest priority cache only
    assert_eq!(local.contains(other, CacheType::All).await, CacheType::Memory);
    assert_eq!(shared.contains(other, CacheType::All).await, CacheType::None);
    assert_eq!(manager.cache().contains(other, CacheType::Disk).await, CacheType::Disk);
}
