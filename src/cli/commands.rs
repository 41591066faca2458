//! Command handlers for Image Fetcher CLI
//!
//! This module wires the configuration file and global flags into a cache
//! engine, download coordinator and request manager, then runs the selected
//! command against them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::app::cache::format_bytes;
use crate::app::{
    CacheEngine, CacheType, DownloadCoordinator, HttpTransport, ImageOptions, LoadContext,
    LoadedImage, PrefetchCoordinator, PrefetchEvent, RequestManager, StandardCoder,
};
use crate::cli::args::parse_url_list;
use crate::cli::{
    CacheAction, CacheArgs, ConfigAction, ConfigArgs, FetchArgs, PrefetchArgs, ProgressConfig,
    ProgressDisplay,
};
use crate::config::AppConfig;
use crate::errors::{AppError, ConfigError, Result};

/// Components shared by the commands
pub struct Pipeline {
    pub cache: Arc<CacheEngine>,
    pub manager: RequestManager,
}

impl Pipeline {
    /// Build the cache and downloader described by the configuration
    ///
    /// `cache_dir` overrides `[cache] directory` from the file.
    pub fn build(config: &AppConfig, cache_dir: Option<PathBuf>) -> Result<Self> {
        let (cache_config, downloader_config, client_config, _) = config.to_runtime_config();
        let directory = cache_dir.or_else(|| config.cache.directory.clone());

        let cache = Arc::new(CacheEngine::new(
            config.cache.namespace.clone(),
            directory,
            cache_config,
            Arc::new(StandardCoder::new()),
        )?);

        let transport = HttpTransport::new(client_config)?;
        let coordinator = Arc::new(DownloadCoordinator::new(
            downloader_config,
            Arc::new(transport),
        ));

        debug!("Pipeline ready with cache at {}", cache.disk_root().display());

        Ok(Self {
            manager: RequestManager::new(cache.clone(), coordinator),
            cache,
        })
    }
}

/// Handle the fetch command
///
/// Every URL is attempted; the command fails if any of them failed.
pub async fn handle_fetch(args: FetchArgs, pipeline: &Pipeline, quiet: bool) -> Result<()> {
    let start_time = Instant::now();
    // The process exits right after the last load, so stores must finish first
    let options = args.options() | ImageOptions::WAIT_STORE_CACHE;
    let context = LoadContext::default();

    let mut failed = 0;
    for url in &args.urls {
        match pipeline
            .manager
            .load_image(url, options, context.clone())
            .await
        {
            Ok(loaded) => {
                let path = pipeline
                    .manager
                    .cache_key_for_url(url, &context)
                    .and_then(|key| pipeline.cache.cache_path_for_key(&key));
                if !quiet {
                    print_loaded(&loaded, path);
                }
            }
            Err(e) => {
                warn!("Failed to load {}: {}", url, e);
                eprintln!("{}: {} (code {})", url, e, e.code());
                failed += 1;
            }
        }
    }

    info!(
        "Fetched {} URLs in {:?} ({} failed)",
        args.urls.len(),
        start_time.elapsed(),
        failed
    );

    if failed > 0 {
        return Err(AppError::generic(format!(
            "{} of {} images failed to load",
            failed,
            args.urls.len()
        )));
    }
    Ok(())
}

fn print_loaded(loaded: &LoadedImage, path: Option<PathBuf>) {
    let source = match loaded.cache_type {
        CacheType::None => "network",
        CacheType::Memory => "memory",
        CacheType::Disk | CacheType::All => "disk",
    };
    let description = loaded
        .image
        .as_ref()
        .map(|image| {
            format!(
                "{}x{} {:?}",
                image.width(),
                image.height(),
                image.format()
            )
        })
        .unwrap_or_else(|| "undecoded".to_string());

    println!("{}", loaded.url);
    println!("  source: {}", source);
    println!("  image:  {}", description);
    if let Some(path) = path {
        println!("  cached: {}", path.display());
    }
}

/// Handle the prefetch command
///
/// Ctrl-C cancels the batch; the summary still reports what finished.
pub async fn handle_prefetch(
    args: PrefetchArgs,
    pipeline: &Pipeline,
    config: &AppConfig,
    quiet: bool,
) -> Result<()> {
    args.validate().map_err(AppError::generic)?;

    let mut urls = args.urls.clone();
    if let Some(file) = &args.file {
        let content = tokio::fs::read_to_string(file).await.map_err(|e| {
            AppError::generic(format!("Failed to read URL list {}: {}", file.display(), e))
        })?;
        urls.extend(parse_url_list(&content));
    }

    let mut prefetch_config = config.prefetch.to_runtime_config();
    if let Some(concurrency) = args.concurrency {
        prefetch_config = prefetch_config.with_concurrency(concurrency);
    }
    let options = prefetch_config.options | ImageOptions::WAIT_STORE_CACHE;
    prefetch_config = prefetch_config.with_options(options);
    prefetch_config.validate()?;

    info!(
        "Prefetching {} URLs with concurrency {}",
        urls.len(),
        prefetch_config.max_concurrent_prefetch_count
    );

    let coordinator = PrefetchCoordinator::new(pipeline.manager.clone(), prefetch_config);
    let mut display = ProgressDisplay::start(
        ProgressConfig {
            quiet,
            ..ProgressConfig::default()
        },
        urls.len(),
    )?;
    let mut token = coordinator.prefetch_urls(urls, None);

    enum Step {
        Event(Option<PrefetchEvent>),
        Interrupted,
    }

    let mut interrupted = false;
    loop {
        let step = tokio::select! {
            event = token.events.recv() => Step::Event(event),
            _ = tokio::signal::ctrl_c(), if !interrupted => Step::Interrupted,
        };

        match step {
            Step::Event(Some(PrefetchEvent::Finished(_))) | Step::Event(None) => break,
            Step::Event(Some(event)) => display.update(&event),
            Step::Interrupted => {
                warn!("Interrupted, cancelling prefetch");
                interrupted = true;
                token.cancel();
            }
        }
    }

    let stats = token.wait().await;
    display.finish(&stats);

    if interrupted {
        println!("Prefetch cancelled");
    }
    Ok(())
}

/// Handle cache management commands
pub async fn handle_cache(args: CacheArgs, pipeline: &Pipeline) -> Result<()> {
    let cache = &pipeline.cache;

    match args.action {
        CacheAction::Info { json: true } => {
            let stats = cache.stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        CacheAction::Info { json: false } => {
            let stats = cache.stats().await;
            println!("Cache Information");
            println!("=================");
            print!("{}", stats);
        }
        CacheAction::Clear { memory, disk } => {
            let target = CacheAction::clear_target(memory, disk);
            let before = cache.total_disk_size().await;
            cache.clear(target).await?;
            match target {
                CacheType::Memory => println!("Cleared memory cache"),
                _ => println!("Cleared cache, freed {}", format_bytes(before)),
            }
        }
        CacheAction::Expire => {
            let sweep = cache.remove_expired().await?;
            println!(
                "Removed {} expired and {} over-limit entries",
                sweep.removed_by_age, sweep.removed_by_size
            );
            println!(
                "{} entries remain ({})",
                sweep.remaining_count,
                format_bytes(sweep.remaining_bytes)
            );
        }
        CacheAction::Path { key } => match cache.cache_path_for_key(&key) {
            Some(path) => println!("{}", path.display()),
            None => {
                return Err(AppError::generic(format!(
                    "No disk path for key '{}'",
                    key
                )))
            }
        },
        CacheAction::Move { destination } => {
            cache.move_cache_directory(&destination).await?;
            println!("Moved cache to {}", destination.display());
        }
    }

    Ok(())
}

/// Handle configuration commands
pub async fn handle_config(args: ConfigArgs, config: &AppConfig) -> Result<()> {
    match args.action {
        ConfigAction::Init => {
            let path = AppConfig::initialize_first_run().await?;
            println!("Configuration file: {}", path.display());
        }
        ConfigAction::Show => {
            let content = toml::to_string_pretty(config).map_err(ConfigError::from)?;
            print!("{}", content);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pipeline_in(temp_dir: &TempDir) -> Pipeline {
        Pipeline::build(&AppConfig::default(), Some(temp_dir.path().to_path_buf())).unwrap()
    }

    #[tokio::test]
    async fn test_pipeline_uses_cache_dir_override() {
        let temp_dir = TempDir::new().unwrap();
        let pipeline = pipeline_in(&temp_dir);

        assert_eq!(pipeline.cache.disk_root(), temp_dir.path().join("default"));
        assert!(!pipeline.manager.is_running());
    }

    #[tokio::test]
    async fn test_cache_only_fetch_fails_without_network() {
        let temp_dir = TempDir::new().unwrap();
        let pipeline = pipeline_in(&temp_dir);

        let args = FetchArgs {
            urls: vec!["https://example.invalid/a.png".to_string()],
            refresh: false,
            from_cache_only: true,
            retry_failed: false,
        };
        assert!(handle_fetch(args, &pipeline, true).await.is_err());
    }

    #[tokio::test]
    async fn test_cache_clear_and_path() {
        let temp_dir = TempDir::new().unwrap();
        let pipeline = pipeline_in(&temp_dir);
        pipeline
            .cache
            .store_data_to_disk(b"bytes".to_vec(), "https://example.com/a.png")
            .await
            .unwrap();
        assert_eq!(pipeline.cache.total_disk_count().await, 1);

        handle_cache(
            CacheArgs {
                action: CacheAction::Path {
                    key: "https://example.com/a.png".to_string(),
                },
            },
            &pipeline,
        )
        .await
        .unwrap();

        handle_cache(
            CacheArgs {
                action: CacheAction::Clear {
                    memory: false,
                    disk: true,
                },
            },
            &pipeline,
        )
        .await
        .unwrap();
        assert_eq!(pipeline.cache.total_disk_count().await, 0);
    }

    #[tokio::test]
    async fn test_prefetch_from_missing_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let pipeline = pipeline_in(&temp_dir);

        let args = PrefetchArgs {
            urls: Vec::new(),
            file: Some(temp_dir.path().join("missing.txt")),
            concurrency: None,
        };
        let result = handle_prefetch(args, &pipeline, &AppConfig::default(), true).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_prefetch_of_invalid_urls_completes() {
        let temp_dir = TempDir::new().unwrap();
        let pipeline = pipeline_in(&temp_dir);
        let list = temp_dir.path().join("urls.txt");
        tokio::fs::write(&list, "# nothing fetchable\nnot a url\n").await.unwrap();

        let args = PrefetchArgs {
            urls: Vec::new(),
            file: Some(list),
            concurrency: Some(2),
        };
        handle_prefetch(args, &pipeline, &AppConfig::default(), true)
            .await
            .unwrap();
    }
}
