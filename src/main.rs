//! Image Fetcher CLI application
//!
//! Command-line interface for loading images through the memory and disk
//! cache, prefetching URL lists and maintaining the cache directory.

use std::process;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use image_fetcher::cli::{
    handle_cache, handle_config, handle_fetch, handle_prefetch, Cli, Commands, Pipeline,
};
use image_fetcher::config::AppConfig;
use image_fetcher::errors::Result;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Main application logic
async fn run() -> Result<()> {
    let cli = Cli::parse_args();

    let config = AppConfig::load(cli.global.config.clone()).await?;
    init_logging(&cli, &config);

    info!("Image Fetcher v{} starting", env!("CARGO_PKG_VERSION"));

    let quiet = cli.global.quiet;
    match cli.command {
        Commands::Fetch(args) => {
            info!("Executing fetch command");
            let pipeline = Pipeline::build(&config, cli.global.cache_dir)?;
            handle_fetch(args, &pipeline, quiet).await
        }
        Commands::Prefetch(args) => {
            info!("Executing prefetch command");
            let pipeline = Pipeline::build(&config, cli.global.cache_dir)?;
            handle_prefetch(args, &pipeline, &config, quiet).await
        }
        Commands::Cache(args) => {
            info!("Executing cache command");
            let pipeline = Pipeline::build(&config, cli.global.cache_dir)?;
            handle_cache(args, &pipeline).await
        }
        Commands::Config(args) => handle_config(args, &config).await,
    }
}

/// Initialize logging from the CLI flags, falling back to the config file
fn init_logging(cli: &Cli, config: &AppConfig) {
    let level = cli
        .log_level_override()
        .map(|level| level.to_string().to_lowercase())
        .unwrap_or_else(|| config.logging.level.to_lowercase());

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("image_fetcher={}", level).parse() {
        filter = filter.add_directive(directive);
    }

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(config.logging.colored_output)
        .with_level(cli.global.very_verbose)
        .init();

    if cli.global.very_verbose {
        info!("Very verbose logging enabled");
    } else if cli.global.verbose {
        info!("Verbose logging enabled");
    }
}
