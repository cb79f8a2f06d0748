//! Grid-Crawl main entry point
//!
//! This is the command-line interface for the Grid-Crawl league data crawler.

use anyhow::Context;
use clap::Parser;
use grid_crawl::config::{load_config_with_hash, Config};
use grid_crawl::crawler::{run_crawl, Coordinator};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Grid-Crawl: an incremental crawler for racing league results
///
/// Grid-Crawl walks league seasons, their sessions and every driver's laps
/// through a work queue, storing each entity as a versioned document.
#[derive(Parser, Debug)]
#[command(name = "grid-crawl")]
#[command(version)]
#[command(about = "An incremental crawler for racing league results", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// League to queue a season crawl for before running
    #[arg(long, value_name = "ID", requires = "seed_season")]
    seed_league: Option<i64>,

    /// Season to queue a crawl for before running
    #[arg(long, value_name = "ID", requires = "seed_league")]
    seed_season: Option<i64>,

    /// Validate and print the configuration without crawling
    #[arg(long, conflicts_with_all = ["stats", "seed_league"])]
    dry_run: bool,

    /// Show document counts and queue depths and exit
    #[arg(long, conflicts_with_all = ["dry_run", "seed_league"])]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(config)?;
    } else {
        handle_crawl(config, cli.seed_league.zip(cli.seed_season)).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("grid_crawl=info,warn"),
            1 => EnvFilter::new("grid_crawl=debug,info"),
            2 => EnvFilter::new("grid_crawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the validated configuration
fn handle_dry_run(config: &Config) {
    println!("=== Grid-Crawl Dry Run ===\n");

    println!("API:");
    println!("  Base URL: {}", config.api.base_url);
    println!(
        "  Auth token: {}",
        if config.api.auth_token.is_some() { "set" } else { "none" }
    );
    println!("  Timeout: {}s", config.api.timeout_secs);
    println!("  Max concurrent chunks: {}", config.api.max_concurrent_chunks);

    println!("\nDocument store:");
    println!("  Database: {}", config.store.database_path);
    println!("  Session collection: {}", config.store.session_collection);
    println!("  Season collection: {}", config.store.season_collection);

    println!("\nWork queue:");
    println!("  Database: {}", config.bus.database_path);
    println!("  Request topic: {}", config.bus.request_topic);
    println!("  Response topic: {}", config.bus.response_topic);
    println!("  Max in flight: {}", config.bus.max_in_flight);
    println!("  Poll interval: {}ms", config.bus.poll_interval_ms);
    println!("  Retry delay: {}ms", config.bus.retry_delay_ms);

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows document counts and queue depths
fn handle_stats(config: Config) -> anyhow::Result<()> {
    let coordinator = Coordinator::new(config).context("failed to open crawl databases")?;
    let stats = coordinator.stats()?;

    println!("Documents:");
    if stats.documents.is_empty() {
        println!("  (none)");
    }
    for (collection, kind, count) in &stats.documents {
        println!("  {:<12} {:<8} {:>8}", collection, kind, count);
    }

    println!("\nQueued messages:");
    if stats.queues.is_empty() {
        println!("  (none)");
    }
    for (topic, count) in &stats.queues {
        println!("  {:<21} {:>8}", topic, count);
    }

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, seed: Option<(i64, i64)>) -> anyhow::Result<()> {
    if let Some((league_id, season_id)) = seed {
        let coordinator = Coordinator::new(config.clone())?;
        coordinator
            .seed(league_id, season_id)
            .await
            .context("failed to queue seed request")?;
    }

    match run_crawl(config).await {
        Ok(()) => {
            tracing::info!("Crawl stopped cleanly");
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
