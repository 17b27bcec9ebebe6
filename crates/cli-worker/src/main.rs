use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn, LevelFilter};
use worker::{
    classify, project,
    config::WorkerConfig,
    server::{self, AppState},
    FfprobeCommand, Prober,
};

/// Video metadata extraction worker
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Override the listen address from the config file
    #[arg(short, long)]
    listen: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe a single file and print the metadata it would publish
    Probe {
        /// Local path or URL passed to ffprobe
        locator: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logger - use RUST_LOG env var or default to info level
    let mut logger = env_logger::Builder::from_default_env();
    logger.format_timestamp_secs();
    if args.verbose {
        logger.filter_level(LevelFilter::Debug);
    } else if std::env::var_os("RUST_LOG").is_none() {
        logger.filter_level(LevelFilter::Info);
    }
    logger.init();

    // Load configuration
    let mut cfg = WorkerConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(listen) = args.listen {
        cfg.listen_addr = listen;
    }

    match args.command {
        Some(Command::Probe { locator }) => probe_once(&cfg, &locator).await,
        None => run_server(cfg).await,
    }
}

async fn run_server(cfg: WorkerConfig) -> Result<()> {
    info!("Metadata worker starting");
    info!("Configuration loaded:");
    info!("  Listen address: {}", cfg.listen_addr);
    info!("  ffprobe: {}", cfg.ffprobe_bin.display());
    match &cfg.cache_dir {
        Some(dir) => info!("  Cache dir: {}", dir.display()),
        None => info!("  Cache dir: none (cache disabled)"),
    }
    match &cfg.store_url {
        Some(url) => info!("  Metadata store: {}", url),
        None => warn!("  Metadata store not configured; set it via /configure before processing"),
    }

    let state = Arc::new(AppState::new(cfg));
    server::serve(state, shutdown_signal()).await?;

    info!("Metadata worker stopped");
    Ok(())
}

async fn probe_once(cfg: &WorkerConfig, locator: &str) -> Result<()> {
    let prober = FfprobeCommand::from_config(cfg);
    let raw = prober
        .probe(locator)
        .await
        .map_err(|e| anyhow::anyhow!(e.operator_message()))?;

    let map = project(&classify(&raw));
    println!("{}", serde_json::to_string_pretty(&map)?);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
