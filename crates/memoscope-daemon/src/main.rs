//! `memoscoped`: the screen-memory appliance binary. Wires Capture,
//! Ingestion, and Search into one process and exposes them as CLI
//! subcommands.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use memoscope_capture::{CaptureLoop, DEFAULT_HAMMING_THRESHOLD};
use memoscope_catalog::{Catalog, FolderType, SearchFilters};
use memoscope_gateway::ModelGateway;
use memoscope_ingest::IngestPipeline;
use memoscope_search::SearchEngine;
use tokio::sync::Mutex;

use config::{default_config_path, load_config, Config};

#[derive(Parser)]
#[command(name = "memoscoped")]
#[command(about = "Screen-memory appliance: capture, ingest, and search screenshots")]
#[command(version)]
struct Cli {
    /// Path to a YAML config file (defaults to the platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the foreground daemon: capture loop, continuous watch, plugin dispatch
    Run,
    /// One-shot batch scan of a folder
    Scan { folder: PathBuf },
    /// Mark every entity stale for the next search-index pass
    Reindex,
    /// Drain the reindex backlog, re-embedding stale entities
    SearchIndex {
        #[arg(long)]
        force: bool,
    },
    /// Run a hybrid search query against the catalog
    Search {
        query: String,
        #[arg(long)]
        limit: Option<i64>,
    },
}

fn main() -> std::process::ExitCode {
    match run() {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::ExitCode::from(1)
        }
    }
}

fn run() -> Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().map(Ok).unwrap_or_else(default_config_path)?;
    let config = load_config(&config_path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, path = %config_path.display(), "failed to load config, using defaults");
        Config::default()
    });

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    rt.block_on(async_main(config, cli.command))
}

async fn async_main(config: Config, command: Commands) -> Result<()> {
    std::fs::create_dir_all(&config.base_dir)?;
    let catalog = Arc::new(Mutex::new(Catalog::open(&config.database_path())?));
    let (library_id, folder_id) = {
        let cat = catalog.lock().await;
        let library = match cat.get_library_by_name(&config.default_library)? {
            Some(l) => l,
            None => cat.create_library(&config.default_library)?,
        };
        let screenshots_dir = config.screenshots_dir();
        let folder = cat.add_folder(library.id, &screenshots_dir.to_string_lossy(), FolderType::Default)?;
        (library.id, folder.id)
    };

    let (ocr_config, vlm_config, embedding_config) = config.to_gateway_configs();
    let gateway = Arc::new(ModelGateway::new(ocr_config, vlm_config, embedding_config));

    match command {
        Commands::Run => run_daemon(config, catalog, gateway, library_id, folder_id).await,
        Commands::Scan { folder } => {
            let pipeline = IngestPipeline::new(catalog, gateway, 8);
            let stats = pipeline.scan_folder(library_id, folder_id, &folder).await?;
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({
                "scanned": stats.scanned,
                "created": stats.created,
                "updated": stats.updated,
                "deleted": stats.deleted,
            }))?);
            Ok(())
        }
        Commands::Reindex => {
            let pipeline = IngestPipeline::new(catalog, gateway, 8);
            let n = pipeline.reindex().await?;
            println!("marked {n} entities for reindex");
            Ok(())
        }
        Commands::SearchIndex { force } => {
            let pipeline = IngestPipeline::new(catalog, gateway, 8);
            let stats = pipeline.search_index(force).await?;
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({
                "indexed": stats.indexed,
                "failed": stats.failed,
                "orphans_removed": stats.orphans_removed,
            }))?);
            Ok(())
        }
        Commands::Search { query, limit } => {
            let engine = SearchEngine::new(catalog, gateway);
            let results = engine.hybrid_search(&query, &SearchFilters::default(), limit.unwrap_or(memoscope_search::DEFAULT_LIMIT)).await?;
            if results.is_empty() {
                eprintln!("no matches");
            }
            for hit in &results {
                println!("{}\t{}", hit.entity.id, hit.entity.filepath);
            }
            Ok(())
        }
    }
}

/// Foreground daemon (`5`): Capture Loop ticking on `record_interval`,
/// Ingestion Pipeline's continuous watch over the screenshots folder, and
/// a signal-driven shutdown (`tokio::select!` over the work future and
/// SIGTERM/SIGINT).
async fn run_daemon(
    config: Config,
    catalog: Arc<Mutex<Catalog>>,
    gateway: Arc<ModelGateway>,
    library_id: i64,
    folder_id: i64,
) -> Result<()> {
    let capturer = Arc::new(memoscope_capture::SyntheticCapturer::new(
        vec![memoscope_capture::DisplayId { id: "main".to_string(), name: "main".to_string() }],
        1920,
        1080,
    ));
    let capture_loop = CaptureLoop::new(capturer, config.screenshots_dir(), DEFAULT_HAMMING_THRESHOLD);
    let pipeline = Arc::new(IngestPipeline::new(catalog, gateway, 8));
    let screenshots_dir = config.screenshots_dir();
    let record_interval = std::time::Duration::from_secs(config.record_interval.max(1));

    // Baseline batch scan at startup catches anything written before this
    // process existed; the continuous watch takes over from there (`4.D`:
    // batch scan and continuous watch share the same per-file routine).
    if let Err(e) = pipeline.scan_folder(library_id, folder_id, &screenshots_dir).await {
        tracing::warn!(error = %e, "startup scan failed");
    }
    let watch = pipeline.watch(library_id, folder_id, &screenshots_dir).await?;

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

    tracing::info!("memoscoped starting, base_dir={}", config.base_dir.display());

    tokio::select! {
        result = daemon_loop(capture_loop, pipeline, watch, record_interval) => {
            result?;
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM, shutting down");
        }
        _ = sigint.recv() => {
            tracing::info!("received SIGINT, shutting down");
        }
    }

    tracing::info!("memoscoped stopped");
    Ok(())
}

/// Ticks the Capture Loop on `record_interval`, sweeps the continuous
/// watcher on `SWEEP_INTERVAL`, and drains the reindex backlog on a slower
/// cadence so captions/OCR results picked up by plugin dispatch make it
/// into the FTS/vector indexes without an operator running `search-index`
/// by hand.
async fn daemon_loop(
    capture_loop: CaptureLoop,
    pipeline: Arc<IngestPipeline>,
    watch: memoscope_ingest::ContinuousWatch,
    record_interval: std::time::Duration,
) -> Result<()> {
    const REINDEX_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

    let mut ticker = tokio::time::interval(record_interval);
    let mut sweep = tokio::time::interval(memoscope_ingest::SWEEP_INTERVAL);
    let mut reindex_tick = tokio::time::interval(REINDEX_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = capture_loop.run_tick().await {
                    tracing::warn!(error = %e, "capture tick failed");
                }
            }
            _ = sweep.tick() => {
                if let Err(e) = watch.sweep().await {
                    tracing::warn!(error = %e, "watch sweep failed");
                }
            }
            _ = reindex_tick.tick() => {
                if let Err(e) = pipeline.search_index(false).await {
                    tracing::warn!(error = %e, "background search-index pass failed");
                }
            }
        }
    }
}
