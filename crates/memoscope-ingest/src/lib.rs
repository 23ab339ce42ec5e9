//! Component D — Ingestion Pipeline (`4.D`): reconciles files on disk with
//! the Catalog Store, dispatches plugin work, and keeps the search indexes
//! fresh. Wires together `memoscope-catalog`, `memoscope-gateway`, and
//! `memoscope-capture` as one process-scoped struct built once at startup
//! and handed to the CLI's subcommands.

pub mod continuous;
pub mod dispatch;
pub mod error;
pub mod reindex;
pub mod sparsity;
pub mod walker;
pub mod watcher;

pub use continuous::{ContinuousWatch, WatchStats};
pub use dispatch::{EntityReadyEvent, PluginDispatcher};
pub use error::{IngestError, Result};
pub use reindex::{mark_all_for_reindex, run_search_index, ReindexStats};
pub use sparsity::SparsityTracker;
pub use walker::{BatchScanner, ScanStats};
pub use watcher::{FileEvent, FileEventKind, FolderWatcher, DEBOUNCE, SWEEP_INTERVAL};

use std::path::Path;
use std::sync::Arc;

use memoscope_catalog::Catalog;
use memoscope_gateway::ModelGateway;
use tokio::sync::Mutex;
use tracing::{info, instrument};

/// Process-scoped handle combining the catalog, the model gateway, and the
/// plugin dispatcher — constructed once by the daemon binary and shared by
/// the `scan`/`reindex`/`search-index` CLI subcommands and the continuous
/// watch loop alike.
pub struct IngestPipeline {
    pub catalog: Arc<Mutex<Catalog>>,
    pub gateway: Arc<ModelGateway>,
    pub dispatcher: Arc<PluginDispatcher>,
    max_concurrent: usize,
}

impl IngestPipeline {
    pub fn new(catalog: Arc<Mutex<Catalog>>, gateway: Arc<ModelGateway>, max_concurrent: usize) -> Self {
        let dispatcher = PluginDispatcher::spawn(catalog.clone(), gateway.clone());
        Self { catalog, gateway, dispatcher, max_concurrent: max_concurrent.max(1) }
    }

    /// Runs one batch scan over `folder_path` (`scan` CLI subcommand).
    #[instrument(skip(self))]
    pub async fn scan_folder(&self, library_id: i64, folder_id: i64, folder_path: &Path) -> Result<ScanStats> {
        let scanner = BatchScanner::new(self.catalog.clone(), self.dispatcher.clone(), self.max_concurrent);
        let stats = scanner.scan(library_id, folder_id, folder_path).await?;
        info!(?stats, folder = %folder_path.display(), "scan complete");
        Ok(stats)
    }

    /// Marks every entity stale, to be picked up on the next `search-index`
    /// run (`reindex` CLI subcommand).
    pub async fn reindex(&self) -> Result<usize> {
        mark_all_for_reindex(&self.catalog).await
    }

    /// Drains the reindex backlog (`search-index` CLI subcommand).
    pub async fn search_index(&self, force: bool) -> Result<ReindexStats> {
        run_search_index(self.catalog.clone(), self.gateway.clone(), force).await
    }

    /// Builds a `ContinuousWatch` rooted at `folder_path`, sharing this
    /// pipeline's catalog and plugin dispatcher (`4.D`: continuous watch
    /// mode). The caller drives `ContinuousWatch::sweep` on its own cadence
    /// (the daemon binary does so every `SWEEP_INTERVAL`).
    pub async fn watch(&self, library_id: i64, folder_id: i64, folder_path: &Path) -> Result<ContinuousWatch> {
        let watch = ContinuousWatch::new(self.catalog.clone(), self.dispatcher.clone(), library_id, folder_id)?;
        watch.watch(folder_path).await?;
        Ok(watch)
    }
}
