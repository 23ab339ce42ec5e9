//! Reindex job (`4.D`): re-derives `metadata_text`, FTS rows, and vector
//! rows for every entity whose `last_scan_at` outruns its
//! `(fts_indexed_at, vec_indexed_at)` stamps (spec.md §9's "`last_scan_at`
//! is the reindex source of truth" resolution), in batches of 4 so one
//! slow embedding call doesn't stall the whole backlog.

use std::sync::Arc;

use memoscope_catalog::Catalog;
use memoscope_gateway::ModelGateway;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::error::Result;

const BATCH_SIZE: i64 = 4;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReindexStats {
    pub indexed: usize,
    pub failed: usize,
    pub orphans_removed: usize,
}

/// Marks every entity as needing reindex (`4.D`: `reindex`), used by the
/// `reindex` CLI subcommand before a `search-index` pass.
pub async fn mark_all_for_reindex(catalog: &Arc<Mutex<Catalog>>) -> Result<usize> {
    let cat = catalog.lock().await;
    Ok(cat.reindex_all()?)
}

/// Drains `entities_needing_reindex` in batches of 4 until none remain,
/// then cleans up orphaned index rows (`4.D`: "Orphan cleanup").
#[instrument(skip(catalog, gateway))]
pub async fn run_search_index(catalog: Arc<Mutex<Catalog>>, gateway: Arc<ModelGateway>, force: bool) -> Result<ReindexStats> {
    let mut stats = ReindexStats::default();
    loop {
        let batch = {
            let cat = catalog.lock().await;
            cat.entities_needing_reindex(BATCH_SIZE, force)?
        };
        if batch.is_empty() {
            break;
        }
        for entity in batch {
            match reindex_one(&catalog, &gateway, entity.id).await {
                Ok(()) => stats.indexed += 1,
                Err(e) => {
                    warn!(entity_id = entity.id, error = %e, "failed to reindex entity");
                    stats.failed += 1;
                }
            }
        }
        // `force` replays the same rows forever since it ignores the
        // indexed-at stamps; one pass per invocation.
        if force {
            break;
        }
    }

    let orphans_removed = {
        let cat = catalog.lock().await;
        cat.delete_orphan_index_rows()?
    };
    stats.orphans_removed = orphans_removed;
    info!(?stats, "search-index run complete");
    Ok(stats)
}

async fn reindex_one(catalog: &Arc<Mutex<Catalog>>, gateway: &Arc<ModelGateway>, entity_id: i64) -> Result<()> {
    let text = {
        let cat = catalog.lock().await;
        cat.metadata_text(entity_id)?
    };

    let embedding = gateway.embed_for_storage(std::slice::from_ref(&text)).await?;
    let vec = embedding.into_iter().next().unwrap_or_default();

    let mut cat = catalog.lock().await;
    cat.index_fts(entity_id, &text)?;
    cat.index_vec(entity_id, &vec)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoscope_catalog::{FileTypeGroup, FolderType};
    use memoscope_gateway::{EmbeddingConfig, OcrConfig, VlmConfig};

    #[tokio::test]
    async fn run_search_index_indexes_pending_entities() {
        let mut cat = Catalog::in_memory().unwrap();
        let lib = cat.create_library("L").unwrap();
        let folder = cat.add_folder(lib.id, "/tmp/A", FolderType::Default).unwrap();
        let id = cat
            .upsert_entity(lib.id, folder.id, "/tmp/A/a.webp", "a.webp", 1, "webp", FileTypeGroup::Image, 1, 1, &[])
            .unwrap();
        cat.touch(id).unwrap();

        let catalog = Arc::new(Mutex::new(cat));
        let gateway = Arc::new(ModelGateway::new(OcrConfig::default(), VlmConfig::default(), EmbeddingConfig::default()));
        let stats = run_search_index(catalog.clone(), gateway, false).await.unwrap();
        assert_eq!(stats.indexed, 1);
        assert_eq!(stats.failed, 0);

        let cat = catalog.lock().await;
        assert_eq!(cat.entities_needing_reindex(10, false).unwrap().len(), 0);
    }
}
