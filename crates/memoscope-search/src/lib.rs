//! Component E — Hybrid Search (`4.E`): lexical + vector retrieval over the
//! Catalog Store, fused by reciprocal rank fusion, hydrated into full
//! entity records.

pub mod error;
pub mod fusion;
pub mod query_cache;

pub use error::{Result, SearchError};
pub use fusion::{reciprocal_rank_fusion, RRF_K};
pub use query_cache::QueryCache;

use std::sync::Arc;

use memoscope_catalog::{Catalog, HydratedEntity, SearchFilters};
use memoscope_gateway::ModelGateway;
use tokio::sync::Mutex;
use tracing::instrument;

/// `limit` defaults to 200 per `4.E`.
pub const DEFAULT_LIMIT: i64 = 200;

pub struct SearchEngine {
    catalog: Arc<Mutex<Catalog>>,
    gateway: Arc<ModelGateway>,
    cache: Mutex<QueryCache>,
}

impl SearchEngine {
    pub fn new(catalog: Arc<Mutex<Catalog>>, gateway: Arc<ModelGateway>) -> Self {
        Self { catalog, gateway, cache: Mutex::new(QueryCache::default()) }
    }

    /// Runs the full `4.E` algorithm: lexical retrieval, vector retrieval
    /// (embedding the query through the cache), RRF fusion, then hydration
    /// in fused order. An empty query short-circuits to an empty result
    /// (`4.E`: "Empty query or empty embedding returns an empty result").
    #[instrument(skip(self))]
    pub async fn hybrid_search(&self, query: &str, filters: &SearchFilters, limit: i64) -> Result<Vec<HydratedEntity>> {
        if query.trim().is_empty() {
            return Ok(vec![]);
        }
        let limit = if limit <= 0 { DEFAULT_LIMIT } else { limit };

        let lexical_ids = {
            let cat = self.catalog.lock().await;
            cat.full_text_search(query, filters, limit)?
        };

        let qvec = self.embed_query_cached(query).await?;
        let vector_ids = if qvec.is_empty() {
            vec![]
        } else {
            let cat = self.catalog.lock().await;
            cat.vector_search(&qvec, filters, limit as usize)?
        };

        let fused = reciprocal_rank_fusion(&[lexical_ids, vector_ids], limit as usize);

        let cat = self.catalog.lock().await;
        let mut hydrated = Vec::with_capacity(fused.len());
        for id in fused {
            // Rows that failed to hydrate are silently dropped (`4.E`).
            if let Ok(entity) = cat.hydrate(id) {
                hydrated.push(entity);
            }
        }
        Ok(hydrated)
    }

    async fn embed_query_cached(&self, query: &str) -> Result<Vec<f32>> {
        {
            let mut cache = self.cache.lock().await;
            if let Some(cached) = cache.get(query) {
                return Ok(cached);
            }
        }
        let embedding = self.gateway.embed_query(query).await?;
        let mut cache = self.cache.lock().await;
        cache.insert(query.to_string(), embedding.clone());
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoscope_catalog::{DataType, FileTypeGroup, FolderType, SourceType};
    use memoscope_gateway::{EmbeddingConfig, OcrConfig, VlmConfig};

    async fn seeded_engine() -> (SearchEngine, Arc<Mutex<Catalog>>) {
        let mut cat = Catalog::in_memory().unwrap();
        let lib = cat.create_library("L").unwrap();
        let folder = cat.add_folder(lib.id, "/tmp/A", FolderType::Default).unwrap();

        let captions = [("cat on sofa", 1, 1), ("dog on grass", 2, 2), ("red car", 3, 3)];
        let mut ids = vec![];
        for (i, (caption, created, modified)) in captions.iter().enumerate() {
            let path = format!("/tmp/A/{i}.webp");
            let id = cat
                .upsert_entity(
                    lib.id, folder.id, &path, &format!("{i}.webp"), 1, "webp",
                    FileTypeGroup::Image, *created, *modified, &[],
                )
                .unwrap();
            cat.upsert_metadata(id, "caption", caption, "vlm", SourceType::PluginGenerated, DataType::Text)
                .unwrap();
            let text = cat.metadata_text(id).unwrap();
            cat.index_fts(id, &text).unwrap();
            ids.push(id);
        }
        // Vector order rigged so every entity is "close" in the order
        // scenario 3 of spec.md §8 expects: entity 1 ranks first everywhere.
        cat.index_vec(ids[0], &[1.0, 0.0, 0.0]).unwrap();
        cat.index_vec(ids[1], &[0.9, 0.1, 0.0]).unwrap();
        cat.index_vec(ids[2], &[0.0, 0.0, 1.0]).unwrap();

        let catalog = Arc::new(Mutex::new(cat));
        let gateway = Arc::new(ModelGateway::new(OcrConfig::default(), VlmConfig::default(), EmbeddingConfig::default()));
        (SearchEngine::new(catalog.clone(), gateway), catalog)
    }

    #[tokio::test]
    async fn empty_query_returns_empty_result() {
        let (engine, _cat) = seeded_engine().await;
        let results = engine.hybrid_search("", &SearchFilters::default(), 10).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn lexical_match_surfaces_the_captioned_entity() {
        let (engine, _cat) = seeded_engine().await;
        let results = engine.hybrid_search("cat", &SearchFilters::default(), 10).await.unwrap();
        assert!(!results.is_empty());
        assert!(results[0].metadata.iter().any(|m| m.key == "caption" && m.value.contains("cat")));
    }

    #[tokio::test]
    async fn time_bounded_search_respects_filters() {
        let (engine, _cat) = seeded_engine().await;
        let filters = SearchFilters { start_unix: Some(2), end_unix: Some(3), ..Default::default() };
        let results = engine.hybrid_search("on", &filters, 10).await.unwrap();
        assert!(results.iter().all(|r| r.entity.file_created_at >= 2));
    }
}
