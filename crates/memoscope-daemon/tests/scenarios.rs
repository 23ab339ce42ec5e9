//! Full-pipeline integration tests for the literal end-to-end scenarios in
//! spec `8` ("End-to-end scenarios"): each test wires together at least two
//! of the five component crates the way `memoscoped::main` does, rather
//! than exercising a single crate in isolation (those live as `#[cfg(test)]`
//! modules colocated with their subject crate).

use std::sync::Arc;
use std::time::Duration;

use memoscope_capture::{CaptureLoop, DisplayId, SyntheticCapturer, DEFAULT_HAMMING_THRESHOLD};
use memoscope_catalog::{Catalog, DataType, FileTypeGroup, FolderType, SourceType};
use memoscope_gateway::{EmbeddingConfig, ModelGateway, OcrConfig, VlmConfig};
use memoscope_ingest::IngestPipeline;
use memoscope_search::SearchEngine;
use tokio::sync::Mutex;

fn displays() -> Vec<DisplayId> {
    vec![DisplayId { id: "main".to_string(), name: "main".to_string() }]
}

/// Scenario 1 — Dedup: two identical frames captured four seconds apart
/// produce exactly one file and a sequence counter of 1.
#[tokio::test]
async fn dedup_identical_frames_yield_one_file() {
    let dir = tempfile::tempdir().unwrap();
    let capturer = Arc::new(SyntheticCapturer::new(displays(), 1920, 1080));
    let capture_loop = CaptureLoop::new(capturer, dir.path().to_path_buf(), DEFAULT_HAMMING_THRESHOLD);

    capture_loop.run_tick().await.unwrap();
    capture_loop.run_tick().await.unwrap();

    let date = chrono::Utc::now().format("%Y%m%d").to_string();
    let day_dir = dir.path().join(&date);
    let webp_count = std::fs::read_dir(&day_dir)
        .unwrap()
        .filter(|e| e.as_ref().unwrap().path().extension().map(|e| e == "webp").unwrap_or(false))
        .count();
    assert_eq!(webp_count, 1);

    let sequences = memoscope_capture::sidecar::load_sequences(&day_dir);
    assert_eq!(sequences.get("main"), Some(&1));
}

/// Scenario 2 — Scan-then-delete: a library/folder scan picks up one file,
/// and re-scanning after the file is removed drops the catalog entity.
#[tokio::test]
async fn scan_then_delete_removes_vanished_entity() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.webp");
    let metadata = memoscope_capture::metadata::CaptureMetadata {
        timestamp: "20260101-000000".to_string(),
        active_app: "App".to_string(),
        active_window: "Win".to_string(),
        screen_name: "main".to_string(),
        sequence: 0,
    };
    let image = image::RgbImage::new(8, 8);
    let bytes = memoscope_capture::metadata::encode_with_metadata(&image, &metadata).unwrap();
    std::fs::write(&path, bytes).unwrap();

    let mut cat = Catalog::in_memory().unwrap();
    let lib = cat.create_library("L").unwrap();
    let folder = cat.add_folder(lib.id, &dir.path().to_string_lossy(), FolderType::Default).unwrap();
    let catalog = Arc::new(Mutex::new(cat));
    let gateway = Arc::new(ModelGateway::new(OcrConfig::default(), VlmConfig::default(), EmbeddingConfig::default()));
    let pipeline = IngestPipeline::new(catalog.clone(), gateway, 4);

    pipeline.scan_folder(lib.id, folder.id, dir.path()).await.unwrap();
    {
        let cat = catalog.lock().await;
        assert_eq!(cat.list_entities(Some(folder.id), 100, 0).unwrap().1, 1);
    }

    std::fs::remove_file(&path).unwrap();
    pipeline.scan_folder(lib.id, folder.id, dir.path()).await.unwrap();
    {
        let cat = catalog.lock().await;
        assert_eq!(cat.list_entities(Some(folder.id), 100, 0).unwrap().1, 0);
    }
}

/// Scenario 3 — Hybrid rank: a three-entity corpus where lexical search
/// surfaces only the caption-matching entity and vector search ranks it
/// first too; the fused top hit must be that entity.
#[tokio::test]
async fn hybrid_rank_surfaces_the_best_matching_entity() {
    let mut cat = Catalog::in_memory().unwrap();
    let lib = cat.create_library("L").unwrap();
    let folder = cat.add_folder(lib.id, "/tmp/corpus", FolderType::Default).unwrap();

    let captions = ["cat on sofa", "dog on grass", "red car"];
    let mut ids = vec![];
    for (i, caption) in captions.iter().enumerate() {
        let path = format!("/tmp/corpus/{i}.webp");
        let id = cat
            .upsert_entity(
                lib.id, folder.id, &path, &format!("{i}.webp"), 1, "webp",
                FileTypeGroup::Image, i as i64, i as i64, &[],
            )
            .unwrap();
        cat.upsert_metadata(id, "caption", caption, "vlm", SourceType::PluginGenerated, DataType::Text).unwrap();
        let text = cat.metadata_text(id).unwrap();
        cat.index_fts(id, &text).unwrap();
        ids.push(id);
    }
    cat.index_vec(ids[0], &[1.0, 0.0, 0.0]).unwrap();
    cat.index_vec(ids[1], &[0.0, 1.0, 0.0]).unwrap();
    cat.index_vec(ids[2], &[0.0, 0.0, 1.0]).unwrap();

    let catalog = Arc::new(Mutex::new(cat));
    let gateway = Arc::new(ModelGateway::new(OcrConfig::default(), VlmConfig::default(), EmbeddingConfig::default()));
    let engine = SearchEngine::new(catalog, gateway);

    let results = engine.hybrid_search("cat", &memoscope_catalog::SearchFilters::default(), 10).await.unwrap();
    assert_eq!(results[0].entity.id, ids[0]);
}

/// Scenario 4 — Retry: an OCR endpoint pointed at a dead port fails all
/// three attempts with the fixed 2s back-off between them, and the caller
/// gets a typed error rather than a panic (`7`: "the offending artifact is
/// missing but the entity is indexed with whatever remains").
#[tokio::test]
async fn ocr_against_dead_endpoint_retries_then_fails() {
    let gateway = ModelGateway::new(
        OcrConfig { endpoint: Some("http://127.0.0.1:1/ocr".to_string()), use_local: false, ..OcrConfig::default() },
        VlmConfig::default(),
        EmbeddingConfig::default(),
    );

    let started = std::time::Instant::now();
    let result = gateway.recognize_text(std::path::Path::new("/tmp/does-not-matter.webp")).await;
    let elapsed = started.elapsed();

    assert!(result.is_err());
    // Two back-offs of 2s between three attempts; allow generous slack for
    // CI scheduling jitter without asserting an exact duration.
    assert!(elapsed >= Duration::from_secs(3), "expected at least 3s of backoff, got {elapsed:?}");
}

/// Scenario 5 — Sparsity adaptation: fast arrivals with slow syncs raise
/// the sparsity window above 1, matching `S = max(1, ceil(sparsity_factor *
/// p/q))`.
#[test]
fn sparsity_window_settles_above_one_under_load() {
    use memoscope_ingest::SparsityTracker;
    let mut tracker = SparsityTracker::with_battery_probe(3.0, 10, Box::new(|| false));
    let base = std::time::Instant::now();
    for i in 0..10u32 {
        tracker.record_pending_event(base + Duration::from_millis(10 * i as u64));
    }
    for _ in 0..10 {
        tracker.record_sync(Duration::from_millis(200));
    }
    tracker.update(base + Duration::from_secs(1));
    assert!(tracker.current_window() >= 2);
}

/// Scenario 6 — Time-bounded search: with entities spread across two days,
/// a query filtered to day one's range returns only day-one ids.
#[tokio::test]
async fn time_bounded_search_excludes_other_days() {
    let mut cat = Catalog::in_memory().unwrap();
    let lib = cat.create_library("L").unwrap();
    let folder = cat.add_folder(lib.id, "/tmp/two-days", FolderType::Default).unwrap();

    let day1_start = 0i64;
    let day1_end = 86_399i64;
    let day2 = 200_000i64;

    let mut day1_ids = vec![];
    for i in 0..5 {
        let created = day1_start + i * 1000;
        let path = format!("/tmp/two-days/d1-{i}.webp");
        let id = cat
            .upsert_entity(lib.id, folder.id, &path, &format!("d1-{i}.webp"), 1, "webp", FileTypeGroup::Image, created, created, &[])
            .unwrap();
        cat.upsert_metadata(id, "caption", "afternoon meeting notes", "vlm", SourceType::PluginGenerated, DataType::Text).unwrap();
        let text = cat.metadata_text(id).unwrap();
        cat.index_fts(id, &text).unwrap();
        cat.index_vec(id, &[1.0, 0.0]).unwrap();
        day1_ids.push(id);
    }
    for i in 0..5 {
        let created = day2 + i * 1000;
        let path = format!("/tmp/two-days/d2-{i}.webp");
        let id = cat
            .upsert_entity(lib.id, folder.id, &path, &format!("d2-{i}.webp"), 1, "webp", FileTypeGroup::Image, created, created, &[])
            .unwrap();
        cat.upsert_metadata(id, "caption", "afternoon meeting notes", "vlm", SourceType::PluginGenerated, DataType::Text).unwrap();
        let text = cat.metadata_text(id).unwrap();
        cat.index_fts(id, &text).unwrap();
        cat.index_vec(id, &[1.0, 0.0]).unwrap();
    }

    let catalog = Arc::new(Mutex::new(cat));
    let gateway = Arc::new(ModelGateway::new(OcrConfig::default(), VlmConfig::default(), EmbeddingConfig::default()));
    let engine = SearchEngine::new(catalog, gateway);

    let filters = memoscope_catalog::SearchFilters {
        start_unix: Some(day1_start),
        end_unix: Some(day1_end),
        ..Default::default()
    };
    let results = engine.hybrid_search("afternoon meeting", &filters, 50).await.unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| day1_ids.contains(&r.entity.id)));
}
