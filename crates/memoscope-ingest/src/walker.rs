//! Batch scan: walk a folder, reconcile with the catalog, enqueue
//! per-entity plugin work (`4.D`).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use memoscope_catalog::{Catalog, DataType, FileTypeGroup, SourceType};
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, instrument, warn};

use crate::dispatch::PluginDispatcher;
use crate::error::Result;

/// Allow-listed image extensions (`4.D`: "filter by extension allow-list").
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

const BATCH_SIZE: usize = 200;

/// Names starting with `.`, `tmp`, or `temp` are dropped (`4.D`), along with
/// names matching the dotfile-style pattern `._<name>` (macOS AppleDouble
/// sidecar files).
pub fn is_temp_file(filename: &str) -> bool {
    filename.starts_with('.') || filename.starts_with("tmp") || filename.starts_with("temp")
}

pub fn is_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Recursively collects candidate image file paths under `root`.
pub fn walk(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    walk_into(root, &mut out);
    out
}

fn walk_into(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        if path.is_dir() {
            if !is_temp_file(name) {
                walk_into(&path, out);
            }
        } else if is_image_extension(&path) && !is_temp_file(name) {
            out.push(path);
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanStats {
    pub scanned: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

pub struct BatchScanner {
    catalog: Arc<Mutex<Catalog>>,
    dispatcher: Arc<PluginDispatcher>,
    max_concurrent: usize,
}

impl BatchScanner {
    pub fn new(catalog: Arc<Mutex<Catalog>>, dispatcher: Arc<PluginDispatcher>, max_concurrent: usize) -> Self {
        Self { catalog, dispatcher, max_concurrent: max_concurrent.max(1) }
    }

    /// Scans `folder_path` under `library_id`/`folder_id`, chunking
    /// look-ups in batches of 200 (`4.D`), then deletes catalog entities
    /// whose filepath vanished from disk.
    #[instrument(skip(self))]
    pub async fn scan(&self, library_id: i64, folder_id: i64, folder_path: &Path) -> Result<ScanStats> {
        let candidates = walk(folder_path);
        let mut stats = ScanStats::default();
        let mut scanned_set: HashSet<String> = HashSet::new();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));

        for chunk in candidates.chunks(BATCH_SIZE) {
            let filepaths: Vec<String> = chunk
                .iter()
                .map(|p| p.to_string_lossy().to_string())
                .collect();
            for fp in &filepaths {
                scanned_set.insert(fp.clone());
            }

            let existing = {
                let cat = self.catalog.lock().await;
                cat.get_entities_by_filepaths(&filepaths)?
            };
            let existing_by_path: std::collections::HashMap<String, memoscope_catalog::Entity> =
                existing.into_iter().map(|e| (e.filepath.clone(), e)).collect();

            let mut handles = Vec::with_capacity(chunk.len());
            for path in chunk {
                let permit = semaphore.clone().acquire_owned().await.unwrap();
                let existing = existing_by_path.get(&path.to_string_lossy().to_string()).cloned();
                let catalog = self.catalog.clone();
                let dispatcher = self.dispatcher.clone();
                let path = path.clone();
                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    process_one_file(catalog, dispatcher, library_id, folder_id, &path, existing).await
                }));
            }
            for handle in handles {
                match handle.await {
                    Ok(Ok(ProcessOutcome::Created)) => stats.created += 1,
                    Ok(Ok(ProcessOutcome::Updated)) => stats.updated += 1,
                    Ok(Ok(ProcessOutcome::Unchanged)) => {}
                    Ok(Err(e)) => warn!(error = %e, "failed to process file after retries"),
                    Err(e) => warn!(error = %e, "ingestion task panicked"),
                }
                stats.scanned += 1;
            }
        }

        let keep: Vec<String> = scanned_set.into_iter().collect();
        let removed = {
            let cat = self.catalog.lock().await;
            cat.delete_by_filepath_not_in(folder_id, &keep)?
        };
        stats.deleted = removed;
        info!(?stats, "batch scan complete");
        Ok(stats)
    }
}

pub enum ProcessOutcome {
    Created,
    Updated,
    Unchanged,
}

const MAX_RETRIES: u32 = 3;

/// Per-file routine shared by batch scan and continuous watch (`4.D`).
/// Stats the file, sniffs MIME by content, reads embedded metadata if the
/// file is an image, merges metadata by key, and creates or updates the
/// catalog row. Retries up to 3x on failure.
pub async fn process_one_file(
    catalog: Arc<Mutex<Catalog>>,
    dispatcher: Arc<PluginDispatcher>,
    library_id: i64,
    folder_id: i64,
    path: &Path,
    existing: Option<memoscope_catalog::Entity>,
) -> Result<ProcessOutcome> {
    let mut last_err = None;
    for attempt in 1..=MAX_RETRIES {
        match process_one_file_inner(&catalog, &dispatcher, library_id, folder_id, path, existing.clone()).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) => {
                warn!(path = %path.display(), attempt, error = %e, "ingestion attempt failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap())
}

async fn process_one_file_inner(
    catalog: &Arc<Mutex<Catalog>>,
    dispatcher: &Arc<PluginDispatcher>,
    library_id: i64,
    folder_id: i64,
    path: &Path,
    existing: Option<memoscope_catalog::Entity>,
) -> Result<ProcessOutcome> {
    let metadata = std::fs::metadata(path)?;
    let size = metadata.len() as i64;
    let created_at = to_unix(metadata.created().unwrap_or_else(|_| SystemTime::now()));
    let modified_at = to_unix(metadata.modified().unwrap_or_else(|_| SystemTime::now()));
    let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("").to_string();
    let filepath = path.to_string_lossy().to_string();

    let bytes = std::fs::read(path).unwrap_or_default();
    let file_type = infer::get(&bytes).map(|t| t.extension().to_string()).unwrap_or_else(|| "unknown".to_string());
    let file_type_group = if infer::is_image(&bytes) { FileTypeGroup::Image } else { FileTypeGroup::Other };

    // A thumbnail rewrite preserves the existing entity's stat fields
    // (`4.D`: "If is_thumbnail flag is present ... treat the file as a
    // cosmetic rewrite").
    let raw_metadata = memoscope_capture::metadata::read_raw_metadata(&bytes).ok();
    let is_thumbnail = raw_metadata
        .as_ref()
        .and_then(|v| v.get("is_thumbnail"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let (size, created_at, modified_at) = if is_thumbnail {
        if let Some(e) = &existing {
            (e.size, e.file_created_at, e.file_last_modified_at)
        } else {
            (size, created_at, modified_at)
        }
    } else {
        (size, created_at, modified_at)
    };

    let mut metadata_entries = Vec::new();
    if let Some(raw) = raw_metadata.as_ref().and_then(|v| v.as_object()) {
        for (key, value) in raw {
            if key == "is_thumbnail" {
                continue;
            }
            let (value_str, data_type) = match value {
                serde_json::Value::Number(n) => (n.to_string(), DataType::Number),
                other => (
                    other.as_str().map(str::to_string).unwrap_or_else(|| other.to_string()),
                    DataType::Text,
                ),
            };
            metadata_entries.push((key.clone(), value_str, "capture".to_string(), SourceType::SystemGenerated, data_type));
        }
    }

    let was_new = existing.is_none();
    let unchanged = existing
        .as_ref()
        .map(|e| e.size == size && e.file_last_modified_at == modified_at)
        .unwrap_or(false)
        && !is_thumbnail;

    let entity_id = {
        let mut cat = catalog.lock().await;
        cat.upsert_entity(
            library_id,
            folder_id,
            &filepath,
            &filename,
            size,
            &file_type,
            file_type_group,
            created_at,
            modified_at,
            &metadata_entries,
        )?
    };

    if !unchanged {
        dispatcher.entity_ready(entity_id, path.to_path_buf()).await;
    }

    Ok(if was_new {
        ProcessOutcome::Created
    } else if unchanged {
        ProcessOutcome::Unchanged
    } else {
        ProcessOutcome::Updated
    })
}

fn to_unix(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_files_are_filtered() {
        assert!(is_temp_file(".hidden"));
        assert!(is_temp_file("tmpfile.webp"));
        assert!(is_temp_file("temp-1.webp"));
        assert!(!is_temp_file("screenshot-1.webp"));
    }

    #[test]
    fn extension_allowlist_is_case_insensitive() {
        assert!(is_image_extension(Path::new("a.WEBP")));
        assert!(is_image_extension(Path::new("a.png")));
        assert!(!is_image_extension(Path::new("a.mp4")));
    }
}
