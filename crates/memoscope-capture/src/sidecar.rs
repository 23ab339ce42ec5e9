//! Per-day sidecars: `.screen_sequences` and `.previous_hashes` (`6`),
//! written, flushed, and fsynced on every update; hardened here with a
//! write-to-tmp + rename + fsync-the-parent-directory sequence so a crash
//! mid-write never leaves a torn JSON file. Metadata
//! embedded in the image is still the ground truth (`4.C` invariants) —
//! these files are purely an optimization to avoid re-hashing every file
//! in a day directory on restart.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub fn sequences_path(day_dir: &Path) -> PathBuf {
    day_dir.join(".screen_sequences")
}

pub fn hashes_path(day_dir: &Path) -> PathBuf {
    day_dir.join(".previous_hashes")
}

pub fn load_sequences(day_dir: &Path) -> HashMap<String, u64> {
    load_json(&sequences_path(day_dir))
}

pub fn load_hashes(day_dir: &Path) -> HashMap<String, String> {
    load_json(&hashes_path(day_dir))
}

fn load_json<T: serde::de::DeserializeOwned + Default>(path: &Path) -> T {
    std::fs::read(path)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .unwrap_or_default()
}

pub fn save_sequences(day_dir: &Path, sequences: &HashMap<String, u64>) -> Result<()> {
    write_fsynced(&sequences_path(day_dir), sequences)
}

pub fn save_hashes(day_dir: &Path, hashes: &HashMap<String, String>) -> Result<()> {
    write_fsynced(&hashes_path(day_dir), hashes)
}

/// Write-to-tmp, rename, fsync-file, fsync-parent-dir (`5`: sidecars
/// accessed only by the Capture Loop, so no external locking is needed).
fn write_fsynced<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    std::fs::create_dir_all(path.parent().unwrap_or_else(|| Path::new(".")))?;
    let tmp_path = path.with_extension("tmp");
    let json = serde_json::to_vec(value)?;
    {
        let mut f = File::create(&tmp_path)?;
        f.write_all(&json)?;
        f.flush()?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sequences_roundtrip() {
        let dir = tempdir().unwrap();
        let mut seqs = HashMap::new();
        seqs.insert("main".to_string(), 3u64);
        save_sequences(dir.path(), &seqs).unwrap();
        let loaded = load_sequences(dir.path());
        assert_eq!(loaded.get("main"), Some(&3));
    }

    #[test]
    fn missing_sidecar_loads_as_empty() {
        let dir = tempdir().unwrap();
        let loaded: HashMap<String, String> = load_hashes(dir.path());
        assert!(loaded.is_empty());
    }
}
