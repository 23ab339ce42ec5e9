//! The capture loop itself (`4.C`): one tick per `record_interval`
//! seconds, strictly sequential (`5`: "one tick begins only after the
//! previous completes") and isolated per tick (`7`: errors caught and
//! logged, next tick proceeds).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::capturer::{DisplayCapturer, DisplayId};
use crate::error::Result;
use crate::hash::{hamming_distance, phash};
use crate::metadata::{encode_with_metadata, CaptureMetadata};
use crate::sidecar;

pub const DEFAULT_RECORD_INTERVAL_SECS: u64 = 4;
pub const DEFAULT_HAMMING_THRESHOLD: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayOutcome {
    Saved(PathBuf),
    SkippedSimilar,
    SkippedLocked,
}

#[derive(Debug, Clone)]
pub struct TickReport {
    pub outcomes: Vec<(DisplayId, DisplayOutcome)>,
}

/// Owns the per-display hash/sequence state for "today"; state rolls over
/// to a fresh day directory automatically since sidecars are looked up by
/// `base_dir/YYYYMMDD/...` on every tick (`6`).
pub struct CaptureLoop {
    capturer: Arc<dyn DisplayCapturer>,
    base_dir: PathBuf,
    threshold: u32,
    // Guards the in-memory mirror of the sidecar state; the sidecar files
    // themselves are accessed only by this loop (`5`).
    state: Mutex<HashMap<String, (HashMap<String, u64>, HashMap<String, String>)>>,
}

impl CaptureLoop {
    pub fn new(capturer: Arc<dyn DisplayCapturer>, base_dir: PathBuf, threshold: u32) -> Self {
        Self {
            capturer,
            base_dir,
            threshold,
            state: Mutex::new(HashMap::new()),
        }
    }

    fn day_dir(&self, date: &str) -> PathBuf {
        self.base_dir.join(date)
    }

    #[instrument(skip(self))]
    pub async fn run_tick(&self) -> Result<TickReport> {
        let now = Utc::now();
        let date = now.format("%Y%m%d").to_string();
        let timestamp = now.format("%Y%m%d-%H%M%S").to_string();
        let day_dir = self.day_dir(&date);
        std::fs::create_dir_all(&day_dir)?;

        if self.capturer.is_locked().await? {
            info!("session locked, skipping tick");
            let displays = self.capturer.list_displays().await.unwrap_or_default();
            return Ok(TickReport {
                outcomes: displays
                    .into_iter()
                    .map(|d| (d, DisplayOutcome::SkippedLocked))
                    .collect(),
            });
        }

        let context = self.capturer.active_context().await?;
        let displays = self.capturer.list_displays().await?;

        let (mut sequences, mut hashes) = {
            let mut state = self.state.lock().unwrap();
            state
                .entry(date.clone())
                .or_insert_with(|| (sidecar::load_sequences(&day_dir), sidecar::load_hashes(&day_dir)))
                .clone()
        };

        let mut outcomes = Vec::with_capacity(displays.len());
        let mut worklog_lines = Vec::new();
        let mut dirty = false;

        for display in &displays {
            match self.capture_one(display, &day_dir, &timestamp, &context.active_app, &context.active_window, &mut sequences, &mut hashes).await {
                Ok(outcome) => {
                    let status = match &outcome {
                        DisplayOutcome::Saved(_) => "Saved",
                        DisplayOutcome::SkippedSimilar => "Skipped (similar to previous)",
                        DisplayOutcome::SkippedLocked => "Skipped (locked)",
                    };
                    worklog_lines.push(format!("{timestamp} - {} - {status}", display.name));
                    if matches!(outcome, DisplayOutcome::Saved(_)) {
                        dirty = true;
                    }
                    outcomes.push((display.clone(), outcome));
                }
                Err(e) => {
                    warn!(display = %display.name, error = %e, "capture failed for display, continuing tick");
                    worklog_lines.push(format!("{timestamp} - {} - Error: {e}", display.name));
                }
            }
        }

        if dirty {
            sidecar::save_sequences(&day_dir, &sequences)?;
            sidecar::save_hashes(&day_dir, &hashes)?;
        }
        {
            let mut state = self.state.lock().unwrap();
            state.insert(date, (sequences, hashes));
        }

        append_worklog(&day_dir, &worklog_lines)?;

        Ok(TickReport { outcomes })
    }

    #[allow(clippy::too_many_arguments)]
    async fn capture_one(
        &self,
        display: &DisplayId,
        day_dir: &Path,
        timestamp: &str,
        active_app: &str,
        active_window: &str,
        sequences: &mut HashMap<String, u64>,
        hashes: &mut HashMap<String, String>,
    ) -> Result<DisplayOutcome> {
        let frame = self.capturer.capture(display).await?;
        let current_hash = phash(&frame);

        if let Some(previous) = hashes.get(&display.id) {
            if hamming_distance(&current_hash, previous) < self.threshold {
                return Ok(DisplayOutcome::SkippedSimilar);
            }
        }

        hashes.insert(display.id.clone(), current_hash);
        let sequence = sequences.entry(display.id.clone()).or_insert(0);
        *sequence += 1;

        let metadata = CaptureMetadata {
            timestamp: timestamp.to_string(),
            active_app: active_app.to_string(),
            active_window: active_window.to_string(),
            screen_name: display.name.clone(),
            sequence: *sequence,
        };

        let filename = format!("screenshot-{timestamp}-of-{}.webp", display.name);
        let path = day_dir.join(&filename);
        let encoded = encode_with_metadata(&frame, &metadata)?;
        atomic_write(&path, &encoded)?;

        Ok(DisplayOutcome::Saved(path))
    }
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("webp.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn append_worklog(day_dir: &Path, lines: &[String]) -> Result<()> {
    use std::io::Write;
    if lines.is_empty() {
        return Ok(());
    }
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(day_dir.join("worklog"))?;
    for line in lines {
        writeln!(f, "{line}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capturer::SyntheticCapturer;
    use tempfile::tempdir;

    fn displays() -> Vec<DisplayId> {
        vec![DisplayId { id: "main".to_string(), name: "main".to_string() }]
    }

    #[tokio::test]
    async fn repeated_identical_frames_produce_one_file() {
        let dir = tempdir().unwrap();
        let capturer = Arc::new(SyntheticCapturer::new(displays(), 64, 64));
        let loop_ = CaptureLoop::new(capturer, dir.path().to_path_buf(), DEFAULT_HAMMING_THRESHOLD);

        loop_.run_tick().await.unwrap();
        loop_.run_tick().await.unwrap();

        let date = Utc::now().format("%Y%m%d").to_string();
        let day_dir = dir.path().join(&date);
        let webp_count = std::fs::read_dir(&day_dir)
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().extension().map(|e| e == "webp").unwrap_or(false))
            .count();
        assert_eq!(webp_count, 1);

        let sequences = sidecar::load_sequences(&day_dir);
        assert_eq!(sequences.get("main"), Some(&1));
    }

    #[tokio::test]
    async fn changed_frame_produces_new_file() {
        let dir = tempdir().unwrap();
        let capturer = Arc::new(SyntheticCapturer::new(displays(), 64, 64));
        let loop_ = CaptureLoop::new(capturer.clone(), dir.path().to_path_buf(), DEFAULT_HAMMING_THRESHOLD);

        loop_.run_tick().await.unwrap();
        capturer.advance_frame();
        loop_.run_tick().await.unwrap();

        let date = Utc::now().format("%Y%m%d").to_string();
        let day_dir = dir.path().join(&date);
        let sequences = sidecar::load_sequences(&day_dir);
        assert_eq!(sequences.get("main"), Some(&2));
    }

    #[tokio::test]
    async fn locked_session_skips_all_displays() {
        let dir = tempdir().unwrap();
        let capturer = Arc::new(SyntheticCapturer::new(displays(), 64, 64));
        capturer.set_locked(true);
        let loop_ = CaptureLoop::new(capturer, dir.path().to_path_buf(), DEFAULT_HAMMING_THRESHOLD);

        let report = loop_.run_tick().await.unwrap();
        assert!(matches!(report.outcomes[0].1, DisplayOutcome::SkippedLocked));
    }
}
