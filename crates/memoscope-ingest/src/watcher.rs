//! Continuous file watcher: `notify`-backed debounced events feeding the
//! same per-file reconciliation routine the batch walker uses (`4.D`:
//! "continuous watch mode debounces bursts of filesystem events into a
//! single reconciliation per settled file"). A pending-event map keyed by
//! path absorbs bursts; `merge_event_kinds` decides which kind survives
//! when multiple events land on the same path before it settles.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::Result;
use crate::walker::{is_image_extension, is_temp_file};

/// Quiescence window: an event doesn't fire until no further events for the
/// same path arrive for this long (`4.D`).
pub const DEBOUNCE: Duration = Duration::from_secs(2);
/// How often `poll_ready` is expected to be called by the daemon's sweep
/// loop (`4.D`).
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,
}

struct PendingEvent {
    kind: FileEventKind,
    last_seen: Instant,
}

pub struct FolderWatcher {
    watcher: RecommendedWatcher,
    rx: mpsc::Receiver<std::result::Result<Event, notify::Error>>,
    watched: Vec<PathBuf>,
    pending: HashMap<PathBuf, PendingEvent>,
}

impl FolderWatcher {
    pub fn new() -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let watcher = notify::recommended_watcher(tx)?;
        Ok(Self { watcher, rx, watched: Vec::new(), pending: HashMap::new() })
    }

    pub fn watch(&mut self, path: &Path) -> Result<()> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if self.watched.contains(&canonical) {
            return Ok(());
        }
        self.watcher.watch(&canonical, RecursiveMode::Recursive)?;
        self.watched.push(canonical);
        Ok(())
    }

    pub fn unwatch(&mut self, path: &Path) -> Result<()> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if !self.watched.contains(&canonical) {
            return Ok(());
        }
        self.watcher.unwatch(&canonical)?;
        self.watched.retain(|p| p != &canonical);
        Ok(())
    }

    /// Drains the raw notify channel into the pending map, then returns
    /// every path that has been quiescent for at least `DEBOUNCE`.
    pub fn poll_ready(&mut self) -> Vec<FileEvent> {
        let now = Instant::now();
        while let Ok(Ok(event)) = self.rx.try_recv() {
            self.absorb(event, now);
        }

        let mut ready = Vec::new();
        let mut still_pending = HashMap::new();
        for (path, pending) in self.pending.drain() {
            if now.duration_since(pending.last_seen) >= DEBOUNCE {
                ready.push(FileEvent { path, kind: pending.kind });
            } else {
                still_pending.insert(path, pending);
            }
        }
        self.pending = still_pending;
        ready
    }

    fn absorb(&mut self, event: Event, now: Instant) {
        let kind = match event.kind {
            EventKind::Create(_) => FileEventKind::Created,
            EventKind::Modify(_) => FileEventKind::Modified,
            EventKind::Remove(_) => FileEventKind::Deleted,
            _ => return,
        };
        for path in event.paths {
            if !should_watch(&path) {
                continue;
            }
            if let Some(existing) = self.pending.get_mut(&path) {
                existing.kind = merge_event_kinds(existing.kind, kind);
                existing.last_seen = now;
            } else {
                self.pending.insert(path, PendingEvent { kind, last_seen: now });
            }
        }
    }
}

fn should_watch(path: &Path) -> bool {
    if path.is_dir() {
        return false;
    }
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else { return false };
    if is_temp_file(name) {
        return false;
    }
    is_image_extension(path)
}

/// A file created then deleted before it settles collapses to a single
/// `Deleted`; created then modified stays `Created` so the reconciler
/// still treats it as new.
fn merge_event_kinds(old: FileEventKind, new: FileEventKind) -> FileEventKind {
    match (old, new) {
        (FileEventKind::Created, FileEventKind::Deleted) => FileEventKind::Deleted,
        (FileEventKind::Created, FileEventKind::Modified) => FileEventKind::Created,
        (FileEventKind::Deleted, FileEventKind::Created) => FileEventKind::Modified,
        (_, new) => new,
    }
}
