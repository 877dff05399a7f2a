//! Watch-folder scanner with per-file stability tracking.
//!
//! The watcher polls a single directory (no recursion). A file becomes
//! `Stable` once two consecutive scans observe the same size and mtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Video extensions picked up by default (case-insensitive matching).
pub const VIDEO_EXTENSIONS: &[&str] = &[
    ".mov", ".mp4", ".mxf", ".avi", ".mkv", ".flv", ".wmv", ".webm", ".m2ts", ".mts", ".ts",
    ".m4v", ".3gp", ".3g2", ".qt", ".dv", ".dvr", ".asf",
];

/// Lifecycle of a tracked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    /// New, or changed since the last scan.
    Detected,
    /// Unchanged across two consecutive scans.
    Stable,
    /// A job exists for this file.
    Processing,
    /// Finished (successfully, skipped, or given up on).
    Done,
}

/// A tracked file in the watch directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileInfo {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
    /// Identity derived from the path.
    pub key: Uuid,
    pub detected_at: DateTime<Utc>,
    pub state: FileState,
    /// Failed processing attempts so far.
    pub attempts: u32,
}

impl FileInfo {
    fn observed(path: PathBuf, size: u64, modified: SystemTime) -> Self {
        let key = file_key(&path);
        Self {
            path,
            size,
            modified,
            key,
            detected_at: Utc::now(),
            state: FileState::Detected,
            attempts: 0,
        }
    }

    pub fn modified_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.modified)
    }
}

/// Stable identity key for a path (UUID v5 in the URL namespace).
pub fn file_key(path: &Path) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, path.to_string_lossy().as_bytes())
}

/// Per-state counts of tracked files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCounts {
    pub detected: usize,
    pub stable: usize,
    pub processing: usize,
    pub done: usize,
}

/// Polling watcher over one directory.
#[derive(Debug)]
pub struct FileWatcher {
    directory: PathBuf,
    extensions: Vec<String>,
    ignore_hidden: bool,
    tracked: HashMap<PathBuf, FileInfo>,
}

impl FileWatcher {
    /// Create a watcher. `extensions` overrides [`VIDEO_EXTENSIONS`]; a leading dot is optional.
    pub fn new(directory: impl Into<PathBuf>, extensions: Option<&[String]>, ignore_hidden: bool) -> Self {
        let extensions = match extensions {
            Some(list) => list.iter().map(|e| normalize_extension(e)).collect(),
            None => VIDEO_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        };
        Self {
            directory: directory.into(),
            extensions,
            ignore_hidden,
            tracked: HashMap::new(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Whether a path passes the extension and hidden-file filters.
    pub fn accepts(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if self.ignore_hidden && name.starts_with('.') {
            return false;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = format!(".{}", ext.to_lowercase());
                self.extensions.iter().any(|e| *e == ext)
            })
            .unwrap_or(false)
    }

    /// Scan the directory and advance each file's state.
    ///
    /// Returns files seen for the first time. A directory-level error is
    /// logged and leaves all state untouched.
    pub fn scan(&mut self) -> Vec<FileInfo> {
        let mut observed: Vec<(PathBuf, u64, SystemTime)> = Vec::new();
        let mut unreadable = Vec::new();

        let walker = WalkDir::new(&self.directory).min_depth(1).max_depth(1);
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    warn!(directory = %self.directory.display(), "Error scanning directory: {}", e);
                    return Vec::new();
                }
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() || !self.accepts(entry.path()) {
                continue;
            }

            let Ok(metadata) = entry.metadata() else {
                unreadable.push(entry.into_path());
                continue;
            };
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            observed.push((entry.into_path(), metadata.len(), modified));
        }

        self.reconcile(observed, unreadable)
    }

    /// Apply one listing to the tracked set.
    ///
    /// Entries that were listed but could not be stat'ed keep their state
    /// until the next scan.
    fn reconcile(
        &mut self,
        observed: Vec<(PathBuf, u64, SystemTime)>,
        unreadable: Vec<PathBuf>,
    ) -> Vec<FileInfo> {
        let mut seen: std::collections::HashSet<PathBuf> = unreadable.into_iter().collect();
        let mut new_files = Vec::new();

        for (path, size, modified) in observed {
            seen.insert(path.clone());
            match self.tracked.get_mut(&path) {
                Some(info) => match info.state {
                    FileState::Detected | FileState::Stable => {
                        if info.size == size && info.modified == modified {
                            info.state = FileState::Stable;
                        } else {
                            info.size = size;
                            info.modified = modified;
                            info.state = FileState::Detected;
                        }
                    }
                    FileState::Processing | FileState::Done => {}
                },
                None => {
                    let info = FileInfo::observed(path.clone(), size, modified);
                    debug!(path = %path.display(), size, "New file detected");
                    new_files.push(info.clone());
                    self.tracked.insert(path, info);
                }
            }
        }

        // Forget files that left the directory so a re-created file gets a fresh lifecycle
        self.tracked
            .retain(|path, info| seen.contains(path) || info.state == FileState::Processing);

        new_files
    }

    /// Files that are stable and not yet claimed, oldest detection first.
    pub fn stable_candidates(&self) -> Vec<FileInfo> {
        let mut stable: Vec<FileInfo> = self
            .tracked
            .values()
            .filter(|info| info.state == FileState::Stable)
            .cloned()
            .collect();
        stable.sort_by(|a, b| a.detected_at.cmp(&b.detected_at).then_with(|| a.path.cmp(&b.path)));
        stable
    }

    pub fn mark_processing(&mut self, path: &Path) {
        if let Some(info) = self.tracked.get_mut(path) {
            info.state = FileState::Processing;
        }
    }

    pub fn mark_done(&mut self, path: &Path) {
        if let Some(info) = self.tracked.get_mut(path) {
            info.state = FileState::Done;
        }
    }

    /// Record a failed attempt and return the file to `Detected` so it re-stabilises.
    ///
    /// Returns the updated attempt count.
    pub fn mark_error(&mut self, path: &Path) -> u32 {
        match self.tracked.get_mut(path) {
            Some(info) => {
                info.attempts += 1;
                info.state = FileState::Detected;
                info.attempts
            }
            None => 0,
        }
    }

    pub fn get(&self, path: &Path) -> Option<&FileInfo> {
        self.tracked.get(path)
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    pub fn counts(&self) -> FileCounts {
        let mut counts = FileCounts::default();
        for info in self.tracked.values() {
            match info.state {
                FileState::Detected => counts.detected += 1,
                FileState::Stable => counts.stable += 1,
                FileState::Processing => counts.processing += 1,
                FileState::Done => counts.done += 1,
            }
        }
        counts
    }
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}
