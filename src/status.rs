//! Status table - files with pending (unreviewed) changes per system

use crate::baseline::{read_text, BaselineStore};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileStatus {
    Created,
    Modified,
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileStatus::Created => write!(f, "Created"),
            FileStatus::Modified => write!(f, "Modified"),
        }
    }
}

/// One pending change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStatusEntry {
    /// Path relative to the system root, `/`-separated
    pub relative: String,
    pub status: FileStatus,
    pub last_event_time: DateTime<Local>,
}

/// Shared, ordered by relative path
#[derive(Debug, Clone, Default)]
pub struct StatusTable {
    entries: Arc<Mutex<BTreeMap<String, FileStatusEntry>>>,
}

impl StatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, relative: &str, status: FileStatus) {
        self.lock().insert(
            relative.to_string(),
            FileStatusEntry {
                relative: relative.to_string(),
                status,
                last_event_time: Local::now(),
            },
        );
    }

    pub fn get(&self, relative: &str) -> Option<FileStatusEntry> {
        self.lock().get(relative).cloned()
    }

    pub fn remove(&self, relative: &str) -> Option<FileStatusEntry> {
        self.lock().remove(relative)
    }

    pub fn remove_all<S: AsRef<str>>(&self, relatives: &[S]) {
        let mut entries = self.lock();
        for relative in relatives {
            entries.remove(relative.as_ref());
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn snapshot(&self) -> Vec<FileStatusEntry> {
        self.lock().values().cloned().collect()
    }

    /// Relative paths currently staged
    pub fn paths(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, FileStatusEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Applies watcher notifications to a status table by comparing the live
/// file against its baseline. The baseline itself is never written here.
#[derive(Debug, Clone)]
pub struct ChangeTracker {
    baseline: BaselineStore,
    table: StatusTable,
}

impl ChangeTracker {
    pub fn new(baseline: BaselineStore, table: StatusTable) -> Self {
        Self { baseline, table }
    }

    /// Classify a changed or created file. Returns the recorded status, or
    /// `None` when the content matches the baseline (a false alarm) or the
    /// file cannot be read.
    pub fn file_touched(&self, relative: &str, absolute: &Path) -> Option<FileStatus> {
        let status = match self.baseline.get(relative) {
            None => FileStatus::Created,
            Some(baseline) => {
                let current = match read_text(absolute) {
                    Ok(current) => current,
                    Err(e) => {
                        warn!("Failed to read changed file {}: {}", absolute.display(), e);
                        return None;
                    }
                };
                if current == baseline {
                    debug!("Content of {} matches baseline, ignoring", relative);
                    return None;
                }
                FileStatus::Modified
            }
        };

        self.table.upsert(relative, status);
        Some(status)
    }

    pub fn file_deleted(&self, relative: &str) {
        self.table.remove(relative);
    }
}
