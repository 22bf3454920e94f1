//! Baseline Store - captured file contents that live changes are diffed against
//!
//! Keys are paths relative to the system root, always with `/` separators.
//! A missing key means the file was never captured (a new file); an empty
//! string means the file was captured and is empty.

use crate::exclusion::ExclusionMatcher;
use std::collections::HashMap;
use std::path::{Component, Path};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Shared handle to one system's baseline
#[derive(Debug, Clone, Default)]
pub struct BaselineStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl BaselineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole baseline with a fresh walk of `root`.
    pub fn capture(&self, root: &Path, matcher: &ExclusionMatcher) -> usize {
        self.capture_with_progress(root, matcher, |_| {})
    }

    /// Like [`capture`](Self::capture), calling `progress` with the number of
    /// files processed so far after each file.
    ///
    /// Unreadable files are logged and skipped. The new map is built first and
    /// swapped in at the end, so readers never observe a half-captured baseline.
    pub fn capture_with_progress<F>(
        &self,
        root: &Path,
        matcher: &ExclusionMatcher,
        mut progress: F,
    ) -> usize
    where
        F: FnMut(usize),
    {
        let mut captured = HashMap::new();
        let mut processed = 0;

        for path in walk_files(root, matcher) {
            processed += 1;
            progress(processed);

            let Some(key) = relative_key(root, &path) else {
                continue;
            };

            match read_text(&path) {
                Ok(content) => {
                    captured.insert(key, content);
                }
                Err(e) => {
                    warn!("Skipping unreadable file {}: {}", path.display(), e);
                }
            }
        }

        let count = captured.len();
        *self.write() = captured;

        debug!("Captured baseline of {} files under {}", count, root.display());
        count
    }

    /// Number of files a capture of `root` would process
    pub fn count_files(root: &Path, matcher: &ExclusionMatcher) -> usize {
        walk_files(root, matcher).count()
    }

    pub fn get(&self, relative: &str) -> Option<String> {
        self.read().get(relative).cloned()
    }

    pub fn contains(&self, relative: &str) -> bool {
        self.read().contains_key(relative)
    }

    pub fn set(&self, relative: impl Into<String>, content: impl Into<String>) {
        self.write().insert(relative.into(), content.into());
    }

    pub fn remove(&self, relative: &str) -> Option<String> {
        self.write().remove(relative)
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A poisoned lock only means a panic elsewhere; the map itself is still usable.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, String>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, String>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Every non-excluded regular file under `root`; excluded directories are pruned.
fn walk_files<'a>(
    root: &'a Path,
    matcher: &'a ExclusionMatcher,
) -> impl Iterator<Item = std::path::PathBuf> + 'a {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(move |entry| !matcher.is_excluded_under(root, entry.path()))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping entry during scan: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
}

/// Read a file as text, replacing invalid UTF-8
pub fn read_text(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// `/`-separated key of `path` relative to `root`
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
