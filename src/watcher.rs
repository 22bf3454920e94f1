//! Recursive Watcher - live watch set for one system root
//!
//! Lifecycle: `Idle -> Scanning -> Watching -> Stopping -> Stopped`.
//!
//! `start` enumerates the root synchronously, registers native watches and
//! then hands the watch set to a dedicated worker thread that turns raw
//! `notify` events into created/changed/deleted notifications. Events leave
//! through an unbounded tokio channel so the worker never blocks on a consumer.

use crate::config::{WatchConfig, WatchMode};
use crate::debounce::EventDebouncer;
use crate::exclusion::ExclusionMatcher;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// How often the worker re-checks the running flag while idle
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors that can occur while starting a watcher
#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("Watcher already started (state: {0:?})")]
    AlreadyStarted(WatcherState),

    #[error("Watch root does not exist or is not a directory: {0}")]
    MissingRoot(PathBuf),

    #[error("Failed to create native watcher: {0}")]
    WatcherCreation(#[from] notify::Error),

    #[error("Failed to watch path {path}: {source}")]
    WatchPath {
        path: PathBuf,
        source: notify::Error,
    },

    #[error("Failed to spawn watcher worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Notifications emitted by a watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    FileChanged(PathBuf),
    FileCreated(PathBuf),
    FileDeleted(PathBuf),
    StartedWatching,
    StoppedWatching,
    PreloadComplete,
    LogMessage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Idle,
    Scanning,
    Watching,
    Stopping,
    Stopped,
}

/// Kind of a tracked entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Runtime options for one watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherOptions {
    pub debounce: Duration,
    pub stop_timeout: Duration,
    pub mode: WatchMode,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self::from(&WatchConfig::default())
    }
}

impl From<&WatchConfig> for WatcherOptions {
    fn from(config: &WatchConfig) -> Self {
        Self {
            debounce: config.debounce(),
            stop_timeout: config.stop_timeout(),
            mode: config.mode,
        }
    }
}

struct Worker {
    handle: JoinHandle<()>,
    done: mpsc::Receiver<()>,
}

impl Worker {
    /// Wait up to `timeout` for the thread to finish. Returns false when the
    /// thread was abandoned.
    fn finish(self, timeout: Duration, root: &Path) -> bool {
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    warn!("Watcher worker for {} panicked", root.display());
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Watcher worker for {} did not stop within {:?}, abandoning it",
                    root.display(),
                    timeout
                );
                false
            }
        }
    }
}

/// Watches one system root
pub struct RecursiveWatcher {
    root: PathBuf,
    matcher: ExclusionMatcher,
    options: WatcherOptions,
    state: WatcherState,
    events: UnboundedSender<WatchEvent>,
    running: Arc<AtomicBool>,
    worker: Option<Worker>,
    tracked_at_start: usize,
}

impl RecursiveWatcher {
    /// Create an idle watcher and the receiving end of its event stream
    pub fn new(
        root: impl Into<PathBuf>,
        matcher: ExclusionMatcher,
        options: WatcherOptions,
    ) -> (Self, UnboundedReceiver<WatchEvent>) {
        let (events, receiver) = unbounded_channel();

        (
            Self {
                root: root.into(),
                matcher,
                options,
                state: WatcherState::Idle,
                events,
                running: Arc::new(AtomicBool::new(false)),
                worker: None,
                tracked_at_start: 0,
            },
            receiver,
        )
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    /// Watch root; canonicalized once the watcher has started
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of files and directories registered by the initial scan
    pub fn tracked_at_start(&self) -> usize {
        self.tracked_at_start
    }

    /// Scan the root, register watches and start the worker thread.
    pub fn start(&mut self) -> Result<(), WatcherError> {
        if self.state != WatcherState::Idle {
            return Err(WatcherError::AlreadyStarted(self.state));
        }

        let root = self
            .root
            .canonicalize()
            .ok()
            .filter(|p| p.is_dir())
            .ok_or_else(|| WatcherError::MissingRoot(self.root.clone()))?;
        self.root = root.clone();
        self.state = WatcherState::Scanning;

        let (raw_tx, raw_rx) = mpsc::channel();
        let native = match RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = raw_tx.send(res);
            },
            notify::Config::default(),
        ) {
            Ok(native) => native,
            Err(e) => {
                self.state = WatcherState::Idle;
                return Err(e.into());
            }
        };

        let mut registrar = match NativeRegistrar::attach(native, &root, self.options.mode) {
            Ok(registrar) => registrar,
            Err(e) => {
                self.state = WatcherState::Idle;
                return Err(e);
            }
        };
        if let Some(note) = registrar.fallback_note.take() {
            self.emit(WatchEvent::LogMessage(note));
        }

        let mut watch_set = WatchSet::new(
            root.clone(),
            self.matcher.clone(),
            EventDebouncer::new(self.options.debounce),
            self.events.clone(),
        );
        self.tracked_at_start = watch_set.scan(&mut registrar);

        self.emit(WatchEvent::PreloadComplete);

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let (done_tx, done_rx) = mpsc::channel();

        let spawned = std::thread::Builder::new()
            .name(format!("watch:{}", root.display()))
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    match raw_rx.recv_timeout(POLL_INTERVAL) {
                        Ok(Ok(event)) => watch_set.handle_event(&event, &mut registrar),
                        Ok(Err(e)) => {
                            debug!("Native watcher error: {}", e);
                            watch_set.emit(WatchEvent::LogMessage(format!("Watcher error: {}", e)));
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                drop(registrar);
                let _ = done_tx.send(());
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                self.state = WatcherState::Idle;
                return Err(e.into());
            }
        };

        self.worker = Some(Worker {
            handle,
            done: done_rx,
        });
        self.state = WatcherState::Watching;
        info!(
            "Watching {} ({} entries, {:?} mode)",
            self.root.display(),
            self.tracked_at_start,
            self.options.mode
        );
        self.emit(WatchEvent::StartedWatching);

        Ok(())
    }

    /// Signal the worker and wait up to the stop timeout for it to finish.
    /// A worker that does not finish in time is abandoned. No-op when idle
    /// or already stopped.
    pub fn stop(&mut self) {
        if matches!(self.state, WatcherState::Idle | WatcherState::Stopped) {
            return;
        }

        self.state = WatcherState::Stopping;
        self.running.store(false, Ordering::SeqCst);

        if let Some(worker) = self.worker.take() {
            worker.finish(self.options.stop_timeout, &self.root);
        }

        self.state = WatcherState::Stopped;
        info!("Stopped watching {}", self.root.display());
        self.emit(WatchEvent::StoppedWatching);
    }

    fn emit(&self, event: WatchEvent) {
        let _ = self.events.send(event);
    }
}

impl Drop for RecursiveWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Seam between the watch set and native watch registration
trait Registrar {
    fn register(&mut self, path: &Path);
}

struct NativeRegistrar {
    watcher: RecommendedWatcher,
    per_path: bool,
    fallback_note: Option<String>,
}

impl NativeRegistrar {
    fn attach(
        mut watcher: RecommendedWatcher,
        root: &Path,
        mode: WatchMode,
    ) -> Result<Self, WatcherError> {
        let mut fallback_note = None;

        let per_path = match mode {
            WatchMode::PerPath => true,
            WatchMode::Recursive => {
                watcher
                    .watch(root, RecursiveMode::Recursive)
                    .map_err(|source| WatcherError::WatchPath {
                        path: root.to_path_buf(),
                        source,
                    })?;
                false
            }
            WatchMode::Auto => match watcher.watch(root, RecursiveMode::Recursive) {
                Ok(()) => false,
                Err(e) => {
                    let note = format!(
                        "Recursive watch on {} failed ({}), falling back to per-path watches",
                        root.display(),
                        e
                    );
                    warn!("{}", note);
                    fallback_note = Some(note);
                    true
                }
            },
        };

        Ok(Self {
            watcher,
            per_path,
            fallback_note,
        })
    }
}

impl Registrar for NativeRegistrar {
    fn register(&mut self, path: &Path) {
        // A recursive root watch already covers everything below it
        if !self.per_path {
            return;
        }
        if let Err(e) = self.watcher.watch(path, RecursiveMode::NonRecursive) {
            debug!("Failed to register watch on {}: {}", path.display(), e);
        }
    }
}

/// Tracked entries plus the logic that classifies notifications
struct WatchSet {
    root: PathBuf,
    matcher: ExclusionMatcher,
    entries: HashMap<PathBuf, EntryKind>,
    debouncer: EventDebouncer,
    events: UnboundedSender<WatchEvent>,
}

impl WatchSet {
    fn new(
        root: PathBuf,
        matcher: ExclusionMatcher,
        debouncer: EventDebouncer,
        events: UnboundedSender<WatchEvent>,
    ) -> Self {
        Self {
            root,
            matcher,
            entries: HashMap::new(),
            debouncer,
            events,
        }
    }

    fn emit(&self, event: WatchEvent) {
        let _ = self.events.send(event);
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.matcher.is_excluded_under(&self.root, path)
    }

    /// Track and register every non-excluded entry below the root.
    fn scan(&mut self, registrar: &mut impl Registrar) -> usize {
        let root = self.root.clone();
        let matcher = self.matcher.clone();

        for entry in WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| !matcher.is_excluded_under(&root, entry.path()))
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping entry during watch scan: {}", e);
                    continue;
                }
            };

            let kind = if entry.file_type().is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            registrar.register(entry.path());
            self.entries.insert(entry.into_path(), kind);
        }

        self.entries.len()
    }

    fn handle_event(&mut self, event: &Event, registrar: &mut impl Registrar) {
        if matches!(event.kind, EventKind::Access(_)) {
            return;
        }

        // chmod/touch on a tracked file must not use up its debounce window
        let metadata_only = matches!(event.kind, EventKind::Modify(ModifyKind::Metadata(_)));

        let now = Instant::now();
        for path in &event.paths {
            if metadata_only && self.entries.get(path) == Some(&EntryKind::File) {
                debug!("Ignoring metadata change for {}", path.display());
                continue;
            }
            self.handle_path(path, now, registrar);
        }
    }

    fn handle_path(&mut self, path: &Path, at: Instant, registrar: &mut impl Registrar) {
        if !path.starts_with(&self.root) {
            debug!("Ignoring notification outside root: {}", path.display());
            return;
        }
        if self.is_excluded(path) {
            debug!("Ignoring notification for excluded path: {}", path.display());
            return;
        }

        let tracked = self.entries.get(path).copied();
        let metadata = fs::symlink_metadata(path).ok();

        match (metadata, tracked) {
            (None, Some(EntryKind::File)) => {
                self.entries.remove(path);
                self.debouncer.forget(path);
                self.emit(WatchEvent::FileDeleted(path.to_path_buf()));
            }
            (None, Some(EntryKind::Directory)) => self.remove_tree(path),
            (None, None) => {
                debug!("Ignoring notification for vanished path: {}", path.display());
            }
            (Some(metadata), tracked) if metadata.is_dir() => {
                if tracked == Some(EntryKind::File) {
                    self.remove_tree(path);
                }
                self.entries
                    .insert(path.to_path_buf(), EntryKind::Directory);
                registrar.register(path);
                self.scan_directory(path, registrar);
            }
            (Some(_), Some(EntryKind::File)) => {
                if self.debouncer.accept(path, at) {
                    registrar.register(path);
                    self.emit(WatchEvent::FileChanged(path.to_path_buf()));
                } else {
                    debug!("Dropping duplicate notification for {}", path.display());
                }
            }
            (Some(_), tracked) => {
                if tracked == Some(EntryKind::Directory) {
                    self.remove_tree(path);
                }
                self.track_new_file(path, at, registrar);
            }
        }
    }

    fn track_new_file(&mut self, path: &Path, at: Instant, registrar: &mut impl Registrar) {
        self.entries.insert(path.to_path_buf(), EntryKind::File);
        registrar.register(path);
        // Stamp the creation so the writes that follow it are not reported as changes
        self.debouncer.accept(path, at);
        self.emit(WatchEvent::FileCreated(path.to_path_buf()));
    }

    /// Register and announce children of `dir` that are not tracked yet,
    /// descending into new directories.
    fn scan_directory(&mut self, dir: &Path, registrar: &mut impl Registrar) {
        let children = match fs::read_dir(dir) {
            Ok(children) => children,
            Err(e) => {
                debug!("Failed to enumerate {}: {}", dir.display(), e);
                return;
            }
        };

        let mut children: Vec<PathBuf> = children
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .collect();
        children.sort();

        for child in children {
            if self.entries.contains_key(&child) || self.is_excluded(&child) {
                continue;
            }

            let is_dir = fs::symlink_metadata(&child)
                .map(|m| m.is_dir())
                .unwrap_or(false);
            if is_dir {
                self.entries.insert(child.clone(), EntryKind::Directory);
                registrar.register(&child);
                self.scan_directory(&child, registrar);
            } else {
                self.track_new_file(&child, Instant::now(), registrar);
            }
        }
    }

    /// Stop tracking `path` and everything below it, announcing removed files
    fn remove_tree(&mut self, path: &Path) {
        let mut removed: Vec<(PathBuf, EntryKind)> = self
            .entries
            .iter()
            .filter(|(tracked, _)| tracked.starts_with(path))
            .map(|(tracked, kind)| (tracked.clone(), *kind))
            .collect();
        removed.sort_by(|a, b| a.0.cmp(&b.0));

        for (tracked, kind) in removed {
            self.entries.remove(&tracked);
            if kind == EntryKind::File {
                self.debouncer.forget(&tracked);
                self.emit(WatchEvent::FileDeleted(tracked));
            }
        }
    }
}
