//! System Orchestrator - runs every configured system as an isolated unit
//!
//! Each unit owns its matcher, baseline, status table, copier and watcher.
//! Nothing is shared between units except the outgoing event channel.

use crate::baseline::{read_text, relative_key, BaselineStore};
use crate::config::{Config, SystemConfig};
use crate::copy::{ensure_relative, ArchiveResult, CopyOrchestrator, CopyResult};
use crate::diff::{align_text, AlignedDiff};
use crate::exclusion::ExclusionMatcher;
use crate::report::CopyNotification;
use crate::status::{ChangeTracker, FileStatus, FileStatusEntry, StatusTable};
use crate::watcher::{RecursiveWatcher, WatchEvent, WatcherOptions, WatcherState};
use anyhow::{bail, Context, Result};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

/// Capture progress is logged once per this many files
const PROGRESS_LOG_INTERVAL: usize = 100;

/// A watcher event tagged with its system, after the status table was updated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemEvent {
    pub system: String,
    pub event: WatchEvent,
    /// Root-relative path for file events
    pub relative: Option<String>,
    /// Status recorded for changed/created files
    pub status: Option<FileStatus>,
}

/// Outcome of [`SystemOrchestrator::start_all`]
#[derive(Debug, Clone, Default)]
pub struct StartSummary {
    pub systems_started: usize,
    pub systems_failed: Vec<String>,
    pub files_captured: usize,
    pub elapsed: Duration,
}

/// Point-in-time view of one system
#[derive(Debug, Clone)]
pub struct SystemOverview {
    pub name: String,
    pub state: WatcherState,
    pub baseline_files: usize,
    pub pending_changes: usize,
}

struct SystemUnit {
    config: SystemConfig,
    matcher: ExclusionMatcher,
    baseline: BaselineStore,
    table: StatusTable,
    copier: CopyOrchestrator,
    watcher: Option<RecursiveWatcher>,
}

impl SystemUnit {
    fn state(&self) -> WatcherState {
        self.watcher
            .as_ref()
            .map_or(WatcherState::Idle, RecursiveWatcher::state)
    }
}

pub struct SystemOrchestrator {
    units: Vec<SystemUnit>,
    options: WatcherOptions,
    username: String,
    events: UnboundedSender<SystemEvent>,
}

impl SystemOrchestrator {
    /// Build one unit per configured system. The receiver yields every
    /// forwarded [`SystemEvent`].
    pub fn new(config: &Config) -> (Self, UnboundedReceiver<SystemEvent>) {
        let (events, receiver) = unbounded_channel();

        let units = config
            .systems
            .iter()
            .enumerate()
            .map(|(index, system)| SystemUnit {
                config: system.clone(),
                matcher: ExclusionMatcher::new(
                    config.rules.exclude_folders_for(index),
                    config.rules.except_for(index),
                ),
                baseline: BaselineStore::new(),
                table: StatusTable::new(),
                copier: CopyOrchestrator::new(system.clone(), config.rules.without_for(index)),
                watcher: None,
            })
            .collect();

        (
            Self {
                units,
                options: WatcherOptions::from(&config.watch),
                username: config.notifications.username.clone(),
                events,
            },
            receiver,
        )
    }

    pub fn system_names(&self) -> Vec<String> {
        self.units.iter().map(|u| u.config.name.clone()).collect()
    }

    /// Capture every system's baseline, then start its watcher.
    ///
    /// `progress` receives `(system, processed, total)` where both counts run
    /// across all systems. Must be called from within a tokio runtime.
    pub fn start_all(
        &mut self,
        mut progress: Option<&mut dyn FnMut(&str, usize, usize)>,
    ) -> Result<StartSummary> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("Watchers must be started from within a tokio runtime")?;
        let started_at = Instant::now();
        let mut summary = StartSummary::default();

        let total: usize = self
            .units
            .iter()
            .filter(|u| u.config.has_source() && u.state() != WatcherState::Watching)
            .map(|u| BaselineStore::count_files(&u.config.source_root, &u.matcher))
            .sum();
        info!("Preparing to capture {} files", total);

        let mut processed_before = 0;
        for unit in &mut self.units {
            if !unit.config.has_source() {
                debug!("{}: no source configured, skipping", unit.config.name);
                continue;
            }
            if unit.state() == WatcherState::Watching {
                debug!("{}: already watching", unit.config.name);
                continue;
            }

            let name = unit.config.name.clone();
            let captured = unit.baseline.capture_with_progress(
                &unit.config.source_root,
                &unit.matcher,
                |n| {
                    let processed = processed_before + n;
                    if processed % PROGRESS_LOG_INTERVAL == 0 {
                        info!("Captured {}/{} files", processed, total);
                    }
                    if let Some(callback) = progress.as_deref_mut() {
                        callback(&name, processed, total);
                    }
                },
            );
            processed_before += captured;
            summary.files_captured += captured;
            info!("{}: baseline captured ({} files)", name, captured);

            let (mut watcher, watch_events) = RecursiveWatcher::new(
                &unit.config.source_root,
                unit.matcher.clone(),
                self.options,
            );
            if let Err(e) = watcher.start() {
                error!("{}: failed to start watcher: {}", name, e);
                summary.systems_failed.push(name);
                continue;
            }

            let tracker = ChangeTracker::new(unit.baseline.clone(), unit.table.clone());
            let root = watcher.root().to_path_buf();
            let forward = self.events.clone();
            runtime.spawn(forward_events(name, root, tracker, watch_events, forward));

            unit.watcher = Some(watcher);
            summary.systems_started += 1;
        }

        summary.elapsed = started_at.elapsed();
        info!(
            "Started {} system(s), {} files captured in {:.2}s",
            summary.systems_started,
            summary.files_captured,
            summary.elapsed.as_secs_f64()
        );
        Ok(summary)
    }

    /// Stop every running watcher. Already stopped systems are skipped.
    pub fn stop_all(&mut self) {
        for unit in &mut self.units {
            if let Some(mut watcher) = unit.watcher.take() {
                watcher.stop();
            }
        }
    }

    pub fn overview(&self) -> Vec<SystemOverview> {
        self.units
            .iter()
            .map(|u| SystemOverview {
                name: u.config.name.clone(),
                state: u.state(),
                baseline_files: u.baseline.len(),
                pending_changes: u.table.len(),
            })
            .collect()
    }

    pub fn status(&self, system: &str) -> Result<Vec<FileStatusEntry>> {
        Ok(self.unit(system)?.table.snapshot())
    }

    /// Baseline (left) against live content (right) for one file.
    /// A file without a baseline diffs against empty text.
    pub fn diff(&self, system: &str, relative: &str) -> Result<AlignedDiff> {
        let unit = self.unit(system)?;
        ensure_relative(relative)?;
        let old = unit.baseline.get(relative).unwrap_or_default();

        let path = unit.config.source_root.join(relative);
        let new = match read_text(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                String::new()
            }
        };

        Ok(align_text(&old, &new))
    }

    /// Copy `files`, or every staged file when `files` is empty.
    ///
    /// Files written to every configured target leave the status table and
    /// their baseline entries are refreshed from the source. Partially copied
    /// files stay staged against the old baseline.
    pub fn copy_selection(&self, system: &str, files: &[String]) -> Result<CopyResult> {
        let unit = self.unit(system)?;
        let selection = Self::selection(unit, files)?;

        info!("{}: copying {} file(s)", system, selection.len());
        let result = unit.copier.copy(&selection)?;

        unit.table.remove_all(&result.completed_files);
        for relative in &result.completed_files {
            let path = unit.config.source_root.join(relative);
            match read_text(&path) {
                Ok(content) => unit.baseline.set(relative.clone(), content),
                Err(e) => warn!("Failed to refresh baseline for {}: {}", relative, e),
            }
        }

        Ok(result)
    }

    /// Archive `files` (or every staged file) under `name`. On any success
    /// the status table is cleared and the baseline re-captured.
    pub fn archive_selection(
        &self,
        system: &str,
        name: &str,
        description: Option<&str>,
        files: &[String],
    ) -> Result<ArchiveResult> {
        let unit = self.unit(system)?;
        let selection = Self::selection(unit, files)?;

        let archived = unit.copier.archive(name, description, &selection)?;

        if archived.result.success_count > 0 {
            unit.table.clear();
            unit.baseline.capture(&unit.config.source_root, &unit.matcher);
            info!("{}: status cleared and baseline re-captured", system);
        }

        Ok(archived)
    }

    /// Replace the baseline with the current tree. Returns the file count.
    pub fn recapture(&self, system: &str) -> Result<usize> {
        let unit = self.unit(system)?;
        if !unit.config.has_source() {
            bail!("System {} has no source configured", system);
        }
        let count = unit
            .baseline
            .capture(&unit.config.source_root, &unit.matcher);
        info!("{}: baseline re-captured ({} files)", system, count);
        Ok(count)
    }

    pub fn clear_status(&self, system: &str) -> Result<()> {
        self.unit(system)?.table.clear();
        Ok(())
    }

    /// Notification for files copied from `system`
    pub fn notification_for(
        &self,
        system: &str,
        description: Option<&str>,
        files: &[String],
    ) -> Result<CopyNotification> {
        let unit = self.unit(system)?;
        Ok(CopyNotification::new(
            &self.username,
            &unit.config.name,
            description,
            files,
            unit.copier.without_rules(),
        ))
    }

    fn unit(&self, system: &str) -> Result<&SystemUnit> {
        self.units
            .iter()
            .find(|u| u.config.name == system)
            .with_context(|| format!("Unknown system: {}", system))
    }

    fn selection(unit: &SystemUnit, files: &[String]) -> Result<Vec<String>> {
        let selection = if files.is_empty() {
            unit.table.paths()
        } else {
            files.to_vec()
        };
        if selection.is_empty() {
            bail!("{}: no files to copy", unit.config.name);
        }
        Ok(selection)
    }
}

impl Drop for SystemOrchestrator {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Apply each watcher event to the status table and pass it on.
async fn forward_events(
    system: String,
    root: std::path::PathBuf,
    tracker: ChangeTracker,
    mut watch_events: UnboundedReceiver<WatchEvent>,
    forward: UnboundedSender<SystemEvent>,
) {
    while let Some(event) = watch_events.recv().await {
        let (relative, status) = match &event {
            WatchEvent::FileChanged(path) | WatchEvent::FileCreated(path) => {
                let Some(relative) = relative_key(&root, path) else {
                    continue;
                };
                match tracker.file_touched(&relative, path) {
                    Some(status) => (Some(relative), Some(status)),
                    // Same content as the baseline
                    None => continue,
                }
            }
            WatchEvent::FileDeleted(path) => {
                let relative = relative_key(&root, path);
                if let Some(relative) = &relative {
                    tracker.file_deleted(relative);
                }
                (relative, None)
            }
            _ => (None, None),
        };

        let forwarded = SystemEvent {
            system: system.clone(),
            event,
            relative,
            status,
        };
        if forward.send(forwarded).is_err() {
            debug!("{}: event consumer gone, stopping forwarder", system);
            break;
        }
    }
}
