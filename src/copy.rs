//! Copy Orchestrator - fans reviewed files out to a system's copy targets
//!
//! Roles per file:
//! - plain destination: full relative path, or just the file name when the
//!   file sits directly inside a `without` folder
//! - mirror ("git"): always the full relative path; the previous version is
//!   first saved to `backup/<yyyy-MM-dd>/<HH-mm-ss>/<relative>` when a backup
//!   root is configured
//! - archive ("assign"): `assign/<name>/<yyyy-MM-dd_HH-mm-ss>/<relative>`

use crate::config::SystemConfig;
use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

const DATE_FOLDER_FORMAT: &str = "%Y-%m-%d";
const TIME_FOLDER_FORMAT: &str = "%H-%M-%S";
const ARCHIVE_FOLDER_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
const DESCRIPTION_FILE: &str = "description.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyRole {
    /// Reading the source file
    Source,
    Destination,
    Mirror,
    Backup,
    Archive,
}

/// Result of one file written to (or read for) one role
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyOutcome {
    pub relative: String,
    pub role: CopyRole,
    pub target: PathBuf,
    pub error: Option<String>,
}

impl CopyOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CopyResult {
    /// Files whose every configured target was written
    pub success_count: usize,
    /// Files with at least one failed target
    pub fail_count: usize,
    /// Files with at least one successful destination or mirror write
    pub copied_files: Vec<String>,
    /// Files whose every configured target was written
    pub completed_files: Vec<String>,
    pub outcomes: Vec<CopyOutcome>,
}

impl CopyResult {
    pub fn failures(&self) -> impl Iterator<Item = &CopyOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveResult {
    /// `assign/<name>/<timestamp>` folder the files were written to
    pub target_dir: PathBuf,
    pub description_written: bool,
    pub result: CopyResult,
}

/// Copy operations for one system
#[derive(Debug, Clone)]
pub struct CopyOrchestrator {
    system: SystemConfig,
    without_rules: Vec<String>,
}

impl CopyOrchestrator {
    pub fn new(system: SystemConfig, without_rules: Vec<String>) -> Self {
        Self {
            system,
            without_rules,
        }
    }

    pub fn system(&self) -> &SystemConfig {
        &self.system
    }

    pub fn without_rules(&self) -> &[String] {
        &self.without_rules
    }

    /// Copy `files` (relative paths) to the destination and mirror roots.
    pub fn copy<S: AsRef<str>>(&self, files: &[S]) -> Result<CopyResult> {
        self.copy_at(files, Local::now().naive_local())
    }

    /// [`copy`](Self::copy) with an explicit timestamp for backup folders
    pub fn copy_at<S: AsRef<str>>(&self, files: &[S], now: NaiveDateTime) -> Result<CopyResult> {
        if !self.system.has_copy_target() {
            bail!(
                "System {} has neither a destination nor a git root configured",
                self.system.name
            );
        }

        let backup_dir = self.system.backup_root.as_ref().map(|root| {
            root.join(now.format(DATE_FOLDER_FORMAT).to_string())
                .join(now.format(TIME_FOLDER_FORMAT).to_string())
        });

        let mut result = CopyResult::default();

        for file in files {
            let relative = file.as_ref();
            if let Err(e) = ensure_relative(relative) {
                warn!("{}: {}", self.system.name, e);
                result
                    .outcomes
                    .push(source_failure(relative, PathBuf::from(relative), e.to_string()));
                result.fail_count += 1;
                continue;
            }
            let source = self.system.source_root.join(relative);

            if !source.is_file() {
                warn!("{}: source not found: {}", self.system.name, relative);
                result
                    .outcomes
                    .push(source_failure(relative, source, "source file not found"));
                result.fail_count += 1;
                continue;
            }

            let mut file_ok = true;
            let mut wrote = false;

            if let Some(destination) = &self.system.destination_root {
                let target = match flattened_name(relative, &self.without_rules) {
                    Some(name) => destination.join(name),
                    None => destination.join(relative),
                };
                let outcome = write_outcome(relative, CopyRole::Destination, &source, target);
                file_ok &= outcome.succeeded();
                wrote |= outcome.succeeded();
                result.outcomes.push(outcome);
            }

            if let Some(mirror) = &self.system.mirror_root {
                let target = mirror.join(relative);

                if let Some(backup_dir) = &backup_dir {
                    if target.exists() {
                        // A failed backup marks the file failed but still lets the mirror update
                        let outcome = write_outcome(
                            relative,
                            CopyRole::Backup,
                            &target,
                            backup_dir.join(relative),
                        );
                        file_ok &= outcome.succeeded();
                        result.outcomes.push(outcome);
                    }
                }

                let outcome = write_outcome(relative, CopyRole::Mirror, &source, target);
                file_ok &= outcome.succeeded();
                wrote |= outcome.succeeded();
                result.outcomes.push(outcome);
            }

            if wrote {
                result.copied_files.push(relative.to_string());
            }
            if file_ok {
                result.success_count += 1;
                result.completed_files.push(relative.to_string());
            } else {
                result.fail_count += 1;
            }
        }

        info!(
            "{}: copy complete - {} succeeded, {} failed",
            self.system.name, result.success_count, result.fail_count
        );
        Ok(result)
    }

    /// Snapshot `files` into a named archive folder.
    pub fn archive<S: AsRef<str>>(
        &self,
        name: &str,
        description: Option<&str>,
        files: &[S],
    ) -> Result<ArchiveResult> {
        self.archive_at(name, description, files, Local::now().naive_local())
    }

    pub fn archive_at<S: AsRef<str>>(
        &self,
        name: &str,
        description: Option<&str>,
        files: &[S],
        now: NaiveDateTime,
    ) -> Result<ArchiveResult> {
        let name = name.trim();
        if name.is_empty() {
            bail!("An archive name is required");
        }
        ensure_relative(name).context("Invalid archive name")?;
        let Some(archive_root) = &self.system.archive_root else {
            bail!("System {} has no assign root configured", self.system.name);
        };

        let target_dir = archive_root
            .join(name)
            .join(now.format(ARCHIVE_FOLDER_FORMAT).to_string());
        fs::create_dir_all(&target_dir)
            .with_context(|| format!("Failed to create archive folder: {:?}", target_dir))?;

        let mut description_written = false;
        if let Some(text) = description.filter(|d| !d.trim().is_empty()) {
            match fs::write(target_dir.join(DESCRIPTION_FILE), text) {
                Ok(()) => description_written = true,
                Err(e) => warn!("Failed to write {} in {:?}: {}", DESCRIPTION_FILE, target_dir, e),
            }
        }

        let mut result = CopyResult::default();
        for file in files {
            let relative = file.as_ref();
            let source = self.system.source_root.join(relative);

            let outcome = if let Err(e) = ensure_relative(relative) {
                warn!("{}: {}", self.system.name, e);
                source_failure(relative, PathBuf::from(relative), e.to_string())
            } else if source.is_file() {
                write_outcome(relative, CopyRole::Archive, &source, target_dir.join(relative))
            } else {
                warn!("{}: source not found: {}", self.system.name, relative);
                source_failure(relative, source, "source file not found")
            };

            if outcome.succeeded() {
                result.success_count += 1;
                result.copied_files.push(relative.to_string());
                result.completed_files.push(relative.to_string());
            } else {
                result.fail_count += 1;
            }
            result.outcomes.push(outcome);
        }

        info!(
            "{}: assign to {} complete - {} succeeded, {} failed",
            self.system.name,
            target_dir.display(),
            result.success_count,
            result.fail_count
        );

        Ok(ArchiveResult {
            target_dir,
            description_written,
            result,
        })
    }
}

/// Reject empty, absolute and parent-escaping paths; every component must
/// be a plain name.
pub fn ensure_relative(relative: &str) -> Result<()> {
    let plain = Path::new(relative)
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    if relative.trim().is_empty() || !plain {
        bail!("Not a plain relative path: {:?}", relative);
    }
    Ok(())
}

fn source_failure(relative: &str, target: PathBuf, error: impl Into<String>) -> CopyOutcome {
    CopyOutcome {
        relative: relative.to_string(),
        role: CopyRole::Source,
        target,
        error: Some(error.into()),
    }
}

/// File name to use on the plain destination when `relative` sits directly
/// inside one of the `without` folders.
pub fn flattened_name<'a, S: AsRef<str>>(relative: &'a str, without_rules: &[S]) -> Option<&'a str> {
    let normalized = relative.replace('\\', "/");

    let flattened = without_rules.iter().any(|rule| {
        let rule = rule.as_ref().trim().replace('\\', "/");
        let rule = rule.trim_matches('/');
        if rule.is_empty() {
            return false;
        }
        let prefix = format!("{}/", rule.to_lowercase());
        let lowered = normalized.to_lowercase();

        lowered
            .strip_prefix(&prefix)
            .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
    });

    if flattened {
        relative.rsplit(['/', '\\']).next()
    } else {
        None
    }
}

fn write_outcome(relative: &str, role: CopyRole, source: &Path, target: PathBuf) -> CopyOutcome {
    let error = match copy_file(source, &target) {
        Ok(()) => {
            debug!("Copied {} to {}", relative, target.display());
            None
        }
        Err(e) => {
            warn!("Failed to copy {} to {}: {:#}", relative, target.display(), e);
            Some(format!("{:#}", e))
        }
    };

    CopyOutcome {
        relative: relative.to_string(),
        role,
        target,
        error,
    }
}

/// Copy one file, creating parent directories and replacing an existing target
fn copy_file(source: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }
    if target.is_file() {
        fs::remove_file(target)
            .with_context(|| format!("Failed to remove existing file: {:?}", target))?;
    }
    fs::copy(source, target).with_context(|| format!("Failed to copy to: {:?}", target))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use assert_fs::TempDir;
    use chrono::NaiveDate;
    use predicates::prelude::*;

    fn fixed_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|d| d.and_hms_opt(14, 5, 7))
            .unwrap()
    }

    fn system(temp: &TempDir) -> SystemConfig {
        let mut system = SystemConfig::new("web", temp.child("src").path());
        system.destination_root = Some(temp.child("dest").path().to_path_buf());
        system.mirror_root = Some(temp.child("git").path().to_path_buf());
        system.backup_root = Some(temp.child("backup").path().to_path_buf());
        system.archive_root = Some(temp.child("assign").path().to_path_buf());
        system
    }

    #[test]
    fn test_flattened_name() {
        let rules = vec!["config".to_string()];

        assert_eq!(flattened_name("config/app.json", &rules), Some("app.json"));
        assert_eq!(flattened_name("CONFIG/App.json", &rules), Some("App.json"));
        assert_eq!(flattened_name("config/sub/app.json", &rules), None);
        assert_eq!(flattened_name("other/app.json", &rules), None);
        assert_eq!(flattened_name("configs/app.json", &rules), None);
        assert_eq!(flattened_name("config/app.json", &Vec::<String>::new()), None);
    }

    #[test]
    fn test_copy_to_destination_and_mirror() {
        let temp = TempDir::new().unwrap();
        temp.child("src/config/app.json").write_str("{}").unwrap();
        temp.child("src/config/sub/app.json").write_str("[]").unwrap();
        let copier = CopyOrchestrator::new(system(&temp), vec!["config".to_string()]);

        let result = copier
            .copy_at(&["config/app.json", "config/sub/app.json"], fixed_time())
            .unwrap();

        assert_eq!(result.success_count, 2);
        assert_eq!(result.fail_count, 0);
        temp.child("dest/app.json").assert("{}");
        temp.child("dest/config/sub/app.json").assert("[]");
        temp.child("git/config/app.json").assert("{}");
        temp.child("git/config/sub/app.json").assert("[]");
        // Nothing to back up on the first copy
        temp.child("backup").assert(predicate::path::missing());
    }

    #[test]
    fn test_mirror_backup_before_overwrite() {
        let temp = TempDir::new().unwrap();
        temp.child("src/lib/a.php").write_str("new").unwrap();
        temp.child("git/lib/a.php").write_str("old").unwrap();
        temp.child("dest/lib/a.php").write_str("stale").unwrap();
        let copier = CopyOrchestrator::new(system(&temp), Vec::new());

        let result = copier.copy_at(&["lib/a.php"], fixed_time()).unwrap();

        assert_eq!(result.success_count, 1);
        temp.child("backup/2024-03-09/14-05-07/lib/a.php").assert("old");
        temp.child("git/lib/a.php").assert("new");
        temp.child("dest/lib/a.php").assert("new");
        assert!(result.outcomes.iter().any(|o| o.role == CopyRole::Backup));
    }

    #[test]
    fn test_missing_source_fails_file() {
        let temp = TempDir::new().unwrap();
        temp.child("src/present.txt").write_str("ok").unwrap();
        let copier = CopyOrchestrator::new(system(&temp), Vec::new());

        let result = copier.copy_at(&["present.txt", "absent.txt"], fixed_time()).unwrap();

        assert_eq!(result.success_count, 1);
        assert_eq!(result.fail_count, 1);
        assert_eq!(result.copied_files, vec!["present.txt"]);
        let failure = result.failures().next().unwrap();
        assert_eq!(failure.role, CopyRole::Source);
        assert_eq!(failure.relative, "absent.txt");
    }

    #[test]
    fn test_partial_destination_failure() {
        let temp = TempDir::new().unwrap();
        temp.child("src/a.txt").write_str("a").unwrap();
        temp.child("src/b.txt").write_str("b").unwrap();
        temp.child("src/blocked/c.txt").write_str("c").unwrap();
        // A regular file where a directory is needed
        temp.child("dest/blocked").write_str("not a dir").unwrap();

        let mut sys = system(&temp);
        sys.mirror_root = None;
        let copier = CopyOrchestrator::new(sys, Vec::new());

        let result = copier
            .copy_at(&["a.txt", "b.txt", "blocked/c.txt"], fixed_time())
            .unwrap();

        assert_eq!(result.success_count, 2);
        assert_eq!(result.fail_count, 1);
        assert_eq!(result.copied_files, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_file_counts_failed_but_copied_when_one_target_fails() {
        let temp = TempDir::new().unwrap();
        temp.child("src/blocked/c.txt").write_str("c").unwrap();
        temp.child("dest/blocked").write_str("not a dir").unwrap();
        let copier = CopyOrchestrator::new(system(&temp), Vec::new());

        let result = copier.copy_at(&["blocked/c.txt"], fixed_time()).unwrap();

        assert_eq!(result.fail_count, 1);
        assert_eq!(result.copied_files, vec!["blocked/c.txt"]);
        assert!(result.completed_files.is_empty());
        temp.child("git/blocked/c.txt").assert("c");
    }

    #[test]
    fn test_ensure_relative() {
        assert!(ensure_relative("a.txt").is_ok());
        assert!(ensure_relative("lib/deep/a.txt").is_ok());

        assert!(ensure_relative("").is_err());
        assert!(ensure_relative("../x").is_err());
        assert!(ensure_relative("lib/../../x").is_err());
        assert!(ensure_relative("/etc/passwd").is_err());
        assert!(ensure_relative("./a.txt").is_err());
    }

    #[test]
    fn test_escaping_paths_are_rejected_per_file() {
        let temp = TempDir::new().unwrap();
        temp.child("src/a.txt").write_str("a").unwrap();
        temp.child("outside.txt").write_str("secret").unwrap();
        let copier = CopyOrchestrator::new(system(&temp), Vec::new());

        let result = copier
            .copy_at(&["a.txt", "../outside.txt"], fixed_time())
            .unwrap();

        assert_eq!(result.success_count, 1);
        assert_eq!(result.fail_count, 1);
        assert_eq!(result.completed_files, vec!["a.txt"]);
        temp.child("outside.txt").assert("secret");
        let failure = result.failures().next().unwrap();
        assert_eq!(failure.role, CopyRole::Source);
        assert_eq!(failure.relative, "../outside.txt");

        assert!(copier.archive_at("../../escape", None, &["a.txt"], fixed_time()).is_err());
        temp.child("escape").assert(predicate::path::missing());

        let archived = copier
            .archive_at("snap", None, &["../outside.txt"], fixed_time())
            .unwrap();
        assert_eq!(archived.result.fail_count, 1);
        assert!(archived.result.completed_files.is_empty());
    }

    #[test]
    fn test_copy_without_targets_is_error() {
        let temp = TempDir::new().unwrap();
        let copier = CopyOrchestrator::new(SystemConfig::new("bare", temp.path()), Vec::new());
        assert!(copier.copy(&["a.txt"]).is_err());
    }

    #[test]
    fn test_archive_layout_and_description() {
        let temp = TempDir::new().unwrap();
        temp.child("src/app/main.js").write_str("main").unwrap();
        let copier = CopyOrchestrator::new(system(&temp), Vec::new());

        let archived = copier
            .archive_at("release-1", Some("first cut"), &["app/main.js"], fixed_time())
            .unwrap();

        let expected = temp.child("assign/release-1/2024-03-09_14-05-07");
        assert_eq!(archived.target_dir, expected.path());
        assert!(archived.description_written);
        expected.child("description.txt").assert("first cut");
        expected.child("app/main.js").assert("main");
        assert_eq!(archived.result.success_count, 1);
    }

    #[test]
    fn test_archive_without_description_writes_no_file() {
        let temp = TempDir::new().unwrap();
        temp.child("src/a.txt").write_str("a").unwrap();
        let copier = CopyOrchestrator::new(system(&temp), Vec::new());

        let archived = copier.archive_at("snap", None, &["a.txt"], fixed_time()).unwrap();

        assert!(!archived.description_written);
        temp.child("assign/snap/2024-03-09_14-05-07/description.txt")
            .assert(predicate::path::missing());
    }

    #[test]
    fn test_archive_requires_name_and_root() {
        let temp = TempDir::new().unwrap();
        let copier = CopyOrchestrator::new(system(&temp), Vec::new());
        assert!(copier.archive("   ", None, &["a.txt"]).is_err());

        let mut sys = system(&temp);
        sys.archive_root = None;
        let copier = CopyOrchestrator::new(sys, Vec::new());
        assert!(copier.archive("snap", None, &["a.txt"]).is_err());
    }
}
