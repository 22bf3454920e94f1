use anyhow::{bail, Context, Result};
use dirs::config_dir;
use path_clean::PathClean;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for Compare Observer
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// Independently watched source trees
    #[serde(default)]
    pub systems: Vec<SystemConfig>,

    /// Rule grids shared by all systems (one column per system)
    #[serde(default)]
    pub rules: RuleSetConfig,

    /// Watcher behavior settings
    #[serde(default)]
    pub watch: WatchConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Copy notification settings
    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// One monitored source tree and the places its files are copied to
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
pub struct SystemConfig {
    /// Display name, also used to address the system from the operator session
    pub name: String,

    /// Root of the watched tree
    #[serde(rename = "source", default)]
    pub source_root: PathBuf,

    /// Plain destination (paths flattened per the `without` rules)
    #[serde(rename = "destination", default, skip_serializing_if = "Option::is_none")]
    pub destination_root: Option<PathBuf>,

    /// Version-controlled mirror, always keeps the full relative path
    #[serde(rename = "git", default, skip_serializing_if = "Option::is_none")]
    pub mirror_root: Option<PathBuf>,

    /// Timestamped backups of mirror files before they are overwritten
    #[serde(rename = "backup", default, skip_serializing_if = "Option::is_none")]
    pub backup_root: Option<PathBuf>,

    /// Named archive snapshots ("assign")
    #[serde(rename = "assign", default, skip_serializing_if = "Option::is_none")]
    pub archive_root: Option<PathBuf>,
}

/// Rule tables: rows are rules, columns are systems
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
pub struct RuleSetConfig {
    /// Folders whose direct children are flattened on plain-destination copy
    #[serde(default)]
    pub without: Vec<Vec<String>>,

    /// File (or folder-like) patterns excluded from watching and baselining
    #[serde(default)]
    pub except: Vec<Vec<String>>,

    /// Folder names excluded from watching and baselining
    #[serde(default)]
    pub exclude_folders: Vec<Vec<String>>,
}

/// How native watches are registered
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WatchMode {
    /// Recursive native watch, falling back to per-path registration
    #[default]
    Auto,
    /// Recursive native watch on the root only
    Recursive,
    /// One non-recursive watch per file and directory
    PerPath,
}

/// Watcher configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchConfig {
    /// Window in which repeated notifications for one path are dropped
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// How long `stop` waits for a watcher worker before abandoning it
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,

    /// Native watch registration strategy
    #[serde(default)]
    pub mode: WatchMode,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

/// Notification configuration (transport lives outside this crate)
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct NotificationConfig {
    /// Send a notification after `send`
    #[serde(default)]
    pub enabled: bool,

    /// Name shown in the notification title
    #[serde(default)]
    pub username: String,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_debounce_ms() -> u64 {
    500
}
fn default_stop_timeout_secs() -> u64 {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            stop_timeout_secs: default_stop_timeout_secs(),
            mode: WatchMode::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            color: default_true(),
        }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

impl SystemConfig {
    pub fn new(name: impl Into<String>, source_root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source_root: source_root.into(),
            ..Default::default()
        }
    }

    /// A system with an empty source root is configured but never watched
    pub fn has_source(&self) -> bool {
        !self.source_root.as_os_str().is_empty()
    }

    pub fn has_copy_target(&self) -> bool {
        self.destination_root.is_some() || self.mirror_root.is_some()
    }
}

/// Effective rule list for one system.
///
/// Each row contributes its trimmed cell for `system_index`, or the first
/// non-empty trimmed cell of the row when that cell is missing or blank.
pub fn rules_for_system(rows: &[Vec<String>], system_index: usize) -> Vec<String> {
    rows.iter()
        .filter_map(|row| {
            let own = row
                .get(system_index)
                .map(|cell| cell.trim())
                .filter(|cell| !cell.is_empty());

            own.or_else(|| {
                row.iter()
                    .map(|cell| cell.trim())
                    .find(|cell| !cell.is_empty())
            })
            .map(str::to_string)
        })
        .collect()
}

impl RuleSetConfig {
    pub fn without_for(&self, system_index: usize) -> Vec<String> {
        rules_for_system(&self.without, system_index)
    }

    pub fn except_for(&self, system_index: usize) -> Vec<String> {
        rules_for_system(&self.except, system_index)
    }

    pub fn exclude_folders_for(&self, system_index: usize) -> Vec<String> {
        rules_for_system(&self.exclude_folders, system_index)
    }
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("compare-observer").join("config.yml"))
    }

    /// Expand environment variables and `~` in every configured root
    pub fn expand_paths(&mut self) -> Result<()> {
        for system in &mut self.systems {
            if system.has_source() {
                system.source_root = expand_path(&system.source_root)
                    .with_context(|| format!("Failed to expand source path of {}", system.name))?;
            }
            for root in [
                &mut system.destination_root,
                &mut system.mirror_root,
                &mut system.backup_root,
                &mut system.archive_root,
            ] {
                // An empty string in YAML means "not configured"
                if root.as_ref().is_some_and(|p| p.as_os_str().is_empty()) {
                    *root = None;
                }
                if let Some(path) = root.as_mut() {
                    *path = expand_path(path)
                        .with_context(|| format!("Failed to expand path of {}", system.name))?;
                }
            }
        }

        Ok(())
    }

    /// Reject configurations the orchestrator cannot run
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for system in &self.systems {
            if system.name.trim().is_empty() {
                bail!("Every system needs a name");
            }
            if !seen.insert(system.name.as_str()) {
                bail!("Duplicate system name in config: {}", system.name);
            }
        }

        if self.watch.debounce_ms == 0 {
            bail!("watch.debounce_ms must be greater than zero");
        }

        Ok(())
    }

    /// Index of a system by name
    pub fn system_index(&self, name: &str) -> Option<usize> {
        self.systems.iter().position(|s| s.name == name)
    }
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    let raw = path.to_string_lossy();
    let expanded = shellexpand::full(&raw)?;
    Ok(PathBuf::from(expanded.as_ref()).clean())
}
