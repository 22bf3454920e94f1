//! Compare Observer - change review for live source trees
//!
//! Compare Observer watches one or more source trees ("systems"), separates real
//! content changes from filesystem noise, shows each change against a captured
//! baseline and copies reviewed files out to deployment, mirror, backup and
//! archive folders.
//!
//! ## Core Features
//!
//! - **Recursive Watching**: Native watches with per-path fallback and duplicate suppression
//! - **Exclusion Rules**: Per-system folder and file rules plus built-in editor noise filters
//! - **Baselines & Diffs**: Captured content and side-by-side line alignment
//! - **Fan-out Copy**: Destination, git mirror with timestamped backups, named archives
//! - **Configuration Management**: YAML-based configuration with XDG compliance
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and parsing
//! - [`watcher`]: Recursive watcher state machine
//! - [`orchestrator`]: Multi-system coordination
//! - [`copy`]: Copy, backup and archive operations

pub mod baseline;
pub mod config;
pub mod copy;
pub mod daemon;
pub mod debounce;
pub mod diff;
pub mod exclusion;
pub mod health;
pub mod orchestrator;
pub mod report;
pub mod status;
pub mod watcher;

pub use baseline::BaselineStore;
pub use config::{Config, SystemConfig};
pub use copy::{CopyOrchestrator, CopyResult};
pub use daemon::{Daemon, OperatorCommand};
pub use debounce::EventDebouncer;
pub use diff::{align, AlignedDiff, LineKind};
pub use exclusion::ExclusionMatcher;
pub use health::HealthCheck;
pub use orchestrator::{SystemEvent, SystemOrchestrator};
pub use status::{FileStatus, StatusTable};
pub use watcher::{RecursiveWatcher, WatchEvent, WatcherError, WatcherState};
