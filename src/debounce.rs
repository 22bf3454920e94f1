//! Duplicate notification suppression
//!
//! One logical edit usually produces several native notifications (attribute
//! touch, truncate, write). Only the first notification per path inside the
//! window is accepted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub struct EventDebouncer {
    threshold: Duration,
    last_accepted: HashMap<PathBuf, Instant>,
}

impl Default for EventDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl EventDebouncer {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            last_accepted: HashMap::new(),
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Accept the event iff at least `threshold` has elapsed since the last
    /// accepted event for `path`. Events arriving out of order count as duplicates.
    pub fn accept(&mut self, path: &Path, at: Instant) -> bool {
        if let Some(last) = self.last_accepted.get(path) {
            if at.saturating_duration_since(*last) < self.threshold {
                return false;
            }
        }

        self.last_accepted.insert(path.to_path_buf(), at);
        true
    }

    /// Drop history for a path that no longer exists
    pub fn forget(&mut self, path: &Path) {
        self.last_accepted.remove(path);
    }

    pub fn len(&self) -> usize {
        self.last_accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_accepted.is_empty()
    }
}
