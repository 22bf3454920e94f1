//! Common test utilities and helpers for Compare Observer tests
use compare_observer::orchestrator::SystemEvent;
use compare_observer::Config;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

/// How long a test waits for a filesystem notification
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Temporary source tree plus the folders a system copies into
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub source: PathBuf,
    pub config_dir: PathBuf,
}

#[allow(dead_code)]
impl TestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let source = temp_dir.path().join("source");
        let config_dir = temp_dir.path().join("compare-observer");
        std::fs::create_dir_all(&source).expect("Failed to create source dir");
        std::fs::create_dir_all(&config_dir).expect("Failed to create config dir");

        Self {
            temp_dir,
            source,
            config_dir,
        }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.temp_dir.path().join(relative)
    }

    /// Write a file below the source root, creating parents
    pub fn write_source(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.source.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        std::fs::write(&path, content).expect("Failed to write source file");
        path
    }

    pub fn create_test_config(&self, content: &str) -> PathBuf {
        let config_path = self.config_dir.join("config.yml");
        std::fs::write(&config_path, content).expect("Failed to write test config");
        config_path
    }

    /// One system "web" with every copy role under the temp dir
    pub fn create_single_system_config(&self) -> PathBuf {
        let root = self.temp_dir.path().display();
        let config_content = format!(
            r#"
systems:
  - name: "web"
    source: "{root}/source"
    destination: "{root}/dest"
    git: "{root}/git"
    backup: "{root}/backup"
    assign: "{root}/assign"
rules:
  without:
    - ["config"]
  except:
    - ["node_modules"]
watch:
  debounce_ms: 500
notifications:
  enabled: true
  username: "tester"
"#
        );
        self.create_test_config(&config_content)
    }

    pub fn load_config(&self) -> Config {
        let path = self.create_single_system_config();
        Config::load(&path).expect("Failed to load test config")
    }
}

/// Wait for the next event matching `predicate`, skipping others
#[allow(dead_code)]
pub async fn wait_for<F>(events: &mut UnboundedReceiver<SystemEvent>, predicate: F) -> Option<SystemEvent>
where
    F: Fn(&SystemEvent) -> bool,
{
    tokio::time::timeout(EVENT_TIMEOUT, async {
        while let Some(event) = events.recv().await {
            if predicate(&event) {
                return Some(event);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

/// Everything that arrives within `window`
#[allow(dead_code)]
pub async fn collect_for(
    events: &mut UnboundedReceiver<SystemEvent>,
    window: Duration,
) -> Vec<SystemEvent> {
    let mut collected = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, events.recv()).await {
        collected.push(event);
    }
    collected
}
