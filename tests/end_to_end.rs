//! End-to-end scenarios: real filesystem notifications through the orchestrator

mod common;

use common::{collect_for, wait_for, TestEnvironment};
use compare_observer::diff::LineKind;
use compare_observer::{FileStatus, SystemOrchestrator, WatchEvent};
use std::fs;
use std::time::Duration;

fn is_started(event: &compare_observer::SystemEvent) -> bool {
    event.event == WatchEvent::StartedWatching
}

#[tokio::test]
async fn test_edit_reports_one_change_and_a_modified_diff() {
    let env = TestEnvironment::new();
    let file = env.write_source("lib/a.txt", "hello");
    let (mut orchestrator, mut events) = SystemOrchestrator::new(&env.load_config());

    orchestrator.start_all(None).expect("Failed to start");
    assert!(wait_for(&mut events, is_started).await.is_some());

    fs::write(&file, "hello world").unwrap();

    let change = wait_for(&mut events, |e| matches!(e.event, WatchEvent::FileChanged(_)))
        .await
        .expect("No change notification");
    assert_eq!(change.system, "web");
    assert_eq!(change.relative.as_deref(), Some("lib/a.txt"));
    assert_eq!(change.status, Some(FileStatus::Modified));

    // The write burst collapses into the single notification above
    let extra = collect_for(&mut events, Duration::from_millis(300)).await;
    assert!(!extra
        .iter()
        .any(|e| matches!(e.event, WatchEvent::FileChanged(_))));

    let diff = orchestrator.diff("web", "lib/a.txt").unwrap();
    assert_eq!(diff.kinds, vec![LineKind::Modified]);
    assert_eq!(diff.old, vec!["hello"]);
    assert_eq!(diff.new, vec!["hello world"]);

    orchestrator.stop_all();
}

#[tokio::test]
async fn test_delete_reports_once() {
    let env = TestEnvironment::new();
    let file = env.write_source("b.txt", "bee");
    let (mut orchestrator, mut events) = SystemOrchestrator::new(&env.load_config());

    orchestrator.start_all(None).expect("Failed to start");
    assert!(wait_for(&mut events, is_started).await.is_some());

    fs::remove_file(&file).unwrap();

    let deleted = wait_for(&mut events, |e| matches!(e.event, WatchEvent::FileDeleted(_)))
        .await
        .expect("No delete notification");
    assert_eq!(deleted.relative.as_deref(), Some("b.txt"));

    let extra = collect_for(&mut events, Duration::from_millis(300)).await;
    assert!(!extra
        .iter()
        .any(|e| matches!(e.event, WatchEvent::FileDeleted(_))));

    orchestrator.stop_all();
}

#[tokio::test]
async fn test_new_file_is_created_and_excluded_paths_are_silent() {
    let env = TestEnvironment::new();
    env.write_source("keep.txt", "k");
    fs::create_dir_all(env.source.join("node_modules")).unwrap();
    let (mut orchestrator, mut events) = SystemOrchestrator::new(&env.load_config());

    orchestrator.start_all(None).expect("Failed to start");
    assert!(wait_for(&mut events, is_started).await.is_some());

    env.write_source("node_modules/dep.js", "ignored");
    env.write_source("scratch.tmp", "ignored");
    env.write_source("fresh.txt", "new content");

    let created = wait_for(&mut events, |e| e.relative.is_some())
        .await
        .expect("No create notification");
    assert_eq!(created.relative.as_deref(), Some("fresh.txt"));
    assert_eq!(created.status, Some(FileStatus::Created));

    let status = orchestrator.status("web").unwrap();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].relative, "fresh.txt");

    orchestrator.stop_all();
}

#[tokio::test]
async fn test_stop_all_emits_stopped() {
    let env = TestEnvironment::new();
    env.write_source("a.txt", "a");
    let (mut orchestrator, mut events) = SystemOrchestrator::new(&env.load_config());

    orchestrator.start_all(None).expect("Failed to start");
    orchestrator.stop_all();

    let stopped = wait_for(&mut events, |e| e.event == WatchEvent::StoppedWatching).await;
    assert!(stopped.is_some());
}

#[test]
fn test_partial_copy_failure() {
    let env = TestEnvironment::new();
    env.write_source("a.txt", "a");
    env.write_source("config/app.json", "{}");
    env.write_source("blocked/c.txt", "c");
    // A regular file where the destination needs a directory
    fs::create_dir_all(env.path("dest")).unwrap();
    fs::write(env.path("dest/blocked"), "in the way").unwrap();

    let mut config = env.load_config();
    config.systems[0].mirror_root = None;
    let (orchestrator, _events) = SystemOrchestrator::new(&config);

    let files = vec![
        "a.txt".to_string(),
        "config/app.json".to_string(),
        "blocked/c.txt".to_string(),
    ];
    let result = orchestrator.copy_selection("web", &files).unwrap();

    assert_eq!(result.success_count, 2);
    assert_eq!(result.fail_count, 1);
    assert_eq!(result.copied_files, vec!["a.txt", "config/app.json"]);
    // Flattened by the "config" without rule
    assert!(env.path("dest/app.json").is_file());
    assert!(!env.path("dest/config/app.json").exists());
}

#[test]
fn test_mirror_copy_keeps_history_in_backup() {
    let env = TestEnvironment::new();
    env.write_source("src/main.php", "v2");
    fs::create_dir_all(env.path("git/src")).unwrap();
    fs::write(env.path("git/src/main.php"), "v1").unwrap();
    let (orchestrator, _events) = SystemOrchestrator::new(&env.load_config());

    let result = orchestrator
        .copy_selection("web", &["src/main.php".to_string()])
        .unwrap();

    assert_eq!(result.success_count, 1);
    assert_eq!(fs::read_to_string(env.path("git/src/main.php")).unwrap(), "v2");

    let backups: Vec<_> = walkdir::WalkDir::new(env.path("backup"))
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .collect();
    assert_eq!(backups.len(), 1);
    assert!(backups[0].path().ends_with("src/main.php"));
    assert_eq!(fs::read_to_string(backups[0].path()).unwrap(), "v1");
}
