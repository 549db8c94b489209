// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn test_config(dir: &std::path::Path) -> Config {
    Config::new(dir, "127.0.0.1:0", "test-token")
}

#[tokio::test]
async fn startup_creates_state_layout() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());

    let startup = startup(&config).await.unwrap();

    assert!(config.db_path().exists());
    assert!(config.lock_path().exists());

    // system.startup is on the log.
    let events = startup.master.store.list_events(None, 10).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].tag, "system.startup");

    startup.master.shutdown().await;
    startup.background.cancel();
}

#[tokio::test]
async fn second_master_is_locked_out() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());

    let first = startup(&config).await.unwrap();
    let second = startup(&config).await;
    assert!(matches!(second, Err(LifecycleError::LockFailed(_))));

    drop(first);
    // Lock released with the first master; a new one can start.
    let third = startup(&config).await;
    assert!(third.is_ok());
}

#[tokio::test]
async fn corrupt_database_recovers_and_reports() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    std::fs::create_dir_all(&config.state_dir).unwrap();
    std::fs::write(config.db_path(), b"garbage bytes").unwrap();

    let started = startup(&config).await.unwrap();

    let events = started.master.store.list_events(None, 10).unwrap();
    let tags: Vec<&str> = events.iter().map(|e| e.tag.as_str()).collect();
    assert!(tags.contains(&"state.corrupted"), "tags: {tags:?}");

    started.master.shutdown().await;
    started.background.cancel();
}

#[tokio::test]
async fn shutdown_emits_event() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());

    let started = startup(&config).await.unwrap();
    started.master.shutdown().await;

    let events = started
        .master
        .store
        .list_events(Some("system.shutdown"), 10)
        .unwrap();
    assert_eq!(events.len(), 1);
    started.background.cancel();
}
