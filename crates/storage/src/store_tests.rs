// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::migration::SCHEMA_VERSION;
use sloth_core::test_support::{agent_record, hook_def};
use sloth_core::EventId;

fn store() -> RegistryStore {
    RegistryStore::open_in_memory().unwrap()
}

fn event(id: &str, tag: &str, timestamp_ms: u64) -> EventRecord {
    EventRecord {
        id: EventId::new(id),
        tag: tag.to_string(),
        timestamp_ms,
        data: serde_json::json!({"n": id}),
    }
}

// ── agents ───────────────────────────────────────────────────────────────

#[test]
fn put_get_round_trips() {
    let store = store();
    let mut record = agent_record("a1", "10.0.0.1:50051");
    record.tags.insert("zone".into(), "eu".into());
    store.put_agent(&record).unwrap();

    let loaded = store.get_agent("a1").unwrap();
    assert_eq!(loaded, record);
}

#[test]
fn get_missing_agent_is_not_found() {
    let err = store().get_agent("ghost").unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
    assert!(!err.is_retryable());
}

#[test]
fn upsert_preserves_registered_at() {
    let store = store();
    let mut record = agent_record("a1", "10.0.0.1:50051");
    record.registered_at = 111;
    store.put_agent(&record).unwrap();

    record.address = "10.0.0.9:50051".into();
    record.registered_at = 999; // ignored on conflict
    store.put_agent(&record).unwrap();

    let loaded = store.get_agent("a1").unwrap();
    assert_eq!(loaded.address, "10.0.0.9:50051");
    assert_eq!(loaded.registered_at, 111);
}

#[test]
fn list_agents_filters_by_status_and_tag() {
    let store = store();
    let mut active = agent_record("a1", "10.0.0.1:1");
    active.tags.insert("zone".into(), "eu".into());
    store.put_agent(&active).unwrap();

    let mut inactive = agent_record("a2", "10.0.0.2:1");
    inactive.status = AgentStatus::Inactive;
    store.put_agent(&inactive).unwrap();

    let all = store.list_agents(&AgentFilter::default()).unwrap();
    assert_eq!(all.len(), 2);

    let active_only = store
        .list_agents(&AgentFilter {
            status: Some(AgentStatus::Active),
            tag: None,
        })
        .unwrap();
    assert_eq!(active_only.len(), 1);
    assert_eq!(active_only[0].name, "a1");

    let by_tag = store
        .list_agents(&AgentFilter {
            status: None,
            tag: Some("zone=eu".into()),
        })
        .unwrap();
    assert_eq!(by_tag.len(), 1);

    let by_tag_key = store
        .list_agents(&AgentFilter {
            status: None,
            tag: Some("zone".into()),
        })
        .unwrap();
    assert_eq!(by_tag_key.len(), 1);

    let miss = store
        .list_agents(&AgentFilter {
            status: None,
            tag: Some("zone=us".into()),
        })
        .unwrap();
    assert!(miss.is_empty());
}

#[test]
fn touch_heartbeat_returns_previous_status() {
    let store = store();
    let mut record = agent_record("a1", "10.0.0.1:1");
    record.status = AgentStatus::Inactive;
    store.put_agent(&record).unwrap();

    let previous = store.touch_heartbeat("a1", 2000).unwrap();
    assert_eq!(previous, AgentStatus::Inactive);

    let loaded = store.get_agent("a1").unwrap();
    assert_eq!(loaded.status, AgentStatus::Active);
    assert_eq!(loaded.last_heartbeat, 2000);
}

#[test]
fn touch_heartbeat_unknown_agent_fails() {
    let err = store().touch_heartbeat("ghost", 1).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[test]
fn eviction_by_heartbeat_age() {
    let store = store();
    let mut old = agent_record("old", "h:1");
    old.last_heartbeat = 100;
    store.put_agent(&old).unwrap();
    let mut fresh = agent_record("fresh", "h:2");
    fresh.last_heartbeat = 5000;
    store.put_agent(&fresh).unwrap();

    let evicted = store.delete_agents_older_than(1000).unwrap();
    assert_eq!(evicted, 1);
    assert!(store.get_agent("old").is_err());
    assert!(store.get_agent("fresh").is_ok());
}

// ── events ───────────────────────────────────────────────────────────────

#[test]
fn events_list_most_recent_first() {
    let store = store();
    store.append_event(&event("e1", "task.started", 10)).unwrap();
    store.append_event(&event("e2", "task.completed", 20)).unwrap();
    store.append_event(&event("e3", "agent.connected", 30)).unwrap();

    let all = store.list_events(None, 10).unwrap();
    assert_eq!(
        all.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
        ["e3", "e2", "e1"]
    );

    let tasks = store.list_events(Some("task.*"), 10).unwrap();
    assert_eq!(tasks.len(), 2);

    let exact = store.list_events(Some("task.started"), 10).unwrap();
    assert_eq!(exact.len(), 1);

    let limited = store.list_events(None, 2).unwrap();
    assert_eq!(limited.len(), 2);
}

#[test]
fn append_event_is_idempotent_by_id() {
    let store = store();
    store.append_event(&event("e1", "task.started", 10)).unwrap();
    store.append_event(&event("e1", "task.started", 10)).unwrap();
    assert_eq!(store.list_events(None, 10).unwrap().len(), 1);
}

#[test]
fn event_log_cursor_reads_forward() {
    let store = store();
    assert_eq!(store.last_event_seq().unwrap(), 0);

    store.append_event(&event("e1", "task.started", 10)).unwrap();
    store.append_event(&event("e2", "task.completed", 20)).unwrap();
    store.append_event(&event("e3", "agent.connected", 30)).unwrap();
    let end = store.last_event_seq().unwrap();
    assert_eq!(end, 3);

    // Oldest first, strictly after the cursor.
    let all = store.events_after(0, 100).unwrap();
    assert_eq!(
        all.iter().map(|(_, e)| e.id.as_str()).collect::<Vec<_>>(),
        ["e1", "e2", "e3"]
    );
    assert_eq!(
        all.iter().map(|(seq, _)| *seq).collect::<Vec<_>>(),
        [1, 2, 3]
    );

    let tail = store.events_after(2, 100).unwrap();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].1.id.as_str(), "e3");

    assert!(store.events_after(end, 100).unwrap().is_empty());

    let limited = store.events_after(0, 2).unwrap();
    assert_eq!(limited.len(), 2);
}

#[test]
fn prune_enforces_age_then_count() {
    let store = store();
    for i in 0..10u64 {
        store
            .append_event(&event(&format!("e{}", i), "task.started", i * 100))
            .unwrap();
    }

    // Age cutoff removes e0..e4; count cap keeps 3 of the rest.
    let deleted = store.prune_events(500, 3).unwrap();
    assert_eq!(deleted, 7);

    let remaining = store.list_events(None, 100).unwrap();
    assert_eq!(
        remaining.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
        ["e9", "e8", "e7"]
    );
}

// ── hooks ────────────────────────────────────────────────────────────────

#[test]
fn hook_crud() {
    let store = store();
    let def = hook_def("notify", "task.*");
    store.put_hook(&def).unwrap();

    assert_eq!(store.get_hook("notify").unwrap(), def);
    assert_eq!(store.list_hooks().unwrap().len(), 1);

    store.set_hook_enabled("notify", false).unwrap();
    assert!(!store.get_hook("notify").unwrap().enabled);

    assert!(store.delete_hook("notify").unwrap());
    assert!(!store.delete_hook("notify").unwrap());
    assert!(store.get_hook("notify").is_err());
}

#[test]
fn hook_reregistration_keeps_created_at() {
    let store = store();
    let mut def = hook_def("notify", "task.*");
    def.created_at = 42;
    store.put_hook(&def).unwrap();

    def.selector = "workflow.*".into();
    def.created_at = 99;
    store.put_hook(&def).unwrap();

    let loaded = store.get_hook("notify").unwrap();
    assert_eq!(loaded.selector, "workflow.*");
    assert_eq!(loaded.created_at, 42);
}

#[test]
fn hook_runs_ring_is_bounded() {
    let store = store();
    store.put_hook(&hook_def("h", "*")).unwrap();

    for i in 0..5u64 {
        let run = HookRun {
            hook: "h".into(),
            started_at_ms: i,
            duration_ms: 1,
            status: HookRunStatus::Ok,
            error: None,
        };
        store.record_hook_run(&run, 3).unwrap();
    }

    let runs = store.list_hook_runs("h", 10).unwrap();
    assert_eq!(runs.len(), 3);
    // Most recent first.
    assert_eq!(runs[0].started_at_ms, 4);
    assert_eq!(runs[2].started_at_ms, 2);
}

#[test]
fn deleting_hook_clears_history() {
    let store = store();
    store.put_hook(&hook_def("h", "*")).unwrap();
    let run = HookRun {
        hook: "h".into(),
        started_at_ms: 1,
        duration_ms: 1,
        status: HookRunStatus::Failed,
        error: Some("boom".into()),
    };
    store.record_hook_run(&run, 10).unwrap();

    store.delete_hook("h").unwrap();
    assert!(store.list_hook_runs("h", 10).unwrap().is_empty());
}

// ── recovery ─────────────────────────────────────────────────────────────

#[test]
fn open_creates_and_reopens_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("registry.db");

    let opened = RegistryStore::open(&path).unwrap();
    assert!(!opened.recovered);
    opened.store.put_agent(&agent_record("a1", "h:1")).unwrap();
    drop(opened);

    let reopened = RegistryStore::open(&path).unwrap();
    assert!(!reopened.recovered);
    assert!(reopened.store.get_agent("a1").is_ok());
    assert_eq!(reopened.store.schema_version(), SCHEMA_VERSION);
}

#[test]
fn corrupt_file_is_rotated_and_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("registry.db");
    std::fs::write(&path, b"this is not a database").unwrap();

    let opened = RegistryStore::open(&path).unwrap();
    assert!(opened.recovered);
    // Fresh, usable database.
    opened.store.put_agent(&agent_record("a1", "h:1")).unwrap();

    // The corrupt original was kept as a .bak sibling.
    let baks: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".bak"))
        .collect();
    assert_eq!(baks.len(), 1);
}
