// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::error::TaskErrorKind;
use yare::parameterized;

#[test]
fn serialized_type_matches_tag() {
    let event = Event::TaskStarted {
        workflow_id: WorkflowId::new("wf-1"),
        task: "build".into(),
        target: "local".into(),
        attempt: 1,
    };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], event.tag());
}

#[test]
fn data_strips_discriminant() {
    let event = Event::AgentRegistered {
        name: AgentName::new("a1"),
        address: "10.0.0.1:50051".into(),
    };
    let data = event.data();
    assert!(data.get("type").is_none());
    assert_eq!(data["name"], "a1");
    assert_eq!(data["address"], "10.0.0.1:50051");
}

#[test]
fn custom_event_uses_inner_tag() {
    let mut data = serde_json::Map::new();
    data.insert("release".into(), serde_json::json!("v2"));
    let event = Event::Custom {
        tag: "deploy.finished".into(),
        data,
    };
    assert_eq!(event.tag(), "deploy.finished");
    assert_eq!(event.data()["release"], "v2");

    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "custom");
    assert_eq!(json["tag"], "deploy.finished");
}

#[test]
fn agent_scope_only_on_agent_events() {
    let scoped = Event::AgentDisconnected {
        name: AgentName::new("a2"),
    };
    assert_eq!(scoped.agent_scope().map(|n| n.as_str()), Some("a2"));

    let unscoped = Event::WorkflowStarted {
        workflow_id: WorkflowId::new("wf"),
        name: "hello".into(),
    };
    assert!(unscoped.agent_scope().is_none());
}

#[test]
fn record_carries_tag_and_payload() {
    let event = Event::TaskFailed {
        workflow_id: WorkflowId::new("wf"),
        task: "t".into(),
        error: TaskError::new(TaskErrorKind::NonZeroExit, "exit code 1"),
    };
    let record = EventRecord::from_event(EventId::new("e1"), 123, &event);
    assert_eq!(record.tag, "task.failed");
    assert_eq!(record.timestamp_ms, 123);
    assert_eq!(record.data["error"]["kind"], "non_zero_exit");
}

#[parameterized(
    exact = { "task.failed", "task.failed", true },
    exact_miss = { "task.failed", "task.started", false },
    category = { "task.*", "task.retrying", true },
    category_miss = { "task.*", "agent.connected", false },
    category_no_partial = { "task.*", "tasks.started", false },
    star = { "*", "anything.at_all", true },
    bare_category = { "task", "task.started", false },
)]
fn selector_matching(selector: &str, tag: &str, expected: bool) {
    assert_eq!(selector_matches(selector, tag), expected);
}

#[test]
fn event_round_trips() {
    let event = Event::TaskRetrying {
        workflow_id: WorkflowId::new("wf"),
        task: "flaky".into(),
        attempt: 2,
        delay_ms: 1000,
    };
    let json = serde_json::to_string(&event).unwrap();
    let back: Event = serde_json::from_str(&json).unwrap();
    assert_eq!(back, event);
}
