// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::id::WorkflowId;

#[test]
fn skip_is_not_failure() {
    assert!(!TaskStatus::Skipped {
        reason: SkipReason::ConditionFalse
    }
    .counts_as_failure());
    assert!(TaskStatus::Failed.counts_as_failure());
    assert!(TaskStatus::Cancelled.counts_as_failure());
    assert!(!TaskStatus::Success.counts_as_failure());
}

#[test]
fn status_serializes_flat_into_result() {
    let result = TaskResult {
        name: "build".into(),
        status: TaskStatus::Skipped {
            reason: SkipReason::SkippedUpstream,
        },
        duration_ms: 0,
        attempts: 0,
        outputs: OutputTable::new(),
        error: None,
    };
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["status"], "skipped");
    assert_eq!(json["reason"], "skipped_upstream");
    // Empty outputs are elided from the wire form.
    assert!(json.get("outputs").is_none());
}

#[test]
fn report_lookup_by_name() {
    let report = WorkflowReport {
        workflow_id: WorkflowId::new("wf-1"),
        name: "deploy".into(),
        success: true,
        duration_ms: 12,
        tasks: vec![TaskResult::skipped("a", SkipReason::ConditionFalse)],
    };
    assert!(report.task("a").is_some());
    assert!(report.task("b").is_none());
}

#[test]
fn result_round_trips() {
    let mut outputs = OutputTable::new();
    outputs.insert("host".into(), serde_json::json!("worker-1"));
    let result = TaskResult {
        name: "probe".into(),
        status: TaskStatus::Success,
        duration_ms: 42,
        attempts: 1,
        outputs,
        error: None,
    };
    let json = serde_json::to_string(&result).unwrap();
    let back: TaskResult = serde_json::from_str(&json).unwrap();
    assert_eq!(back, result);
}
