// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use sloth_core::{TaskError, TaskErrorKind, TaskResult, WorkflowId};

#[test]
fn table_aligns_columns() {
    let rendered = table(
        &["NAME", "STATUS"],
        &[
            vec!["short".into(), "ok".into()],
            vec!["a-much-longer-name".into(), "failed".into()],
        ],
    );
    let lines: Vec<&str> = rendered.lines().collect();
    assert_eq!(lines.len(), 3);
    let name_col = lines[1].find("ok").unwrap();
    assert_eq!(lines[2].find("failed").unwrap(), name_col);
}

#[test]
fn report_table_includes_summary_line() {
    let report = sloth_core::WorkflowReport {
        workflow_id: WorkflowId::new("0123456789abcdef"),
        name: "deploy".into(),
        success: false,
        duration_ms: 1234,
        tasks: vec![
            TaskResult {
                name: "build".into(),
                status: sloth_core::TaskStatus::Success,
                duration_ms: 100,
                attempts: 1,
                outputs: Default::default(),
                error: None,
            },
            TaskResult {
                name: "ship".into(),
                status: sloth_core::TaskStatus::Failed,
                duration_ms: 50,
                attempts: 3,
                outputs: Default::default(),
                error: Some(TaskError::new(TaskErrorKind::NonZeroExit, "exit code 1")),
            },
        ],
    };

    let rendered = report_table(&report);
    assert!(rendered.contains("build"));
    assert!(rendered.contains("non_zero_exit: exit code 1"));
    assert!(rendered.contains("workflow deploy (01234567): failed in 1234ms"));
}

#[test]
fn long_event_data_is_truncated() {
    let record = sloth_core::EventRecord {
        id: sloth_core::EventId::new("e1"),
        tag: "custom".into(),
        timestamp_ms: 1_700_000_000_000,
        data: serde_json::json!({"blob": "x".repeat(200)}),
    };
    let rendered = events_table(&[record]);
    assert!(rendered.contains('…'));
    assert!(rendered.lines().nth(1).unwrap().len() < 200);
}
