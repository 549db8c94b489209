// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::spec::DelegateSpec;
use crate::test_support::{task_after, workflow};
use crate::TaskSpec;
use sloth_core::TaskErrorKind;

#[test]
fn empty_workflow_is_valid() {
    let wf = validate(workflow("noop", vec![])).unwrap();
    assert!(wf.tasks.is_empty());
    assert_eq!(wf.name, "noop");
}

#[test]
fn linear_chain_validates_in_order() {
    let wf = validate(workflow(
        "chain",
        vec![
            task_after("a", "echo a", &[]),
            task_after("b", "echo b", &["a"]),
            task_after("c", "echo c", &["b"]),
        ],
    ))
    .unwrap();
    let names: Vec<_> = wf.tasks.keys().cloned().collect();
    assert_eq!(names, ["a", "b", "c"]);
}

#[test]
fn duplicate_task_rejected() {
    let err = validate(workflow(
        "dup",
        vec![task_after("a", "echo", &[]), task_after("a", "echo", &[])],
    ))
    .unwrap_err();
    assert!(matches!(err, ValidationError::DuplicateTask { .. }));
    assert_eq!(err.kind(), TaskErrorKind::InvalidWorkflow);
}

#[test]
fn dangling_dependency_rejected() {
    let err = validate(workflow(
        "dangling",
        vec![task_after("a", "echo", &["ghost"])],
    ))
    .unwrap_err();
    assert!(matches!(
        err,
        ValidationError::UnknownDependency { ref dependency, .. } if dependency == "ghost"
    ));
    assert_eq!(err.kind(), TaskErrorKind::UnknownDependency);
}

#[test]
fn dangling_next_if_fail_rejected() {
    let mut task = task_after("a", "echo", &[]);
    task.next_if_fail = vec!["recovery".into()];
    let err = validate(workflow("bad", vec![task])).unwrap_err();
    assert!(matches!(err, ValidationError::UnknownNextIfFail { .. }));
}

#[test]
fn cycle_detected_with_path() {
    let err = validate(workflow(
        "loopy",
        vec![
            task_after("a", "echo", &["c"]),
            task_after("b", "echo", &["a"]),
            task_after("c", "echo", &["b"]),
        ],
    ))
    .unwrap_err();
    let ValidationError::CycleDetected { cycle } = &err else {
        panic!("expected cycle, got {err}");
    };
    assert_eq!(cycle.first(), cycle.last());
    assert!(cycle.len() == 4, "cycle should name all three tasks: {cycle:?}");
    assert_eq!(err.kind(), TaskErrorKind::CycleDetected);
}

#[test]
fn self_dependency_is_a_cycle() {
    let err = validate(workflow("self", vec![task_after("a", "echo", &["a"])])).unwrap_err();
    assert!(matches!(err, ValidationError::CycleDetected { .. }));
}

#[test]
fn zero_workflow_timeout_rejected() {
    let mut spec = workflow("zt", vec![]);
    spec.config.timeout_ms = Some(0);
    let err = validate(spec).unwrap_err();
    assert_eq!(err.kind(), TaskErrorKind::InvalidWorkflow);
}

#[test]
fn zero_task_timeout_rejected() {
    let mut task = task_after("a", "echo", &[]);
    task.timeout_ms = Some(0);
    let err = validate(workflow("zt", vec![task])).unwrap_err();
    assert_eq!(err.kind(), TaskErrorKind::InvalidWorkflow);
}

#[test]
fn consumes_must_be_produced_upstream() {
    let mut producer = task_after("build", "make", &[]);
    producer.artifacts = vec!["out.tar".into()];
    let mut consumer = task_after("deploy", "ship", &["build"]);
    consumer.consumes = vec!["out.tar".into()];

    assert!(validate(workflow("ok", vec![producer.clone(), consumer.clone()])).is_ok());

    consumer.consumes = vec!["missing.tar".into()];
    let err = validate(workflow("bad", vec![producer, consumer])).unwrap_err();
    assert!(matches!(
        err,
        ValidationError::UndeclaredArtifact { ref artifact, .. } if artifact == "missing.tar"
    ));
    assert_eq!(err.kind(), TaskErrorKind::UndeclaredArtifact);
}

#[test]
fn consumes_sees_transitive_artifacts() {
    let mut root = task_after("fetch", "curl", &[]);
    root.artifacts = vec!["data.json".into()];
    let middle = task_after("check", "true", &["fetch"]);
    let mut leaf = task_after("report", "render", &["check"]);
    leaf.consumes = vec!["data.json".into()];

    assert!(validate(workflow("deep", vec![root, middle, leaf])).is_ok());
}

#[test]
fn group_delegate_is_inherited() {
    let mut spec = workflow(
        "delegated",
        vec![task_after("a", "echo", &[]), {
            let mut t = task_after("b", "echo", &[]);
            t.delegate_to = Some(DelegateSpec::Target("special".into()));
            t
        }],
    );
    spec.config.delegate_to = Some(DelegateSpec::Target("default-agent".into()));

    let wf = validate(spec).unwrap();
    assert_eq!(
        wf.tasks["a"].delegate_to,
        Some(DelegateSpec::Target("default-agent".into()))
    );
    assert_eq!(
        wf.tasks["b"].delegate_to,
        Some(DelegateSpec::Target("special".into()))
    );
}

#[test]
fn validation_assigns_unique_run_ids() {
    let a = validate(workflow("same", vec![])).unwrap();
    let b = validate(workflow("same", vec![])).unwrap();
    assert_ne!(a.id, b.id);
}

#[test]
fn to_task_error_carries_kind_and_detail() {
    let err = validate(workflow(
        "dangling",
        vec![TaskSpec::command("a", "echo"), task_after("b", "echo", &["x"])],
    ))
    .unwrap_err();
    let task_error = err.to_task_error();
    assert_eq!(task_error.kind, TaskErrorKind::UnknownDependency);
    assert!(task_error.message.contains('x'));
}
