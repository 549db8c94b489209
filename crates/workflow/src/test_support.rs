// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow builders for tests.

use crate::spec::{TaskSpec, WorkflowSpec};

/// A workflow with the given tasks and default policy.
pub fn workflow(name: &str, tasks: Vec<TaskSpec>) -> WorkflowSpec {
    WorkflowSpec {
        name: name.to_string(),
        description: String::new(),
        version: String::new(),
        tasks,
        config: Default::default(),
        hooks: Default::default(),
    }
}

/// A command task depending on the given upstream tasks.
pub fn task_after(name: &str, command: &str, deps: &[&str]) -> TaskSpec {
    let mut task = TaskSpec::command(name, command);
    task.depends_on = deps.iter().map(|d| d.to_string()).collect();
    task
}
