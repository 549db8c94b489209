// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Serde record types for workflow definitions.

use serde::{Deserialize, Serialize};
use sloth_core::{OutputTable, TaskScript};
use std::collections::BTreeMap;

/// Boolean guard attached to a task (`run_if` / `abort_if`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Guard {
    /// Shell command; exit code 0 means true.
    Command(String),
    /// Interpreter expression evaluated side-effect-free to a boolean.
    Script(String),
}

/// An inline, unregistered execution endpoint.
///
/// No heartbeat, no persistence; credentials supplied with the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineAgent {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Where a task runs: `"local"`, an agent name, a `host:port`, or an
/// inline agent record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DelegateSpec {
    Target(String),
    Inline(InlineAgent),
}

/// One task descriptor within a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    /// What to run: `{"command": "..."}` or `{"source": "..."}`.
    #[serde(flatten)]
    pub script: TaskScript,
    /// Declared parameters handed to the script as `params`.
    #[serde(default)]
    pub params: OutputTable,
    /// Per-task deadline; the workflow budget and system ceiling still
    /// apply on top.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Extra execution attempts after the first failure.
    #[serde(default)]
    pub retries: u32,
    /// Fire-and-forget: dependents do not wait for this task.
    #[serde(default, rename = "async")]
    pub fire_and_forget: bool,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Glob patterns collected from the workdir on success.
    #[serde(default)]
    pub artifacts: Vec<String>,
    /// Artifact names consumed from transitive dependencies.
    #[serde(default)]
    pub consumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_if: Option<Guard>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_if: Option<Guard>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegate_to: Option<DelegateSpec>,
    /// Tasks allowed to proceed when this one fails.
    #[serde(default)]
    pub next_if_fail: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    // Per-task lifecycle closures, run through the interpreter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_exec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_exec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<String>,
}

impl TaskSpec {
    /// Minimal command task; tests and builders flesh out the rest.
    pub fn command(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: TaskScript::Command(command.into()),
            params: OutputTable::new(),
            timeout_ms: None,
            retries: 0,
            fire_and_forget: false,
            depends_on: Vec::new(),
            artifacts: Vec::new(),
            consumes: Vec::new(),
            run_if: None,
            abort_if: None,
            delegate_to: None,
            next_if_fail: Vec::new(),
            env: BTreeMap::new(),
            pre_exec: None,
            post_exec: None,
            on_success: None,
            on_failure: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Workflow-level policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Budget for the whole run; `Some(0)` is rejected at validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Dispatch window; `None` means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel_tasks: Option<usize>,
    #[serde(default)]
    pub fail_fast: bool,
    /// Delete the artifact staging area even when the workflow fails.
    #[serde(default = "default_true")]
    pub cleanup_on_failure: bool,
    /// Working directory for local execution; created if missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    /// Default delegate inherited by tasks without their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegate_to: Option<DelegateSpec>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            max_parallel_tasks: None,
            fail_fast: false,
            cleanup_on_failure: true,
            workdir: None,
            delegate_to: None,
        }
    }
}

/// Workflow lifecycle closures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowHooks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_complete: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_abort: Option<String>,
}

/// The structured record produced by the workflow front-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    pub tasks: Vec<TaskSpec>,
    #[serde(default)]
    pub config: WorkflowConfig,
    #[serde(default)]
    pub hooks: WorkflowHooks,
}

#[cfg(test)]
#[path = "spec_tests.rs"]
mod tests;
