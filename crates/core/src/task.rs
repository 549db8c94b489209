// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task execution results and the structures shared between the scheduler,
//! the wire protocol, and clients.

use crate::error::TaskError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured outputs returned by a task, propagated to its dependents.
///
/// Small by design: bulk data travels as artifacts, not outputs.
pub type OutputTable = serde_json::Map<String, serde_json::Value>;

/// What a task executes: an interpreter script or a command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskScript {
    /// Script source evaluated by the embedded interpreter.
    Source(String),
    /// Command line run through the shell.
    Command(String),
}

impl TaskScript {
    pub fn as_str(&self) -> &str {
        match self {
            TaskScript::Source(s) | TaskScript::Command(s) => s,
        }
    }
}

/// Why a task was skipped rather than dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A dependency finished in a non-Success state.
    UpstreamFailed,
    /// A dependency was itself skipped.
    SkippedUpstream,
    /// The task's `run_if` guard evaluated false.
    ConditionFalse,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UpstreamFailed => f.write_str("upstream_failed"),
            SkipReason::SkippedUpstream => f.write_str("skipped_upstream"),
            SkipReason::ConditionFalse => f.write_str("condition_false"),
        }
    }
}

/// Terminal status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Failed,
    Skipped { reason: SkipReason },
    Cancelled,
}

impl TaskStatus {
    pub fn is_success(self) -> bool {
        matches!(self, TaskStatus::Success)
    }

    /// Skips do not count as failures for workflow success.
    pub fn counts_as_failure(self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Success => f.write_str("success"),
            TaskStatus::Failed => f.write_str("failed"),
            TaskStatus::Skipped { reason } => write!(f, "skipped ({})", reason),
            TaskStatus::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Terminal record for one task within a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub name: String,
    #[serde(flatten)]
    pub status: TaskStatus,
    pub duration_ms: u64,
    /// Number of dispatch attempts actually made (0 for skipped tasks).
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "OutputTable::is_empty")]
    pub outputs: OutputTable,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

impl TaskResult {
    pub fn skipped(name: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            name: name.into(),
            status: TaskStatus::Skipped { reason },
            duration_ms: 0,
            attempts: 0,
            outputs: OutputTable::new(),
            error: None,
        }
    }
}

/// Terminal aggregate for a workflow run, returned to the submitting client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowReport {
    pub workflow_id: crate::id::WorkflowId,
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub tasks: Vec<TaskResult>,
}

impl WorkflowReport {
    pub fn task(&self, name: &str) -> Option<&TaskResult> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
