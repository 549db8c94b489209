// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The task envelope: everything an agent needs to run one task.

use serde::{Deserialize, Serialize};
use sloth_core::{OutputTable, TaskId, TaskScript, TaskStatus, WorkflowId};
use std::collections::BTreeMap;

/// Outcome of a dependency, as seen by a dependent task's script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepResult {
    #[serde(flatten)]
    pub status: TaskStatus,
    #[serde(default)]
    pub outputs: OutputTable,
}

/// Self-contained description of one task execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task_id: TaskId,
    pub workflow_id: WorkflowId,
    pub task_name: String,
    pub script: TaskScript,
    /// Declared parameters handed to the script as `params`.
    #[serde(default)]
    pub params: OutputTable,
    /// Dependency name → outcome, handed to the script as `deps`.
    #[serde(default)]
    pub deps: BTreeMap<String, DepResult>,
    /// Extra environment on top of the agent's allowlist.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory; agents create a task-scoped one when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    /// Effective deadline for this attempt.
    pub timeout_ms: u64,
    /// Glob patterns to collect from the workdir on success.
    #[serde(default)]
    pub artifacts: Vec<String>,
    /// Artifacts from dependencies, delivered into the workdir before the
    /// script runs: artifact name → bytes.
    #[serde(default)]
    pub inputs: BTreeMap<String, Vec<u8>>,
    /// Identity of the submitting user, for audit logging on the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl TaskEnvelope {
    /// Envelope-level sanity checks, run by the agent before admission.
    pub fn validate(&self) -> Result<(), String> {
        if self.task_id.as_str().is_empty() {
            return Err("task_id is empty".to_string());
        }
        if self.task_name.is_empty() {
            return Err("task_name is empty".to_string());
        }
        if self.timeout_ms == 0 {
            return Err("timeout must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
