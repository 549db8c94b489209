// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task error taxonomy.
//!
//! Every terminal task result carries a structured `{kind, message}` pair.
//! The kind decides policy: validation errors reject the workflow before it
//! starts, transient kinds are re-dispatched without consuming a retry
//! budget, execution kinds consume one attempt per failure.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classified failure kinds, as surfaced to clients and the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    // -- validation (workflow never starts) --
    InvalidWorkflow,
    UnknownDependency,
    CycleDetected,
    UndeclaredArtifact,

    // -- resolution --
    UnknownAgent,
    AgentInactive,
    ResolutionTransient,

    // -- transport --
    ConnectionLost,
    DeadlineExceeded,
    CredentialRejected,

    // -- execution --
    InterpreterStartFailed,
    InterpreterException,
    NonZeroExit,
    Timeout,
    ArtifactMissing,
    Cancelled,
    AgentBusy,

    // -- infrastructure --
    StorageError,
    DiskFull,

    // -- policy --
    Aborted,
    UpstreamFailed,
}

impl TaskErrorKind {
    /// Transient conditions are re-dispatched after a short backoff without
    /// consuming the task's retry budget.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            TaskErrorKind::ResolutionTransient | TaskErrorKind::AgentBusy
        )
    }

    /// Validation kinds are rejected at submission time.
    pub fn is_validation(self) -> bool {
        matches!(
            self,
            TaskErrorKind::InvalidWorkflow
                | TaskErrorKind::UnknownDependency
                | TaskErrorKind::CycleDetected
                | TaskErrorKind::UndeclaredArtifact
        )
    }

    /// Policy kinds terminate a task without it ever having run.
    pub fn is_policy(self) -> bool {
        matches!(self, TaskErrorKind::Aborted | TaskErrorKind::UpstreamFailed)
    }

    /// Wire tag, also used in event payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskErrorKind::InvalidWorkflow => "invalid_workflow",
            TaskErrorKind::UnknownDependency => "unknown_dependency",
            TaskErrorKind::CycleDetected => "cycle_detected",
            TaskErrorKind::UndeclaredArtifact => "undeclared_artifact",
            TaskErrorKind::UnknownAgent => "unknown_agent",
            TaskErrorKind::AgentInactive => "agent_inactive",
            TaskErrorKind::ResolutionTransient => "resolution_transient",
            TaskErrorKind::ConnectionLost => "connection_lost",
            TaskErrorKind::DeadlineExceeded => "deadline_exceeded",
            TaskErrorKind::CredentialRejected => "credential_rejected",
            TaskErrorKind::InterpreterStartFailed => "interpreter_start_failed",
            TaskErrorKind::InterpreterException => "interpreter_exception",
            TaskErrorKind::NonZeroExit => "non_zero_exit",
            TaskErrorKind::Timeout => "timeout",
            TaskErrorKind::ArtifactMissing => "artifact_missing",
            TaskErrorKind::Cancelled => "cancelled",
            TaskErrorKind::AgentBusy => "agent_busy",
            TaskErrorKind::StorageError => "storage_error",
            TaskErrorKind::DiskFull => "disk_full",
            TaskErrorKind::Aborted => "aborted",
            TaskErrorKind::UpstreamFailed => "upstream_failed",
        }
    }
}

impl fmt::Display for TaskErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured task failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(TaskErrorKind::Cancelled, "cancelled")
    }

    pub fn timeout(limit_ms: u64) -> Self {
        Self::new(
            TaskErrorKind::Timeout,
            format!("deadline of {}ms exceeded", limit_ms),
        )
    }

    pub fn non_zero_exit(code: i32) -> Self {
        Self::new(TaskErrorKind::NonZeroExit, format!("exit code {}", code))
    }

    pub fn upstream_failed(dependency: &str) -> Self {
        Self::new(
            TaskErrorKind::UpstreamFailed,
            format!("dependency '{}' did not succeed", dependency),
        )
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
