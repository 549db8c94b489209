// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hook definitions and execution records.
//!
//! A hook couples an event selector to a user script. Definitions are
//! persisted in the registry store; execution history is a bounded ring
//! kept alongside them.

use crate::id::HookName;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Where the hook script comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookSource {
    /// Path to a script file, read at invocation time.
    File(PathBuf),
    /// Inline script source.
    Inline(String),
}

/// A registered hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookDef {
    pub name: HookName,
    /// Event selector: an exact tag (`task.failed`), a category wildcard
    /// (`task.*`), or `*`.
    pub selector: String,
    pub source: HookSource,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Epoch seconds when the hook was first registered.
    pub created_at: u64,
}

/// Outcome of a single hook invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookRunStatus {
    Ok,
    Failed,
    Timeout,
}

impl fmt::Display for HookRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookRunStatus::Ok => f.write_str("ok"),
            HookRunStatus::Failed => f.write_str("failed"),
            HookRunStatus::Timeout => f.write_str("timeout"),
        }
    }
}

/// One entry in a hook's bounded execution history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookRun {
    pub hook: HookName,
    pub started_at_ms: u64,
    pub duration_ms: u64,
    pub status: HookRunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
#[path = "hook_tests.rs"]
mod tests;
