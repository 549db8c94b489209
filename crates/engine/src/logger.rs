// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-task output logs.
//!
//! One file per task under `<root>/<workflow_id>/<task>.log`, appended as
//! frames arrive. Failures to log never fail the task.

use sloth_core::WorkflowId;
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TaskLogger {
    root: PathBuf,
}

impl TaskLogger {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self, workflow: &WorkflowId, task: &str) -> PathBuf {
        self.root
            .join(workflow.as_str())
            .join(format!("{task}.log"))
    }

    pub fn append(&self, workflow: &WorkflowId, task: &str, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let path = self.path(workflow, task);
        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            file.write_all(bytes)
        })();
        if let Err(e) = result {
            debug!(path = %path.display(), error = %e, "task log write failed");
        }
    }
}
