// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Running-task index for cancellation routing.

use parking_lot::Mutex;
use sloth_core::TaskId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Maps running task IDs to their cancellation tokens.
///
/// `Cancel` requests arrive on their own connections; this table is how
/// they find the stream they are cancelling.
#[derive(Clone, Default)]
pub struct TaskTable {
    inner: Arc<Mutex<HashMap<TaskId, CancellationToken>>>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, task_id: TaskId, token: CancellationToken) {
        self.inner.lock().insert(task_id, token);
    }

    pub fn remove(&self, task_id: &TaskId) {
        self.inner.lock().remove(task_id);
    }

    /// Trip a task's token. Unknown IDs are a no-op, which makes repeated
    /// cancellation idempotent.
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        match self.inner.lock().get(task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
#[path = "task_table_tests.rs"]
mod tests;
