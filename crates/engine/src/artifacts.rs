// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow-scoped artifact staging.
//!
//! Layout: `<root>/<workflow_id>/<task_name>/<artifact_name>`, where the
//! artifact name is the producing task's workdir-relative path. The staging
//! tree is owned by the workflow's coordinator and reclaimed at exit.

use sloth_core::WorkflowId;
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Component, Path, PathBuf};

/// Root of the staging tree (one directory per workflow run).
#[derive(Debug, Clone)]
pub struct ArtifactStaging {
    root: PathBuf,
}

impl ArtifactStaging {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn workflow(&self, id: &WorkflowId) -> WorkflowStaging {
        WorkflowStaging {
            dir: self.root.join(id.as_str()),
        }
    }
}

/// Staging area for one workflow run.
#[derive(Debug, Clone)]
pub struct WorkflowStaging {
    dir: PathBuf,
}

impl WorkflowStaging {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist one artifact produced by `task`.
    pub async fn store(&self, task: &str, name: &str, bytes: &[u8]) -> io::Result<()> {
        let relative = sanitize(name)?;
        let path = self.dir.join(task).join(relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await
    }

    /// Load every staged artifact whose name matches `pattern`, restricted
    /// to the given producer tasks. Returns name → bytes.
    pub async fn collect(
        &self,
        pattern: &str,
        producers: &HashSet<String>,
    ) -> io::Result<BTreeMap<String, Vec<u8>>> {
        let matcher = glob::Pattern::new(pattern)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

        let mut found = BTreeMap::new();
        for producer in producers {
            let task_dir = self.dir.join(producer);
            if !task_dir.is_dir() {
                continue;
            }
            for name in relative_files(&task_dir)? {
                if matcher.matches(&name) {
                    let bytes = tokio::fs::read(task_dir.join(&name)).await?;
                    found.insert(name, bytes);
                }
            }
        }
        Ok(found)
    }

    /// Names staged by one task (test and status surface).
    pub fn staged_names(&self, task: &str) -> io::Result<Vec<String>> {
        let task_dir = self.dir.join(task);
        if !task_dir.is_dir() {
            return Ok(Vec::new());
        }
        relative_files(&task_dir)
    }

    /// Remove the whole staging tree. Missing tree is fine.
    pub async fn cleanup(&self) -> io::Result<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Reject absolute paths and `..` traversal in artifact names.
fn sanitize(name: &str) -> io::Result<&Path> {
    let path = Path::new(name);
    let ok = !name.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if ok {
        Ok(path)
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("illegal artifact name: {name:?}"),
        ))
    }
}

/// Walk a directory tree, returning file paths relative to `base` with
/// `/` separators.
pub(crate) fn relative_files(base: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut stack = vec![base.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if let Ok(relative) = path.strip_prefix(base) {
                names.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
#[path = "artifacts_tests.rs"]
mod tests;
