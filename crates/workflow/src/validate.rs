// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parse-time workflow validation.
//!
//! Everything here fails the submission before any task runs: the scheduler
//! only ever sees a [`Workflow`] that passed these checks.

use crate::spec::{TaskSpec, WorkflowConfig, WorkflowHooks, WorkflowSpec};
use indexmap::IndexMap;
use sloth_core::{TaskError, TaskErrorKind, WorkflowId};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Errors that reject a workflow at submission time.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid workflow: {0}")]
    Invalid(String),

    #[error("task '{task}' appears more than once")]
    DuplicateTask { task: String },

    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("task '{task}' lists unknown task '{target}' in next_if_fail")]
    UnknownNextIfFail { task: String, target: String },

    #[error("dependency cycle: {}", cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },

    #[error("task '{task}' consumes '{artifact}' which no transitive dependency produces")]
    UndeclaredArtifact { task: String, artifact: String },
}

impl ValidationError {
    pub fn kind(&self) -> TaskErrorKind {
        match self {
            ValidationError::Invalid(_) | ValidationError::DuplicateTask { .. } => {
                TaskErrorKind::InvalidWorkflow
            }
            ValidationError::UnknownDependency { .. }
            | ValidationError::UnknownNextIfFail { .. } => TaskErrorKind::UnknownDependency,
            ValidationError::CycleDetected { .. } => TaskErrorKind::CycleDetected,
            ValidationError::UndeclaredArtifact { .. } => TaskErrorKind::UndeclaredArtifact,
        }
    }

    pub fn to_task_error(&self) -> TaskError {
        TaskError::new(self.kind(), self.to_string())
    }
}

/// A validated workflow, ready for the scheduler.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub description: String,
    pub version: String,
    pub config: WorkflowConfig,
    pub hooks: WorkflowHooks,
    /// Task name → descriptor, in definition order. Group-level
    /// `delegate_to` has already been inherited.
    pub tasks: IndexMap<String, TaskSpec>,
}

/// Validate a workflow record, assigning it a fresh run id.
pub fn validate(spec: WorkflowSpec) -> Result<Workflow, ValidationError> {
    if spec.name.trim().is_empty() {
        return Err(ValidationError::Invalid("workflow name is empty".into()));
    }
    if spec.config.timeout_ms == Some(0) {
        return Err(ValidationError::Invalid(
            "workflow timeout must be positive".into(),
        ));
    }

    let mut tasks: IndexMap<String, TaskSpec> = IndexMap::with_capacity(spec.tasks.len());
    for mut task in spec.tasks {
        if task.name.trim().is_empty() {
            return Err(ValidationError::Invalid("task with empty name".into()));
        }
        if task.timeout_ms == Some(0) {
            return Err(ValidationError::Invalid(format!(
                "task '{}' timeout must be positive",
                task.name
            )));
        }
        // Group-level delegate is a default for tasks without their own.
        if task.delegate_to.is_none() {
            task.delegate_to = spec.config.delegate_to.clone();
        }
        let name = task.name.clone();
        if tasks.insert(name.clone(), task).is_some() {
            return Err(ValidationError::DuplicateTask { task: name });
        }
    }

    // Every edge must land on a task in the same group.
    for (name, task) in &tasks {
        for dependency in &task.depends_on {
            if !tasks.contains_key(dependency) {
                return Err(ValidationError::UnknownDependency {
                    task: name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
        for target in &task.next_if_fail {
            if !tasks.contains_key(target) {
                return Err(ValidationError::UnknownNextIfFail {
                    task: name.clone(),
                    target: target.clone(),
                });
            }
        }
    }

    if let Some(cycle) = find_cycle(&tasks) {
        return Err(ValidationError::CycleDetected { cycle });
    }

    check_consumed_artifacts(&tasks)?;

    Ok(Workflow {
        id: WorkflowId::generate(),
        name: spec.name,
        description: spec.description,
        version: spec.version,
        config: spec.config,
        hooks: spec.hooks,
        tasks,
    })
}

/// Three-color DFS over `depends_on` edges. Returns the offending path
/// (first node repeated at the end) when a cycle exists.
fn find_cycle(tasks: &IndexMap<String, TaskSpec>) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Active,
        Done,
    }

    fn visit(
        name: &str,
        tasks: &IndexMap<String, TaskSpec>,
        marks: &mut HashMap<String, Mark>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        match marks.get(name) {
            Some(Mark::Done) => return None,
            Some(Mark::Active) => {
                let start = path.iter().position(|n| n == name).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].to_vec();
                cycle.push(name.to_string());
                return Some(cycle);
            }
            None => {}
        }

        marks.insert(name.to_string(), Mark::Active);
        path.push(name.to_string());

        if let Some(task) = tasks.get(name) {
            for dependency in &task.depends_on {
                if let Some(cycle) = visit(dependency, tasks, marks, path) {
                    return Some(cycle);
                }
            }
        }

        path.pop();
        marks.insert(name.to_string(), Mark::Done);
        None
    }

    let mut marks = HashMap::new();
    for name in tasks.keys() {
        let mut path = Vec::new();
        if let Some(cycle) = visit(name, tasks, &mut marks, &mut path) {
            return Some(cycle);
        }
    }
    None
}

/// Every `consumes` entry must name an artifact pattern declared by some
/// transitive dependency.
fn check_consumed_artifacts(
    tasks: &IndexMap<String, TaskSpec>,
) -> Result<(), ValidationError> {
    for (name, task) in tasks {
        if task.consumes.is_empty() {
            continue;
        }

        let mut available: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = task.depends_on.iter().map(String::as_str).collect();
        let mut seen: HashSet<&str> = stack.iter().copied().collect();
        while let Some(dep) = stack.pop() {
            if let Some(dep_task) = tasks.get(dep) {
                available.extend(dep_task.artifacts.iter().map(String::as_str));
                for upstream in &dep_task.depends_on {
                    if seen.insert(upstream) {
                        stack.push(upstream);
                    }
                }
            }
        }

        for artifact in &task.consumes {
            if !available.contains(artifact.as_str()) {
                return Err(ValidationError::UndeclaredArtifact {
                    task: name.clone(),
                    artifact: artifact.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
