// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed event catalog.
//!
//! Events are facts about state transitions. The scheduler, registry, and
//! daemon emit them through the event bus, which persists them and fans them
//! out to matching hooks. Serialized form is `{"type": "task.started", ...}`;
//! the dotted tag is what hook selectors match against.

use crate::error::TaskError;
use crate::id::{AgentName, EventId, HookName, WorkflowId};
use crate::task::SkipReason;
use serde::{Deserialize, Serialize};

/// Events dispatched on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // -- agent --
    #[serde(rename = "agent.registered")]
    AgentRegistered { name: AgentName, address: String },

    /// Re-registration from a different address.
    #[serde(rename = "agent.updated")]
    AgentUpdated { name: AgentName, address: String },

    /// Heartbeat received from a non-Active agent.
    #[serde(rename = "agent.connected")]
    AgentConnected { name: AgentName },

    /// Sweep reclassified an agent as Inactive.
    #[serde(rename = "agent.disconnected")]
    AgentDisconnected { name: AgentName },

    #[serde(rename = "agent.heartbeat_failed")]
    AgentHeartbeatFailed { name: AgentName, error: String },

    #[serde(rename = "agent.version_mismatch")]
    AgentVersionMismatch {
        name: AgentName,
        agent_version: u32,
        master_version: u32,
    },

    // -- task --
    #[serde(rename = "task.started")]
    TaskStarted {
        workflow_id: WorkflowId,
        task: String,
        /// Resolved execution location ("local" or an agent address).
        target: String,
        attempt: u32,
    },

    #[serde(rename = "task.completed")]
    TaskCompleted {
        workflow_id: WorkflowId,
        task: String,
        duration_ms: u64,
    },

    #[serde(rename = "task.failed")]
    TaskFailed {
        workflow_id: WorkflowId,
        task: String,
        error: TaskError,
    },

    #[serde(rename = "task.timeout")]
    TaskTimeout {
        workflow_id: WorkflowId,
        task: String,
    },

    #[serde(rename = "task.retrying")]
    TaskRetrying {
        workflow_id: WorkflowId,
        task: String,
        /// Attempt number about to run (second dispatch is attempt 2).
        attempt: u32,
        delay_ms: u64,
    },

    #[serde(rename = "task.cancelled")]
    TaskCancelled {
        workflow_id: WorkflowId,
        task: String,
    },

    #[serde(rename = "task.skipped")]
    TaskSkipped {
        workflow_id: WorkflowId,
        task: String,
        reason: SkipReason,
    },

    // -- workflow --
    #[serde(rename = "workflow.started")]
    WorkflowStarted { workflow_id: WorkflowId, name: String },

    #[serde(rename = "workflow.completed")]
    WorkflowCompleted {
        workflow_id: WorkflowId,
        name: String,
        duration_ms: u64,
    },

    #[serde(rename = "workflow.failed")]
    WorkflowFailed {
        workflow_id: WorkflowId,
        name: String,
        error: TaskError,
    },

    #[serde(rename = "workflow.cancelled")]
    WorkflowCancelled { workflow_id: WorkflowId, name: String },

    // -- hooks --
    /// A hook was auto-disabled after consecutive failures.
    #[serde(rename = "hook.disabled")]
    HookDisabled { hook: HookName, failures: u32 },

    // -- system --
    #[serde(rename = "system.startup")]
    SystemStartup { version: String },

    #[serde(rename = "system.shutdown")]
    SystemShutdown,

    /// Registry database failed its integrity check and was rotated.
    #[serde(rename = "state.corrupted")]
    StateCorrupted { path: String },

    /// User-defined event with an arbitrary dotted tag.
    #[serde(rename = "custom")]
    Custom {
        tag: String,
        #[serde(default)]
        data: serde_json::Map<String, serde_json::Value>,
    },
}

impl Event {
    /// The dotted tag hook selectors match against.
    pub fn tag(&self) -> &str {
        match self {
            Event::AgentRegistered { .. } => "agent.registered",
            Event::AgentUpdated { .. } => "agent.updated",
            Event::AgentConnected { .. } => "agent.connected",
            Event::AgentDisconnected { .. } => "agent.disconnected",
            Event::AgentHeartbeatFailed { .. } => "agent.heartbeat_failed",
            Event::AgentVersionMismatch { .. } => "agent.version_mismatch",
            Event::TaskStarted { .. } => "task.started",
            Event::TaskCompleted { .. } => "task.completed",
            Event::TaskFailed { .. } => "task.failed",
            Event::TaskTimeout { .. } => "task.timeout",
            Event::TaskRetrying { .. } => "task.retrying",
            Event::TaskCancelled { .. } => "task.cancelled",
            Event::TaskSkipped { .. } => "task.skipped",
            Event::WorkflowStarted { .. } => "workflow.started",
            Event::WorkflowCompleted { .. } => "workflow.completed",
            Event::WorkflowFailed { .. } => "workflow.failed",
            Event::WorkflowCancelled { .. } => "workflow.cancelled",
            Event::HookDisabled { .. } => "hook.disabled",
            Event::SystemStartup { .. } => "system.startup",
            Event::SystemShutdown => "system.shutdown",
            Event::StateCorrupted { .. } => "state.corrupted",
            Event::Custom { tag, .. } => tag,
        }
    }

    /// Payload map without the `type` discriminant.
    pub fn data(&self) -> serde_json::Map<String, serde_json::Value> {
        if let Event::Custom { data, .. } = self {
            return data.clone();
        }
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(mut map)) => {
                map.remove("type");
                map
            }
            _ => serde_json::Map::new(),
        }
    }

    /// Agent the event is scoped to, if any.
    pub fn agent_scope(&self) -> Option<&AgentName> {
        match self {
            Event::AgentRegistered { name, .. }
            | Event::AgentUpdated { name, .. }
            | Event::AgentConnected { name }
            | Event::AgentDisconnected { name }
            | Event::AgentHeartbeatFailed { name, .. }
            | Event::AgentVersionMismatch { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Workflow the event belongs to, if any.
    pub fn workflow_id(&self) -> Option<&WorkflowId> {
        match self {
            Event::TaskStarted { workflow_id, .. }
            | Event::TaskCompleted { workflow_id, .. }
            | Event::TaskFailed { workflow_id, .. }
            | Event::TaskTimeout { workflow_id, .. }
            | Event::TaskRetrying { workflow_id, .. }
            | Event::TaskCancelled { workflow_id, .. }
            | Event::TaskSkipped { workflow_id, .. }
            | Event::WorkflowStarted { workflow_id, .. }
            | Event::WorkflowCompleted { workflow_id, .. }
            | Event::WorkflowFailed { workflow_id, .. }
            | Event::WorkflowCancelled { workflow_id, .. } => Some(workflow_id),
            _ => None,
        }
    }
}

/// Persisted form of a dispatched event (one row in the event log).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    pub tag: String,
    pub timestamp_ms: u64,
    pub data: serde_json::Value,
}

impl EventRecord {
    pub fn from_event(id: EventId, timestamp_ms: u64, event: &Event) -> Self {
        Self {
            id,
            tag: event.tag().to_string(),
            timestamp_ms,
            data: serde_json::Value::Object(event.data()),
        }
    }
}

/// Match an event tag against a hook selector.
///
/// Supported forms: exact tag (`task.failed`), category wildcard (`task.*`),
/// and the catch-all `*`.
pub fn selector_matches(selector: &str, tag: &str) -> bool {
    if selector == "*" {
        return true;
    }
    if let Some(category) = selector.strip_suffix(".*") {
        return tag
            .strip_prefix(category)
            .is_some_and(|rest| rest.starts_with('.'));
    }
    selector == tag
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
