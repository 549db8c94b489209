// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Master-side request/response vocabulary.
//!
//! Agents and clients share one listener, so this enum is the union of
//! both surfaces. The `register`/`heartbeat` variants are wire-compatible
//! with [`sloth_proto::AgentToMaster`], and the corresponding replies with
//! [`sloth_proto::MasterReply`] — an agent built against the proto crate
//! talks to this daemon without knowing this enum exists.

use serde::{Deserialize, Serialize};
use sloth_core::{
    AgentName, AgentRecord, EventRecord, HookDef, HookRun, WorkflowId, WorkflowReport,
};
use sloth_proto::AgentInfo;
use sloth_workflow::WorkflowSpec;

/// Requests accepted by the master listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    // -- agent surface (wire-compatible with AgentToMaster) --
    Register { info: AgentInfo },
    Heartbeat { name: AgentName },

    // -- client surface --
    /// Validate and run a workflow. Replies `Submitted` immediately, then
    /// `Report` when the run terminates.
    Submit {
        spec: WorkflowSpec,
        /// Stop after validation; no tasks run.
        #[serde(default)]
        validate_only: bool,
    },
    /// Cancel a running workflow by id.
    CancelWorkflow { id: WorkflowId },

    ListAgents {
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        tag: Option<String>,
    },
    GetAgent { name: String },
    RemoveAgent { name: String },

    ListEvents {
        #[serde(default)]
        selector: Option<String>,
        limit: usize,
    },

    PutHook { def: HookDef },
    ListHooks,
    DeleteHook { name: String },
    SetHookEnabled { name: String, enabled: bool },
    HookRuns { name: String, limit: usize },

    Status,
    Shutdown,
}

/// Replies from the master listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    // -- agent surface (wire-compatible with MasterReply) --
    RegisterOk {
        server_version: String,
        heartbeat_interval_ms: u64,
    },
    HeartbeatOk,

    // -- client surface --
    Submitted { workflow_id: WorkflowId },
    Report { report: WorkflowReport },
    Validated { name: String, tasks: usize },
    Cancelling { found: bool },

    Agents { agents: Vec<AgentRecord> },
    Agent { agent: Box<AgentRecord> },
    Removed { existed: bool },

    Events { events: Vec<EventRecord> },

    Hooks { hooks: Vec<HookDef> },
    HookRuns { runs: Vec<HookRun> },

    Status { status: DaemonStatus },
    Ok,
    Err { message: String },
}

impl Response {
    pub fn err(message: impl std::fmt::Display) -> Self {
        Response::Err {
            message: message.to_string(),
        }
    }
}

/// Snapshot of master health for `sloth daemon status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub version: String,
    pub uptime_secs: u64,
    pub agents_active: usize,
    pub agents_inactive: usize,
    pub running_workflows: usize,
    pub schema_version: u32,
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
