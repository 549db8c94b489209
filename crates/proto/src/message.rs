// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control messages exchanged between master and agent.

use crate::envelope::TaskEnvelope;
use serde::{Deserialize, Serialize};
use sloth_core::{AgentName, SystemInfo, TaskId};
use std::collections::BTreeMap;

/// Connection preamble, sent by whichever side dialed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    /// Wire protocol version of the sender.
    pub version: u32,
    /// Hex SHA-256 digest of the shared token.
    pub auth_digest: String,
}

/// Reply to a `Hello`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HelloReply {
    Ok { version: u32 },
    Denied { reason: String },
}

/// Registration payload describing one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: AgentName,
    /// Endpoint the master should dial for task execution.
    pub address: String,
    /// Agent build version string.
    pub version: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub system: SystemInfo,
}

/// Requests an agent sends to the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentToMaster {
    Register { info: AgentInfo },
    Heartbeat { name: AgentName },
}

/// Master's reply to an [`AgentToMaster`] request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MasterReply {
    RegisterOk {
        server_version: String,
        /// Interval the agent should heartbeat at.
        heartbeat_interval_ms: u64,
    },
    HeartbeatOk,
    Err {
        message: String,
    },
}

/// Requests the master sends to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MasterToAgent {
    /// Run a task; on `Accepted` the agent streams [`crate::Frame`]s.
    Execute { envelope: TaskEnvelope },
    /// Best-effort cancellation; idempotent.
    Cancel { task_id: TaskId },
}

/// Agent's admission reply to a [`MasterToAgent`] request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentReply {
    /// Execution admitted; frames follow on this connection.
    Accepted,
    /// At `max_concurrent_tasks`; the master retries after a backoff.
    Busy,
    /// Cancellation acknowledged (whether or not the task was running).
    CancelOk,
    Err {
        message: String,
    },
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
