// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent registry records.
//!
//! An agent is a long-lived process on a host, identified by a unique name.
//! The record here is the persisted registry row; liveness transitions are
//! driven by the registry sweep, not by the agent itself.

use crate::id::AgentName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle state of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Heartbeating within the inactivity threshold; eligible for dispatch.
    Active,
    /// Heartbeat is stale; dispatch to this agent fails.
    Inactive,
    /// Registered but never heartbeated (transient startup state).
    Unknown,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Inactive => "inactive",
            AgentStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AgentStatus::Active),
            "inactive" => Ok(AgentStatus::Inactive),
            "unknown" => Ok(AgentStatus::Unknown),
            other => Err(format!("unknown agent status: {}", other)),
        }
    }
}

/// Host fingerprint reported at registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub arch: String,
    pub cpus: u32,
    pub memory_mb: u64,
}

/// Persisted registry row for one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub name: AgentName,
    /// Transport endpoint, `host:port`.
    pub address: String,
    pub status: AgentStatus,
    /// Freeform tag set (key → value).
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Agent build version reported at registration.
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub system: SystemInfo,
    /// Epoch seconds of the last heartbeat.
    pub last_heartbeat: u64,
    /// Epoch seconds of first registration.
    pub registered_at: u64,
    /// Epoch seconds of the last record change.
    pub updated_at: u64,
}

impl AgentRecord {
    /// True when the heartbeat is older than `threshold_secs`.
    pub fn heartbeat_stale(&self, now_secs: u64, threshold_secs: u64) -> bool {
        now_secs.saturating_sub(self.last_heartbeat) > threshold_secs
    }
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
