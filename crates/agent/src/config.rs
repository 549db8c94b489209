// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent process configuration.

use sloth_core::AgentName;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Unique agent name, the key workflows delegate to.
    pub name: AgentName,
    /// Listen address for the task server.
    pub bind: String,
    /// Address reported to the master (what the master dials).
    pub advertise: String,
    /// Master endpoint for registration and heartbeats.
    pub master: String,
    /// Shared authentication token.
    pub token: String,
    /// Concurrent `Execute` streams before `Busy`.
    pub max_concurrent_tasks: usize,
    /// Root for task workdirs.
    pub state_dir: PathBuf,
    /// Freeform tags reported at registration.
    pub tags: std::collections::BTreeMap<String, String>,
    /// Heartbeat cadence used until the master assigns one at
    /// registration.
    pub heartbeat_interval: Duration,
    /// Bound on cancellation before the child is abandoned.
    pub cancel_grace: Duration,
}

impl AgentConfig {
    pub fn defaults(name: &str, bind: &str, master: &str, token: &str) -> Self {
        Self {
            name: AgentName::new(name),
            bind: bind.to_string(),
            advertise: bind.to_string(),
            master: master.to_string(),
            token: token.to_string(),
            max_concurrent_tasks: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            state_dir: PathBuf::from(".sloth-agent"),
            tags: Default::default(),
            heartbeat_interval: Duration::from_secs(30),
            cancel_grace: Duration::from_secs(5),
        }
    }
}
