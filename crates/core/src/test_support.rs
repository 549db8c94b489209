// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Builders shared by tests across the workspace.
//!
//! Compiled only for tests or with the `test-support` feature.

use crate::agent::{AgentRecord, AgentStatus, SystemInfo};
use crate::hook::{HookDef, HookSource};
use crate::id::{AgentName, HookName};

/// An Active agent record with a fresh heartbeat at epoch second 1000.
pub fn agent_record(name: &str, address: &str) -> AgentRecord {
    AgentRecord {
        name: AgentName::new(name),
        address: address.to_string(),
        status: AgentStatus::Active,
        tags: Default::default(),
        version: "0.1.0".to_string(),
        system: SystemInfo {
            os: "linux".to_string(),
            arch: "x86_64".to_string(),
            cpus: 4,
            memory_mb: 8192,
        },
        last_heartbeat: 1000,
        registered_at: 1000,
        updated_at: 1000,
    }
}

/// An enabled inline hook.
pub fn hook_def(name: &str, selector: &str) -> HookDef {
    HookDef {
        name: HookName::new(name),
        selector: selector.to_string(),
        source: HookSource::Inline("return true".to_string()),
        enabled: true,
        description: None,
        created_at: 1000,
    }
}
