// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn display_round_trips() {
    let id = TaskId::new("abc-123");
    assert_eq!(id.to_string(), "abc-123");
    assert_eq!(id.as_str(), "abc-123");
}

#[test]
fn short_truncates() {
    let id = WorkflowId::new("0123456789");
    assert_eq!(id.short(4), "0123");
    assert_eq!(id.short(64), "0123456789");
}

#[test]
fn compares_against_str() {
    let name = AgentName::new("builder-1");
    assert_eq!(name, "builder-1");
    assert_ne!(name, "builder-2");
}

#[test]
fn generate_is_unique() {
    assert_ne!(TaskId::generate(), TaskId::generate());
}

#[test]
fn serde_is_transparent() {
    let name = HookName::new("on-deploy");
    let json = serde_json::to_string(&name).unwrap();
    assert_eq!(json, "\"on-deploy\"");
    let back: HookName = serde_json::from_str(&json).unwrap();
    assert_eq!(back, name);
}
