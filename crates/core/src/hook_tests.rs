// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn source_serializes_tagged() {
    let inline = HookSource::Inline("log(event.tag)".into());
    let json = serde_json::to_value(&inline).unwrap();
    assert_eq!(json["inline"], "log(event.tag)");

    let file = HookSource::File(PathBuf::from("/etc/sloth/hooks/notify.lua"));
    let json = serde_json::to_value(&file).unwrap();
    assert_eq!(json["file"], "/etc/sloth/hooks/notify.lua");
}

#[test]
fn def_round_trips() {
    let def = HookDef {
        name: HookName::new("notify-failures"),
        selector: "task.failed".into(),
        source: HookSource::Inline("notify()".into()),
        enabled: true,
        description: Some("page on task failure".into()),
        created_at: 1_700_000_000,
    };
    let json = serde_json::to_string(&def).unwrap();
    let back: HookDef = serde_json::from_str(&json).unwrap();
    assert_eq!(back, def);
}

#[test]
fn run_status_display() {
    assert_eq!(HookRunStatus::Timeout.to_string(), "timeout");
    assert_eq!(HookRunStatus::Ok.to_string(), "ok");
}
