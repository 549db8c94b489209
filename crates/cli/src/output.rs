// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plain-text rendering for CLI output.

use sloth_core::{AgentRecord, EventRecord, HookDef, HookRun, WorkflowReport};

/// Render rows with left-aligned, width-fitted columns.
pub fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut out = String::new();
    let render_row = |cells: Vec<String>, widths: &[usize]| -> String {
        let mut line = String::new();
        for (i, cell) in cells.iter().enumerate() {
            if i > 0 {
                line.push_str("  ");
            }
            line.push_str(cell);
            if i + 1 < cells.len() {
                line.push_str(&" ".repeat(widths[i].saturating_sub(cell.len())));
            }
        }
        line.trim_end().to_string()
    };

    out.push_str(&render_row(
        headers.iter().map(|h| h.to_string()).collect(),
        &widths,
    ));
    out.push('\n');
    for row in rows {
        out.push_str(&render_row(row.clone(), &widths));
        out.push('\n');
    }
    out
}

pub fn agents_table(agents: &[AgentRecord]) -> String {
    let rows: Vec<Vec<String>> = agents
        .iter()
        .map(|a| {
            vec![
                a.name.to_string(),
                a.address.clone(),
                a.status.to_string(),
                format_epoch_secs(a.last_heartbeat),
                a.tags
                    .iter()
                    .map(|(k, v)| {
                        if v.is_empty() {
                            k.clone()
                        } else {
                            format!("{k}={v}")
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(","),
            ]
        })
        .collect();
    table(&["NAME", "ADDRESS", "STATUS", "LAST HEARTBEAT", "TAGS"], &rows)
}

pub fn events_table(events: &[EventRecord]) -> String {
    let rows: Vec<Vec<String>> = events
        .iter()
        .map(|e| {
            vec![
                format_epoch_ms(e.timestamp_ms),
                e.tag.clone(),
                compact_json(&e.data),
            ]
        })
        .collect();
    table(&["TIME", "EVENT", "DATA"], &rows)
}

pub fn hooks_table(hooks: &[HookDef]) -> String {
    let rows: Vec<Vec<String>> = hooks
        .iter()
        .map(|h| {
            vec![
                h.name.to_string(),
                h.selector.clone(),
                if h.enabled { "enabled" } else { "disabled" }.to_string(),
                h.description.clone().unwrap_or_default(),
            ]
        })
        .collect();
    table(&["NAME", "SELECTOR", "STATE", "DESCRIPTION"], &rows)
}

pub fn hook_runs_table(runs: &[HookRun]) -> String {
    let rows: Vec<Vec<String>> = runs
        .iter()
        .map(|r| {
            vec![
                format_epoch_ms(r.started_at_ms),
                r.status.to_string(),
                format!("{}ms", r.duration_ms),
                r.error.clone().unwrap_or_default(),
            ]
        })
        .collect();
    table(&["STARTED", "STATUS", "DURATION", "ERROR"], &rows)
}

pub fn report_table(report: &WorkflowReport) -> String {
    let rows: Vec<Vec<String>> = report
        .tasks
        .iter()
        .map(|t| {
            vec![
                t.name.clone(),
                t.status.to_string(),
                format!("{}ms", t.duration_ms),
                t.attempts.to_string(),
                t.error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            ]
        })
        .collect();
    let mut out = table(&["TASK", "STATUS", "DURATION", "ATTEMPTS", "ERROR"], &rows);
    out.push_str(&format!(
        "\nworkflow {} ({}): {} in {}ms\n",
        report.name,
        report.workflow_id.short(8),
        if report.success { "success" } else { "failed" },
        report.duration_ms,
    ));
    out
}

fn format_epoch_secs(secs: u64) -> String {
    format_epoch_ms(secs * 1000)
}

fn format_epoch_ms(ms: u64) -> String {
    chrono::DateTime::from_timestamp_millis(ms as i64)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn compact_json(value: &serde_json::Value) -> String {
    let rendered = value.to_string();
    if rendered.len() <= 80 {
        return rendered;
    }
    let mut end = 79;
    while !rendered.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &rendered[..end])
}

#[cfg(test)]
#[path = "output_tests.rs"]
mod tests;
