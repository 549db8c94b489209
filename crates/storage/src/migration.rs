// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Forward-only schema migrations.
//!
//! Each migration is a version number and the SQL that takes the schema
//! from `version - 1` to `version`. Applied in order at open time inside a
//! transaction, with progress recorded in `schema_version`. There is no
//! downgrade path.

use rusqlite::Connection;

/// One schema step.
pub struct Migration {
    pub version: u32,
    pub sql: &'static str,
}

/// The version a freshly migrated database ends up at.
pub const SCHEMA_VERSION: u32 = 2;

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: "
            CREATE TABLE agents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                address TEXT NOT NULL,
                status TEXT NOT NULL,
                last_heartbeat INTEGER NOT NULL,
                registered_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                tags TEXT NOT NULL DEFAULT '{}',
                system_info TEXT NOT NULL DEFAULT '{}',
                version TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE events (
                id TEXT PRIMARY KEY,
                tag TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX idx_events_tag ON events(tag);
            CREATE INDEX idx_events_timestamp ON events(timestamp_ms);
        ",
    },
    Migration {
        version: 2,
        sql: "
            CREATE TABLE hooks (
                name TEXT PRIMARY KEY,
                selector TEXT NOT NULL,
                source_ref TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                description TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE hook_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                hook_name TEXT NOT NULL,
                started_at_ms INTEGER NOT NULL,
                duration_ms INTEGER NOT NULL,
                status TEXT NOT NULL,
                error TEXT
            );
            CREATE INDEX idx_hook_runs_hook ON hook_runs(hook_name, id);
        ",
    },
];

/// Apply any pending migrations. Returns the resulting schema version.
pub(crate) fn apply(conn: &mut Connection) -> Result<u32, rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
    )?;

    let current: u32 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
            row.get(0)
        })?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [migration.version],
        )?;
        tx.commit()?;
        tracing::info!(version = migration.version, "applied schema migration");
    }

    Ok(SCHEMA_VERSION.max(current))
}

/// Read the current schema version without migrating.
pub(crate) fn current_version(conn: &Connection) -> Result<u32, rusqlite::Error> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
        row.get(0)
    })
}

#[cfg(test)]
#[path = "migration_tests.rs"]
mod tests;
