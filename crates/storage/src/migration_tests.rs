// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn fresh_database_reaches_current_version() {
    let mut conn = Connection::open_in_memory().unwrap();
    let version = apply(&mut conn).unwrap();
    assert_eq!(version, SCHEMA_VERSION);
    assert_eq!(current_version(&conn).unwrap(), SCHEMA_VERSION);
}

#[test]
fn apply_is_idempotent() {
    let mut conn = Connection::open_in_memory().unwrap();
    apply(&mut conn).unwrap();
    apply(&mut conn).unwrap();
    assert_eq!(current_version(&conn).unwrap(), SCHEMA_VERSION);
}

#[test]
fn migrations_are_strictly_increasing() {
    let mut previous = 0;
    for migration in MIGRATIONS {
        assert!(
            migration.version > previous,
            "migration versions must be forward-only"
        );
        previous = migration.version;
    }
    assert_eq!(previous, SCHEMA_VERSION);
}

#[test]
fn all_tables_exist_after_migration() {
    let mut conn = Connection::open_in_memory().unwrap();
    apply(&mut conn).unwrap();

    for table in ["agents", "events", "hooks", "hook_runs", "schema_version"] {
        let count: u32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1, "missing table {}", table);
    }
}
