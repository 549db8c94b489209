// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The registry store: agents, hooks, events, and hook runs in one SQLite
//! file.
//!
//! All writes serialize through the single connection behind a mutex; reads
//! use the same connection with short statements. Durability comes from
//! `synchronous=FULL` — every committed transaction is fsync'd.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use sloth_core::{
    AgentRecord, AgentStatus, EventRecord, HookDef, HookRun, HookRunStatus, HookSource,
};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use crate::migration;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),
}

impl StoreError {
    /// Busy/locked/IO conditions are worth retrying with backoff; schema or
    /// encoding problems are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Io(_) => true,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Filter for [`RegistryStore::list_agents`].
#[derive(Debug, Default, Clone)]
pub struct AgentFilter {
    pub status: Option<AgentStatus>,
    /// Require a tag, either by key (`"gpu"`) or key=value (`"zone=eu"`).
    pub tag: Option<String>,
}

impl AgentFilter {
    fn matches_tags(&self, record: &AgentRecord) -> bool {
        let Some(tag) = &self.tag else { return true };
        match tag.split_once('=') {
            Some((key, value)) => record.tags.get(key).is_some_and(|v| v == value),
            None => record.tags.contains_key(tag.as_str()),
        }
    }
}

/// Result of opening a store: the handle plus whether corruption recovery
/// happened (the caller should emit `state.corrupted` when it did).
pub struct Opened {
    pub store: RegistryStore,
    pub recovered: bool,
}

/// Handle to the registry database.
pub struct RegistryStore {
    conn: Mutex<Connection>,
    path: PathBuf,
    schema_version: u32,
}

impl RegistryStore {
    /// Open (or create) the registry database at `path`.
    ///
    /// Runs the integrity check first; a corrupt file is rotated to a
    /// timestamped `.bak` sibling and replaced with a fresh database, so a
    /// damaged registry never blocks startup.
    pub fn open(path: &Path) -> Result<Opened, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut recovered = false;
        if path.exists() && !Self::passes_integrity_check(path) {
            let bak = rotate_bak_path(path);
            warn!(
                path = %path.display(),
                bak = %bak.display(),
                "registry database failed integrity check, rotating",
            );
            // Sidecar files must move with the main file or SQLite will
            // try to recover from a mismatched WAL.
            std::fs::rename(path, &bak)?;
            for suffix in ["-wal", "-shm"] {
                let sidecar = sibling_with_suffix(path, suffix);
                if sidecar.exists() {
                    let _ = std::fs::remove_file(&sidecar);
                }
            }
            recovered = true;
        }

        let mut conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let schema_version = migration::apply(&mut conn)?;

        Ok(Opened {
            store: Self {
                conn: Mutex::new(conn),
                path: path.to_owned(),
                schema_version,
            },
            recovered,
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let mut conn = Connection::open_in_memory()?;
        let schema_version = migration::apply(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
            schema_version,
        })
    }

    fn passes_integrity_check(path: &Path) -> bool {
        let Ok(conn) = Connection::open(path) else {
            return false;
        };
        let verdict: Result<String, _> =
            conn.query_row("PRAGMA integrity_check", [], |row| row.get(0));
        matches!(verdict.as_deref(), Ok("ok"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    // ── agents ───────────────────────────────────────────────────────────

    /// Upsert an agent record, keyed by name. `registered_at` is preserved
    /// for existing rows.
    pub fn put_agent(&self, record: &AgentRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO agents
                 (name, address, status, last_heartbeat, registered_at, updated_at,
                  tags, system_info, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(name) DO UPDATE SET
                 address = excluded.address,
                 status = excluded.status,
                 last_heartbeat = excluded.last_heartbeat,
                 updated_at = excluded.updated_at,
                 tags = excluded.tags,
                 system_info = excluded.system_info,
                 version = excluded.version",
            params![
                record.name.as_str(),
                record.address,
                record.status.as_str(),
                record.last_heartbeat,
                record.registered_at,
                record.updated_at,
                serde_json::to_string(&record.tags)?,
                serde_json::to_string(&record.system)?,
                record.version,
            ],
        )?;
        Ok(())
    }

    pub fn get_agent(&self, name: &str) -> Result<AgentRecord, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT name, address, status, last_heartbeat, registered_at, updated_at,
                    tags, system_info, version
             FROM agents WHERE name = ?1",
            [name],
            row_to_agent,
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("agent '{}'", name)))
    }

    pub fn list_agents(&self, filter: &AgentFilter) -> Result<Vec<AgentRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT name, address, status, last_heartbeat, registered_at, updated_at,
                    tags, system_info, version
             FROM agents ORDER BY name",
        )?;
        let rows = stmt.query_map([], row_to_agent)?;

        let mut agents = Vec::new();
        for row in rows {
            let record = row?;
            if let Some(status) = filter.status {
                if record.status != status {
                    continue;
                }
            }
            if !filter.matches_tags(&record) {
                continue;
            }
            agents.push(record);
        }
        Ok(agents)
    }

    /// Refresh an agent's heartbeat, marking it Active. Returns the status
    /// the agent had before the heartbeat so callers can emit transition
    /// events.
    pub fn touch_heartbeat(
        &self,
        name: &str,
        now_secs: u64,
    ) -> Result<AgentStatus, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let previous: Option<String> = tx
            .query_row("SELECT status FROM agents WHERE name = ?1", [name], |row| {
                row.get(0)
            })
            .optional()?;
        let Some(previous) = previous else {
            return Err(StoreError::NotFound(format!("agent '{}'", name)));
        };
        tx.execute(
            "UPDATE agents
             SET status = 'active', last_heartbeat = ?2, updated_at = ?2
             WHERE name = ?1",
            params![name, now_secs],
        )?;
        tx.commit()?;
        Ok(previous.parse().unwrap_or(AgentStatus::Unknown))
    }

    pub fn set_agent_status(
        &self,
        name: &str,
        status: AgentStatus,
        now_secs: u64,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE agents SET status = ?2, updated_at = ?3 WHERE name = ?1",
            params![name, status.as_str(), now_secs],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("agent '{}'", name)));
        }
        Ok(())
    }

    pub fn delete_agent(&self, name: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let deleted = conn.execute("DELETE FROM agents WHERE name = ?1", [name])?;
        Ok(deleted > 0)
    }

    /// Evict agents whose last heartbeat predates `cutoff_secs`.
    pub fn delete_agents_older_than(&self, cutoff_secs: u64) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM agents WHERE last_heartbeat < ?1",
            [cutoff_secs],
        )?;
        Ok(deleted)
    }

    // ── events ───────────────────────────────────────────────────────────

    pub fn append_event(&self, record: &EventRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO events (id, tag, timestamp_ms, data)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.id.as_str(),
                record.tag,
                record.timestamp_ms,
                serde_json::to_string(&record.data)?,
            ],
        )?;
        Ok(())
    }

    /// Most-recent-first event listing. `selector` accepts the same forms
    /// as hook selectors (`tag`, `category.*`, `*`, or `None` for all).
    pub fn list_events(
        &self,
        selector: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let conn = self.conn.lock();
        let (clause, pattern) = match selector {
            None | Some("*") => ("", String::new()),
            Some(sel) => match sel.strip_suffix(".*") {
                Some(category) => ("WHERE tag LIKE ?2", format!("{}.%", category)),
                None => ("WHERE tag = ?2", sel.to_string()),
            },
        };
        let sql = format!(
            "SELECT id, tag, timestamp_ms, data FROM events {}
             ORDER BY timestamp_ms DESC, rowid DESC LIMIT ?1",
            clause
        );
        let mut stmt = conn.prepare(&sql)?;

        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(String, String, u64, String)> {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        };
        let rows: Vec<(String, String, u64, String)> = if clause.is_empty() {
            stmt.query_map(params![limit as i64], map_row)?
                .collect::<Result<_, _>>()?
        } else {
            stmt.query_map(params![limit as i64, pattern], map_row)?
                .collect::<Result<_, _>>()?
        };

        rows.into_iter()
            .map(|(id, tag, timestamp_ms, data)| {
                Ok(EventRecord {
                    id: id.into(),
                    tag,
                    timestamp_ms,
                    data: serde_json::from_str(&data)?,
                })
            })
            .collect()
    }

    /// Highest event log sequence number (0 when the log is empty).
    ///
    /// Sequence numbers are the append order of the log; consumers keep a
    /// cursor and read forward with [`RegistryStore::events_after`].
    pub fn last_event_seq(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        Ok(conn.query_row(
            "SELECT COALESCE(MAX(rowid), 0) FROM events",
            [],
            |row| row.get(0),
        )?)
    }

    /// Events strictly after `seq`, oldest first, paired with their
    /// sequence numbers.
    pub fn events_after(
        &self,
        seq: u64,
        limit: usize,
    ) -> Result<Vec<(u64, EventRecord)>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT rowid, id, tag, timestamp_ms, data FROM events
             WHERE rowid > ?1 ORDER BY rowid LIMIT ?2",
        )?;
        let rows: Vec<(u64, String, String, u64, String)> = stmt
            .query_map(params![seq, limit as i64], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })?
            .collect::<Result<_, _>>()?;

        rows.into_iter()
            .map(|(seq, id, tag, timestamp_ms, data)| {
                Ok((
                    seq,
                    EventRecord {
                        id: id.into(),
                        tag,
                        timestamp_ms,
                        data: serde_json::from_str(&data)?,
                    },
                ))
            })
            .collect()
    }

    /// Apply the retention policy: drop events older than `cutoff_ms` and
    /// keep at most `max_count` of the rest. Returns rows deleted.
    pub fn prune_events(&self, cutoff_ms: u64, max_count: usize) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut deleted = tx.execute("DELETE FROM events WHERE timestamp_ms < ?1", [cutoff_ms])?;
        deleted += tx.execute(
            "DELETE FROM events WHERE id NOT IN
                 (SELECT id FROM events ORDER BY timestamp_ms DESC, rowid DESC LIMIT ?1)",
            [max_count as i64],
        )?;
        tx.commit()?;
        Ok(deleted)
    }

    // ── hooks ────────────────────────────────────────────────────────────

    pub fn put_hook(&self, def: &HookDef) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO hooks (name, selector, source_ref, enabled, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(name) DO UPDATE SET
                 selector = excluded.selector,
                 source_ref = excluded.source_ref,
                 enabled = excluded.enabled,
                 description = excluded.description",
            params![
                def.name.as_str(),
                def.selector,
                serde_json::to_string(&def.source)?,
                def.enabled,
                def.description,
                def.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_hook(&self, name: &str) -> Result<HookDef, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT name, selector, source_ref, enabled, description, created_at
                 FROM hooks WHERE name = ?1",
                [name],
                row_to_hook_parts,
            )
            .optional()?;
        match row {
            Some(parts) => hook_from_parts(parts),
            None => Err(StoreError::NotFound(format!("hook '{}'", name))),
        }
    }

    pub fn list_hooks(&self) -> Result<Vec<HookDef>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT name, selector, source_ref, enabled, description, created_at
             FROM hooks ORDER BY name",
        )?;
        let rows: Vec<HookParts> = stmt
            .query_map([], row_to_hook_parts)?
            .collect::<Result<_, _>>()?;
        rows.into_iter().map(hook_from_parts).collect()
    }

    pub fn delete_hook(&self, name: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let deleted = tx.execute("DELETE FROM hooks WHERE name = ?1", [name])?;
        tx.execute("DELETE FROM hook_runs WHERE hook_name = ?1", [name])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    pub fn set_hook_enabled(&self, name: &str, enabled: bool) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE hooks SET enabled = ?2 WHERE name = ?1",
            params![name, enabled],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("hook '{}'", name)));
        }
        Ok(())
    }

    /// Record one hook invocation, keeping only the most recent `keep`
    /// entries per hook.
    pub fn record_hook_run(&self, run: &HookRun, keep: usize) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO hook_runs (hook_name, started_at_ms, duration_ms, status, error)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run.hook.as_str(),
                run.started_at_ms,
                run.duration_ms,
                run.status.to_string(),
                run.error,
            ],
        )?;
        tx.execute(
            "DELETE FROM hook_runs WHERE hook_name = ?1 AND id NOT IN
                 (SELECT id FROM hook_runs WHERE hook_name = ?1 ORDER BY id DESC LIMIT ?2)",
            params![run.hook.as_str(), keep as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn list_hook_runs(&self, name: &str, limit: usize) -> Result<Vec<HookRun>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT hook_name, started_at_ms, duration_ms, status, error
             FROM hook_runs WHERE hook_name = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![name, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u64>(1)?,
                row.get::<_, u64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut runs = Vec::new();
        for row in rows {
            let (hook, started_at_ms, duration_ms, status, error) = row?;
            let status = match status.as_str() {
                "ok" => HookRunStatus::Ok,
                "timeout" => HookRunStatus::Timeout,
                _ => HookRunStatus::Failed,
            };
            runs.push(HookRun {
                hook: hook.into(),
                started_at_ms,
                duration_ms,
                status,
                error,
            });
        }
        Ok(runs)
    }
}

type HookParts = (String, String, String, bool, Option<String>, u64);

fn row_to_hook_parts(row: &rusqlite::Row<'_>) -> rusqlite::Result<HookParts> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn hook_from_parts(parts: HookParts) -> Result<HookDef, StoreError> {
    let (name, selector, source_ref, enabled, description, created_at) = parts;
    let source: HookSource = serde_json::from_str(&source_ref)?;
    Ok(HookDef {
        name: name.into(),
        selector,
        source,
        enabled,
        description,
        created_at,
    })
}

fn row_to_agent(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentRecord> {
    let name: String = row.get(0)?;
    let status: String = row.get(2)?;
    let tags: String = row.get(6)?;
    let system: String = row.get(7)?;
    Ok(AgentRecord {
        name: name.into(),
        address: row.get(1)?,
        status: status.parse().unwrap_or(AgentStatus::Unknown),
        last_heartbeat: row.get(3)?,
        registered_at: row.get(4)?,
        updated_at: row.get(5)?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        system: serde_json::from_str(&system).unwrap_or_default(),
        version: row.get(8)?,
    })
}

/// Timestamped backup path for a corrupt database file.
fn rotate_bak_path(path: &Path) -> PathBuf {
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
    sibling_with_suffix(path, &format!(".corrupt-{}.bak", stamp))
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
