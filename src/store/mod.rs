//! The embedded relational store: one SQLite connection per OS process,
//! with two logical namespaces — `main` (ephemeral, always in-memory) and
//! `stage1` (durable, file-backed, only attached in staged commit mode).
//!
//! Mirrors a classic `init_schema`/`apply_schema_v1` shape: pragmas
//! applied once at open, `CREATE TABLE IF NOT EXISTS` DDL, a `metadata`
//! table for a single schema-version guard.

pub mod schema;

use crate::config::{CommitMode, Config};
use crate::error::{Result, TurtlesError};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// An open store handle. Not `Send` across threads by itself (a raw
/// `rusqlite::Connection` isn't `Sync`) — callers that need to share it
/// across a thread boundary (the `mt` schedule mode) wrap it behind a
/// single-owner actor, never behind a `Mutex<Connection>` shared for
/// concurrent writers, since single-writer discipline is the whole point.
pub struct Store {
    conn: Connection,
    commit_mode: CommitMode,
    durable_path: Option<PathBuf>,
}

impl Store {
    /// Open a store for the given config, creating the durable file (in
    /// staged and direct modes alike) if it doesn't exist.
    pub fn open(config: &Config, pid: u32) -> Result<Self> {
        let durable_path = config.db_file_for_pid(pid);
        if let Some(parent) = durable_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match config.commit_mode {
            CommitMode::Staged => Self::open_staged(&durable_path),
            CommitMode::Direct => Self::open_direct(&durable_path),
        }
    }

    /// Open an existing durable file directly for read-only use by the
    /// `cluster` CLI, independent of which `commitMode` originally wrote
    /// it. Once on disk, the durable file's tables live in its own `main`
    /// schema regardless of whether the writer saw them as `main` (direct
    /// mode) or `stage1` (staged mode, attached over an in-memory `main`) —
    /// so opening it fresh with [`Self::open_direct`]'s plain-file
    /// semantics is exactly right either way.
    pub fn open_readonly(path: &Path) -> Result<Self> {
        Self::open_direct(path)
    }

    fn open_staged(durable_path: &Path) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| TurtlesError::StoreOpen {
            path: ":memory:".to_string(),
            source: e,
        })?;
        conn.execute_batch(&schema::namespace_ddl("main"))?;

        Self::attach_stage1(&conn, durable_path)?;

        Ok(Self {
            conn,
            commit_mode: CommitMode::Staged,
            durable_path: Some(durable_path.to_path_buf()),
        })
    }

    fn open_direct(durable_path: &Path) -> Result<Self> {
        let conn =
            Connection::open(durable_path).map_err(|e| TurtlesError::StoreOpen {
                path: durable_path.display().to_string(),
                source: e,
            })?;
        apply_file_pragmas(&conn)?;
        // Direct mode: `main` IS the file-backed database (no `stage1`).
        conn.execute_batch(&schema::namespace_ddl("main"))?;

        Ok(Self {
            conn,
            commit_mode: CommitMode::Direct,
            durable_path: Some(durable_path.to_path_buf()),
        })
    }

    fn attach_stage1(conn: &Connection, durable_path: &Path) -> Result<()> {
        conn.execute(
            "ATTACH DATABASE ?1 AS stage1",
            rusqlite::params![durable_path.to_string_lossy()],
        )?;
        apply_file_pragmas_on_schema(conn, "stage1")?;
        conn.execute_batch(&schema::namespace_ddl("stage1"))?;
        conn.execute_batch(schema::METADATA_DDL)?;
        ensure_schema_version(conn)?;
        Ok(())
    }

    /// Re-attach `stage1` after a close/reopen cycle (fork lifecycle).
    pub fn reattach_stage1(&mut self) -> Result<()> {
        if self.commit_mode == CommitMode::Staged {
            if let Some(path) = self.durable_path.clone() {
                Self::attach_stage1(&self.conn, &path)?;
            }
        }
        Ok(())
    }

    pub fn detach_stage1(&mut self) -> Result<()> {
        if self.commit_mode == CommitMode::Staged {
            self.conn.execute("DETACH DATABASE stage1", [])?;
        }
        Ok(())
    }

    pub fn commit_mode(&self) -> CommitMode {
        self.commit_mode
    }

    pub fn durable_path(&self) -> Option<&Path> {
        self.durable_path.as_deref()
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// In staged mode, settled data lives in `stage1`; in direct mode
    /// `main` already *is* the durable file, so there's no `stage1` to
    /// read. Callers that query settled data build their SQL against
    /// whichever namespace this returns rather than hardcoding one.
    pub fn read_namespace(&self) -> &'static str {
        match self.commit_mode {
            CommitMode::Staged => "stage1",
            CommitMode::Direct => "main",
        }
    }
}

fn apply_file_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA busy_timeout=5000;",
    )?;
    Ok(())
}

fn apply_file_pragmas_on_schema(conn: &Connection, schema_name: &str) -> Result<()> {
    conn.execute_batch(&format!(
        "PRAGMA {schema_name}.journal_mode=WAL;
         PRAGMA {schema_name}.synchronous=NORMAL;
         PRAGMA busy_timeout=5000;"
    ))?;
    Ok(())
}

fn ensure_schema_version(conn: &Connection) -> Result<()> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT CAST(value AS INTEGER) FROM stage1.metadata WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .ok();

    match existing {
        None => {
            conn.execute(
                "INSERT INTO stage1.metadata (key, value) VALUES ('schema_version', ?1)",
                rusqlite::params![schema::SCHEMA_VERSION.to_string()],
            )?;
        }
        Some(v) if v > schema::SCHEMA_VERSION => {
            return Err(TurtlesError::Configuration(format!(
                "store schema version {v} is newer than this build supports ({})",
                schema::SCHEMA_VERSION
            )));
        }
        Some(_) => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScheduleMode;

    fn test_config(dir: &Path, mode: CommitMode) -> Config {
        Config {
            enabled: true,
            commit_mode: mode,
            interval_millis: 50,
            db_path: dir.to_path_buf(),
            db_prefix: "turtles".to_string(),
            schedule_mode: ScheduleMode::Mt,
            debug: false,
            self_prefix: "turtles::".to_string(),
        }
    }

    #[test]
    fn staged_open_creates_both_namespaces() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), CommitMode::Staged);
        let store = Store::open(&config, 1).unwrap();
        let count: i64 = store
            .connection()
            .query_row("SELECT COUNT(*) FROM stage1.proc_ids", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn direct_open_has_no_stage1() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), CommitMode::Direct);
        let store = Store::open(&config, 2).unwrap();
        assert_eq!(store.read_namespace(), "main");
    }

    #[test]
    fn db_file_is_created_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), CommitMode::Staged);
        let _store = Store::open(&config, 3).unwrap();
        assert!(config.db_file_for_pid(3).exists());
    }
}
