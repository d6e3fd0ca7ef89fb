//! The transfer of settled call records from `main` to `stage1`. Runs on
//! whichever recorder actor owns the store — never as a separate actor of
//! its own, so it can never race the writer it shares a connection with.

use crate::error::Result;
use crate::store::Store;
use rusqlite::params;

/// Run one finalize pass: copy newly-defined procedures and newly-settled
/// calls from `main` into `stage1`, then drop the copied call rows from
/// `main`. A no-op in direct mode (there is no `stage1` to copy into).
///
/// Novelty is judged against `stage1`'s own high-water mark rather than a
/// separately tracked cursor, so a finalizer that restarts mid-stream (or
/// after a crash) simply recomputes where it left off.
pub fn finalize_once(store: &Store) -> Result<()> {
    if store.commit_mode() != crate::config::CommitMode::Staged {
        return Ok(());
    }
    let conn = store.connection();

    let last_finalize: i64 = conn.query_row(
        "SELECT MAX(
            COALESCE((SELECT MAX(time_defined) FROM stage1.proc_ids), 0),
            COALESCE((SELECT MAX(time_leave) FROM stage1.call_pts), 0)
         )",
        [],
        |row| row.get(0),
    )?;
    let t_cut = now_micros();

    conn.execute("BEGIN IMMEDIATE", [])?;
    let result = (|| -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO stage1.proc_ids (proc_id, proc_name, time_defined)
             SELECT proc_id, proc_name, time_defined FROM main.proc_ids
             WHERE time_defined > ?1",
            params![last_finalize],
        )?;

        conn.execute(
            "INSERT OR IGNORE INTO stage1.call_pts
                (caller_id, callee_id, trace_id, time_enter, time_leave)
             SELECT caller_id, callee_id, trace_id, time_enter, time_leave
             FROM main.call_pts
             WHERE time_leave IS NOT NULL AND time_leave < ?1",
            params![t_cut],
        )?;

        conn.execute(
            "DELETE FROM main.call_pts
             WHERE time_leave IS NOT NULL AND time_leave < ?1",
            params![t_cut],
        )?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            conn.execute("COMMIT", [])?;
            Ok(())
        }
        Err(e) => {
            let _ = conn.execute("ROLLBACK", []);
            Err(e)
        }
    }
}

/// Shutdown variant: finalize normally, then sweep every remaining
/// `main.call_pts` row regardless of settlement, so an orderly shutdown
/// never loses an in-flight call. Only a crash-kill loses unsettled rows.
pub fn finalize_on_shutdown(store: &Store) -> Result<()> {
    finalize_once(store)?;
    if store.commit_mode() != crate::config::CommitMode::Staged {
        return Ok(());
    }
    let conn = store.connection();
    conn.execute("BEGIN IMMEDIATE", [])?;
    let result = (|| -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO stage1.call_pts
                (caller_id, callee_id, trace_id, time_enter, time_leave)
             SELECT caller_id, callee_id, trace_id, time_enter, time_leave
             FROM main.call_pts",
            [],
        )?;
        conn.execute("DELETE FROM main.call_pts", [])?;
        Ok(())
    })();
    match result {
        Ok(()) => {
            conn.execute("COMMIT", [])?;
            Ok(())
        }
        Err(e) => {
            let _ = conn.execute("ROLLBACK", []);
            Err(e)
        }
    }
}

fn now_micros() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CommitMode, Config, ScheduleMode};

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            enabled: true,
            commit_mode: CommitMode::Staged,
            interval_millis: 50,
            db_path: dir.to_path_buf(),
            db_prefix: "turtles".to_string(),
            schedule_mode: ScheduleMode::Mt,
            debug: false,
            self_prefix: "turtles::".to_string(),
        }
    }

    #[test]
    fn finalize_moves_settled_calls_only() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = Store::open(&config, 10).unwrap();
        let conn = store.connection();

        conn.execute(
            "INSERT INTO main.proc_ids (proc_id, proc_name, time_defined) VALUES (1, 'a', 1), (2, 'b', 1)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO main.call_pts (caller_id, callee_id, trace_id, time_enter, time_leave)
             VALUES (1, 2, 100, 1, 5), (1, 2, 101, 6, NULL)",
            [],
        )
        .unwrap();

        finalize_once(&store).unwrap();

        let settled: i64 = conn
            .query_row("SELECT COUNT(*) FROM stage1.call_pts", [], |r| r.get(0))
            .unwrap();
        assert_eq!(settled, 1);

        let remaining_in_main: i64 = conn
            .query_row("SELECT COUNT(*) FROM main.call_pts", [], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining_in_main, 1);
    }

    #[test]
    fn finalize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = Store::open(&config, 11).unwrap();
        let conn = store.connection();
        conn.execute(
            "INSERT INTO main.proc_ids (proc_id, proc_name, time_defined) VALUES (1, 'a', 1), (2, 'b', 1)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO main.call_pts (caller_id, callee_id, trace_id, time_enter, time_leave)
             VALUES (1, 2, 100, 1, 5)",
            [],
        )
        .unwrap();

        finalize_once(&store).unwrap();
        finalize_once(&store).unwrap();

        let settled: i64 = conn
            .query_row("SELECT COUNT(*) FROM stage1.call_pts", [], |r| r.get(0))
            .unwrap();
        assert_eq!(settled, 1);
    }

    #[test]
    fn shutdown_flushes_unsettled() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = Store::open(&config, 12).unwrap();
        let conn = store.connection();
        conn.execute(
            "INSERT INTO main.proc_ids (proc_id, proc_name, time_defined) VALUES (1, 'a', 1), (2, 'b', 1)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO main.call_pts (caller_id, callee_id, trace_id, time_enter, time_leave)
             VALUES (1, 2, 100, 1, NULL)",
            [],
        )
        .unwrap();

        finalize_on_shutdown(&store).unwrap();

        let in_stage1: i64 = conn
            .query_row("SELECT COUNT(*) FROM stage1.call_pts", [], |r| r.get(0))
            .unwrap();
        assert_eq!(in_stage1, 1);
        let in_main: i64 = conn
            .query_row("SELECT COUNT(*) FROM main.call_pts", [], |r| r.get(0))
            .unwrap();
        assert_eq!(in_main, 0);
    }
}
