//! Schema DDL for the embedded store. Applied identically to `main` and,
//! in staged commit mode, to the attached `stage1` namespace.

/// Current schema version. A `stage1.metadata` row records this; opening a
/// store written by a newer build (version greater than this) is a fatal
/// configuration error. Schema evolution itself is out of scope — this is
/// only a forward-compatibility guard.
pub const SCHEMA_VERSION: i64 = 1;

/// DDL for one namespace (`main` or `stage1`), parameterized by namespace
/// name since SQLite DDL can't easily be written generically across
/// `ATTACH`ed schemas without this kind of textual templating.
pub fn namespace_ddl(namespace: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {ns}.proc_ids (
            proc_id       INTEGER NOT NULL UNIQUE,
            proc_name     TEXT NOT NULL UNIQUE,
            time_defined  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS {ns}.call_pts (
            caller_id   INTEGER NOT NULL,
            callee_id   INTEGER NOT NULL,
            trace_id    INTEGER NOT NULL,
            time_enter  INTEGER NOT NULL,
            time_leave  INTEGER,
            UNIQUE(caller_id, callee_id, trace_id, time_enter)
        );

        CREATE INDEX IF NOT EXISTS {ns}.idx_call_pts_caller_callee
            ON {ns}.call_pts(caller_id, callee_id);

        CREATE VIEW IF NOT EXISTS {ns}.calls_by_caller_callee AS
        SELECT
            COALESCE(caller.proc_name, '') AS caller_name,
            callee.proc_name AS callee_name,
            COUNT(*) AS calls,
            SUM(c.time_leave - c.time_enter) AS total_exec_micros,
            AVG(c.time_leave - c.time_enter) AS avg_exec_micros
        FROM {ns}.call_pts c
        JOIN {ns}.proc_ids callee ON callee.proc_id = c.callee_id
        LEFT JOIN {ns}.proc_ids caller ON caller.proc_id = c.caller_id
        WHERE c.time_leave IS NOT NULL
        GROUP BY caller_name, callee_name
        ORDER BY total_exec_micros DESC;

        CREATE VIEW IF NOT EXISTS {ns}.calls_by_callee AS
        SELECT
            callee.proc_name AS callee_name,
            COUNT(*) AS calls,
            SUM(c.time_leave - c.time_enter) AS total_exec_micros,
            AVG(c.time_leave - c.time_enter) AS avg_exec_micros
        FROM {ns}.call_pts c
        JOIN {ns}.proc_ids callee ON callee.proc_id = c.callee_id
        WHERE c.time_leave IS NOT NULL
        GROUP BY callee_name
        ORDER BY total_exec_micros DESC;

        CREATE VIEW IF NOT EXISTS {ns}.unused_procs AS
        SELECT p.proc_id, p.proc_name, p.time_defined
        FROM {ns}.proc_ids p
        WHERE NOT EXISTS (
            SELECT 1 FROM {ns}.call_pts c
            WHERE c.callee_id = p.proc_id AND c.time_leave IS NOT NULL
        );
        "#,
        ns = namespace
    )
}

/// DDL for the `metadata` table, created only in `stage1` (it tracks the
/// durable schema version; `main` is ephemeral and carries no version of
/// its own).
pub const METADATA_DDL: &str = r#"
    CREATE TABLE IF NOT EXISTS stage1.metadata (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
"#;
