use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use crate::error::Result;

/// Initialise the dispatch schema in `conn`.
///
/// Creates the `tasks` and `task_results` tables (idempotent) plus the index
/// the due-task query relies on.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tasks (
            id              TEXT    NOT NULL PRIMARY KEY,
            name            TEXT    NOT NULL,
            trigger_type    TEXT    NOT NULL,   -- 'one-off' | 'cron'
            trigger_at      TEXT,               -- one-off fire time, RFC 3339
            trigger_cron    TEXT,               -- cron expression
            action_method   TEXT    NOT NULL,
            action_url      TEXT    NOT NULL,
            action_headers  TEXT    NOT NULL DEFAULT '{}',  -- JSON object
            action_payload  TEXT,               -- JSON document or NULL
            status          TEXT    NOT NULL DEFAULT 'scheduled',
            next_run        TEXT,               -- RFC 3339 or NULL
            created_at      TEXT    NOT NULL,
            updated_at      TEXT    NOT NULL
        ) STRICT;

        -- Due-task polling: WHERE status = 'scheduled' AND next_run <= ?
        CREATE INDEX IF NOT EXISTS idx_tasks_status_next_run ON tasks (status, next_run);

        CREATE TABLE IF NOT EXISTS task_results (
            id                TEXT    NOT NULL PRIMARY KEY,
            task_id           TEXT    NOT NULL REFERENCES tasks (id),
            run_at            TEXT    NOT NULL,
            status_code       INTEGER NOT NULL,
            success           INTEGER NOT NULL,
            response_headers  TEXT,             -- JSON or NULL on transport failure
            response_body     TEXT,             -- JSON or NULL on transport failure
            error_message     TEXT,
            duration_ms       INTEGER NOT NULL,
            created_at        TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_task_results_task ON task_results (task_id, run_at);
        ",
    )?;
    Ok(())
}

/// Fixed-width UTC timestamp so that string order equals time order in SQL.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
