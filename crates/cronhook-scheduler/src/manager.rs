use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{types::Type, Connection, OptionalExtension};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::db::{fmt_ts, init_db, parse_ts};
use crate::error::{Result, SchedulerError};
use crate::schedule::compute_next_run;
use crate::store::TaskStore;
use crate::types::{Action, NewTask, Task, TaskResult, TaskStatus, TaskUpdate, Trigger};

const TASK_COLUMNS: &str = "id, name, trigger_type, trigger_at, trigger_cron, action_method, \
     action_url, action_headers, action_payload, status, next_run, created_at, updated_at";

const RESULT_COLUMNS: &str = "id, task_id, run_at, status_code, success, response_headers, \
     response_body, error_message, duration_ms, created_at";

const DEFAULT_PAGE_SIZE: u32 = 10;
const MAX_PAGE_SIZE: u32 = 100;

/// Filter and pagination for [`TaskManager::list_tasks`].
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    /// 1-based page number; 0 is treated as 1.
    pub page: u32,
    /// Page size; 0 means the default (10), capped at 100.
    pub size: u32,
}

impl TaskFilter {
    fn limit_offset(&self) -> (i64, i64) {
        let size = match self.size {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        };
        let page = self.page.max(1);
        (size as i64, ((page - 1) as i64) * size as i64)
    }
}

/// SQLite-backed task store.
///
/// Serves both the dispatch engine (through [`TaskStore`]) and the management
/// API. Wraps a single connection in a `Mutex`, which also makes the due-task
/// claim atomic with respect to every other operation.
pub struct TaskManager {
    db: Mutex<Connection>,
}

impl TaskManager {
    /// Wrap an open connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| SchedulerError::LockPoisoned)
    }

    /// Create a task in `scheduled` status with `next_run` derived from its trigger.
    #[instrument(skip(self, new), fields(name = %new.name))]
    pub fn create_task(&self, new: NewTask) -> Result<Task> {
        validate_action(&new.action)?;
        let now = Utc::now();
        let next_run = initial_next_run(&new.trigger, now)?;

        let task = Task {
            id: Uuid::new_v4().to_string(),
            name: new.name,
            trigger: new.trigger,
            action: new.action,
            status: TaskStatus::Scheduled,
            next_run: Some(next_run),
            created_at: now,
            updated_at: now,
        };

        let (trigger_at, trigger_cron) = trigger_columns(&task.trigger);
        let headers = serde_json::to_string(&task.action.headers)?;
        let payload = task.action.payload.as_ref().map(Value::to_string);

        let db = self.conn()?;
        db.execute(
            "INSERT INTO tasks
             (id, name, trigger_type, trigger_at, trigger_cron, action_method, action_url,
              action_headers, action_payload, status, next_run, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'scheduled', ?10, ?11, ?11)",
            rusqlite::params![
                task.id,
                task.name,
                task.trigger.kind(),
                trigger_at,
                trigger_cron,
                task.action.method,
                task.action.url,
                headers,
                payload,
                fmt_ts(next_run),
                fmt_ts(now),
            ],
        )?;

        info!(task_id = %task.id, trigger = task.trigger.kind(), next_run = %next_run, "task created");
        Ok(task)
    }

    pub fn get_task(&self, id: &str) -> Result<Task> {
        let db = self.conn()?;
        load_task(&db, id)
    }

    /// Tasks ordered newest first.
    pub fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let (limit, offset) = filter.limit_offset();
        let status = filter.status.map(|s| s.as_str());
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY created_at DESC, id
             LIMIT ?2 OFFSET ?3"
        ))?;
        let tasks = stmt
            .query_map(rusqlite::params![status, limit, offset], row_to_task)?
            .filter_map(|r| skip_undecodable(r, "task"))
            .collect();
        Ok(tasks)
    }

    /// Apply a partial update.
    ///
    /// A new trigger recomputes `next_run` for scheduled tasks. Claimed tasks
    /// are executing and cannot be edited until the attempt is recorded.
    #[instrument(skip(self, update))]
    pub fn update_task(&self, id: &str, update: TaskUpdate) -> Result<Task> {
        let db = self.conn()?;
        let mut task = load_task(&db, id)?;
        if task.status == TaskStatus::Claimed {
            return Err(SchedulerError::InvalidState {
                id: task.id,
                status: TaskStatus::Claimed,
                reason: "an execution is in flight".to_string(),
            });
        }

        let now = Utc::now();
        if let Some(name) = update.name {
            task.name = name;
        }
        if let Some(trigger) = update.trigger {
            let next_run = initial_next_run(&trigger, now)?;
            if task.status == TaskStatus::Scheduled {
                task.next_run = Some(next_run);
            }
            task.trigger = trigger;
        }
        if let Some(action) = update.action {
            if let Some(method) = action.method.filter(|m| !m.is_empty()) {
                task.action.method = method;
            }
            if let Some(url) = action.url.filter(|u| !u.is_empty()) {
                task.action.url = url;
            }
            if let Some(headers) = action.headers {
                task.action.headers = headers;
            }
            if let Some(payload) = action.payload {
                task.action.payload = Some(payload);
            }
        }
        validate_action(&task.action)?;
        task.updated_at = now;

        let (trigger_at, trigger_cron) = trigger_columns(&task.trigger);
        let headers = serde_json::to_string(&task.action.headers)?;
        let payload = task.action.payload.as_ref().map(Value::to_string);
        db.execute(
            "UPDATE tasks SET name = ?1, trigger_type = ?2, trigger_at = ?3, trigger_cron = ?4,
                    action_method = ?5, action_url = ?6, action_headers = ?7,
                    action_payload = ?8, next_run = ?9, updated_at = ?10
             WHERE id = ?11",
            rusqlite::params![
                task.name,
                task.trigger.kind(),
                trigger_at,
                trigger_cron,
                task.action.method,
                task.action.url,
                headers,
                payload,
                task.next_run.map(fmt_ts),
                fmt_ts(now),
                task.id,
            ],
        )?;

        info!(task_id = %task.id, "task updated");
        Ok(task)
    }

    /// Execution history of one task, newest first.
    pub fn list_task_results(&self, task_id: &str) -> Result<Vec<TaskResult>> {
        let db = self.conn()?;
        // Distinguish "no results yet" from "no such task".
        load_task(&db, task_id)?;
        let mut stmt = db.prepare(&format!(
            "SELECT {RESULT_COLUMNS} FROM task_results
             WHERE task_id = ?1
             ORDER BY run_at DESC, created_at DESC"
        ))?;
        let results = stmt
            .query_map([task_id], row_to_result)?
            .filter_map(|r| skip_undecodable(r, "task result"))
            .collect();
        Ok(results)
    }

    /// Every execution record, newest first.
    pub fn list_all_results(&self) -> Result<Vec<TaskResult>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {RESULT_COLUMNS} FROM task_results ORDER BY run_at DESC, created_at DESC"
        ))?;
        let results = stmt
            .query_map([], row_to_result)?
            .filter_map(|r| skip_undecodable(r, "task result"))
            .collect();
        Ok(results)
    }
}

impl TaskStore for TaskManager {
    fn fetch_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        let now_str = fmt_ts(now);

        // Collect inside the block so `stmt` is dropped before the UPDATEs.
        // The id is read on its own so a row whose other columns fail to
        // decode can still be settled.
        let due: Vec<(String, rusqlite::Result<Task>)> = {
            let mut stmt = tx.prepare_cached(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                 WHERE status = 'scheduled' AND next_run IS NOT NULL AND next_run <= ?1
                 ORDER BY next_run, created_at"
            ))?;
            let rows: Vec<_> = stmt
                .query_map([&now_str], |row| Ok((row.get::<_, String>(0)?, row_to_task(row))))?
                .filter_map(|r| skip_undecodable(r, "due task"))
                .collect();
            rows
        };

        let stamp = Utc::now();
        let mut claimed = Vec::with_capacity(due.len());
        for (id, decoded) in due {
            match decoded {
                Ok(mut task) => {
                    tx.execute(
                        "UPDATE tasks SET status = 'claimed', updated_at = ?1 WHERE id = ?2",
                        rusqlite::params![fmt_ts(stamp), id],
                    )?;
                    task.status = TaskStatus::Claimed;
                    task.updated_at = stamp;
                    claimed.push(task);
                }
                Err(e) => {
                    // The stored action cannot produce a request: record the
                    // failed attempt and retire the task.
                    error!(task_id = %id, "stored task is unreadable, completing it: {e}");
                    let failure = format!("invalid stored task: {e}");
                    tx.execute(
                        &format!(
                            "INSERT INTO task_results ({RESULT_COLUMNS})
                             VALUES (?1, ?2, ?3, 0, 0, NULL, NULL, ?4, 0, ?3)"
                        ),
                        rusqlite::params![Uuid::new_v4().to_string(), id, fmt_ts(stamp), failure],
                    )?;
                    tx.execute(
                        "UPDATE tasks SET status = 'completed', next_run = NULL, updated_at = ?1
                         WHERE id = ?2",
                        rusqlite::params![fmt_ts(stamp), id],
                    )?;
                }
            }
        }
        tx.commit()?;

        if !claimed.is_empty() {
            debug!(count = claimed.len(), "claimed due tasks");
        }
        Ok(claimed)
    }

    fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<Task> {
        let db = self.conn()?;
        let n = db.execute(
            "UPDATE tasks SET status = ?1, next_run = ?2, updated_at = ?3
             WHERE id = ?4 AND status <> 'canceled'",
            rusqlite::params![
                status.as_str(),
                next_run.map(fmt_ts),
                fmt_ts(Utc::now()),
                id
            ],
        )?;
        if n == 0 {
            // Either missing (load_task reports it) or canceled.
            load_task(&db, id)?;
            return Err(SchedulerError::TaskCanceled { id: id.to_string() });
        }
        load_task(&db, id)
    }

    fn insert_task_result(&self, result: &TaskResult) -> Result<String> {
        let headers = result
            .response_headers
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let body = result
            .response_body
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let db = self.conn()?;
        db.execute(
            &format!(
                "INSERT INTO task_results ({RESULT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            rusqlite::params![
                result.id,
                result.task_id,
                fmt_ts(result.run_at),
                result.status_code as i64,
                result.success,
                headers,
                body,
                result.error_message,
                result.duration_ms as i64,
                fmt_ts(result.created_at),
            ],
        )?;
        Ok(result.id.clone())
    }

    fn cancel_task(&self, id: &str) -> Result<Task> {
        let db = self.conn()?;
        let task = load_task(&db, id)?;
        match task.status {
            TaskStatus::Canceled => return Ok(task),
            TaskStatus::Completed => {
                return Err(SchedulerError::InvalidState {
                    id: task.id,
                    status: TaskStatus::Completed,
                    reason: "completed tasks cannot be canceled".to_string(),
                });
            }
            TaskStatus::Claimed => {
                warn!(task_id = %id, "canceling a task whose execution is in flight");
            }
            TaskStatus::Scheduled => {}
        }
        db.execute(
            "UPDATE tasks SET status = 'canceled', next_run = NULL, updated_at = ?1 WHERE id = ?2",
            rusqlite::params![fmt_ts(Utc::now()), id],
        )?;
        info!(task_id = %id, "task canceled");
        load_task(&db, id)
    }

    fn release_claims(&self) -> Result<usize> {
        let db = self.conn()?;
        let n = db.execute(
            "UPDATE tasks SET status = 'scheduled', updated_at = ?1 WHERE status = 'claimed'",
            [fmt_ts(Utc::now())],
        )?;
        Ok(n)
    }
}

/// Log and drop a row that failed to map.
fn skip_undecodable<T>(row: rusqlite::Result<T>, what: &str) -> Option<T> {
    match row {
        Ok(value) => Some(value),
        Err(e) => {
            error!("skipping undecodable {what} row: {e}");
            None
        }
    }
}

fn load_task(conn: &Connection, id: &str) -> Result<Task> {
    conn.query_row(
        &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
        [id],
        row_to_task,
    )
    .optional()?
    .ok_or_else(|| SchedulerError::TaskNotFound { id: id.to_string() })
}

/// `next_run` for a freshly created or re-triggered task.
fn initial_next_run(trigger: &Trigger, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    compute_next_run(trigger, now)?.ok_or_else(|| {
        SchedulerError::InvalidSchedule("cron expression never fires".to_string())
    })
}

fn validate_action(action: &Action) -> Result<()> {
    if action.method.trim().is_empty() {
        return Err(SchedulerError::InvalidTask("action.method is required".into()));
    }
    if action.url.trim().is_empty() {
        return Err(SchedulerError::InvalidTask("action.url is required".into()));
    }
    Ok(())
}

fn trigger_columns(trigger: &Trigger) -> (Option<String>, Option<String>) {
    match trigger {
        Trigger::OneOff { fire_at } => (Some(fmt_ts(*fire_at)), None),
        Trigger::Cron { expression } => (None, Some(expression.clone())),
    }
}

fn conversion_err(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn ts_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).ok_or_else(|| conversion_err(idx, format!("bad timestamp '{raw}'")))
}

fn opt_ts_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => parse_ts(&raw)
            .map(Some)
            .ok_or_else(|| conversion_err(idx, format!("bad timestamp '{raw}'"))),
        None => Ok(None),
    }
}

fn opt_json_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<Value>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| conversion_err(idx, e.to_string())),
        None => Ok(None),
    }
}

/// Map a SQLite row (in `TASK_COLUMNS` order) to a `Task`.
fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let trigger_type: String = row.get(2)?;
    let trigger = match trigger_type.as_str() {
        "one-off" => Trigger::OneOff {
            fire_at: opt_ts_column(row, 3)?
                .ok_or_else(|| conversion_err(3, "one-off task without fire time".into()))?,
        },
        "cron" => Trigger::Cron {
            expression: row
                .get::<_, Option<String>>(4)?
                .ok_or_else(|| conversion_err(4, "cron task without expression".into()))?,
        },
        other => return Err(conversion_err(2, format!("unknown trigger type '{other}'"))),
    };

    let headers_raw: String = row.get(7)?;
    let headers: BTreeMap<String, String> =
        serde_json::from_str(&headers_raw).map_err(|e| conversion_err(7, e.to_string()))?;

    let status_raw: String = row.get(9)?;
    let status = status_raw
        .parse::<TaskStatus>()
        .map_err(|e| conversion_err(9, e))?;

    Ok(Task {
        id: row.get(0)?,
        name: row.get(1)?,
        trigger,
        action: Action {
            method: row.get(5)?,
            url: row.get(6)?,
            headers,
            payload: opt_json_column(row, 8)?,
        },
        status,
        next_run: opt_ts_column(row, 10)?,
        created_at: ts_column(row, 11)?,
        updated_at: ts_column(row, 12)?,
    })
}

/// Map a SQLite row (in `RESULT_COLUMNS` order) to a `TaskResult`.
fn row_to_result(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskResult> {
    Ok(TaskResult {
        id: row.get(0)?,
        task_id: row.get(1)?,
        run_at: ts_column(row, 2)?,
        status_code: row.get::<_, i64>(3)? as u16,
        success: row.get(4)?,
        response_headers: opt_json_column(row, 5)?,
        response_body: opt_json_column(row, 6)?,
        error_message: row.get(7)?,
        duration_ms: row.get::<_, i64>(8)?.max(0) as u64,
        created_at: ts_column(row, 9)?,
    })
}
