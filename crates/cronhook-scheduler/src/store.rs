use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{Task, TaskResult, TaskStatus};

/// Persistence boundary used by the dispatch engine.
///
/// Shared by the poller and every worker, so implementations must be safe
/// for concurrent use; any serialization is the implementation's job.
pub trait TaskStore: Send + Sync {
    /// Return every task with `status = scheduled` and `next_run <= now`,
    /// atomically moving each returned task to `claimed` so that a later
    /// call cannot return it again while its execution is outstanding.
    fn fetch_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<Task>>;

    /// Set a task's status and `next_run`. Fails with `TaskCanceled` instead
    /// of overwriting a canceled task.
    fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<Task>;

    /// Append an execution record; returns its id.
    fn insert_task_result(&self, result: &TaskResult) -> Result<String>;

    /// Cancel a task. Canceled tasks are never returned as due.
    fn cancel_task(&self, id: &str) -> Result<Task>;

    /// Move every `claimed` task back to `scheduled`; returns how many moved.
    ///
    /// Claims only live as long as the in-memory queue, so any claim found at
    /// startup belongs to a process that is gone.
    fn release_claims(&self) -> Result<usize>;
}
