use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::schedule::compute_next_run;
use crate::store::TaskStore;
use crate::types::{CallbackOutcome, Execution, Task, TaskResult, TaskStatus, Trigger};

/// Persists an execution and advances the task that produced it.
pub struct ResultRecorder {
    store: Arc<dyn TaskStore>,
}

impl ResultRecorder {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// Insert the result, then move the task on.
    ///
    /// One-off tasks complete whatever the outcome; cron tasks go back to
    /// `scheduled` at their next occurrence after the execution started. When
    /// the insert fails nothing else is written. When the status update fails
    /// the result is already stored and the claim is released with the old
    /// `next_run`, so a later poll runs the task again.
    pub fn record(&self, task: &Task, execution: &Execution, now: DateTime<Utc>) -> Result<TaskResult> {
        let result = build_result(task, execution, now);
        self.store.insert_task_result(&result)?;

        let (status, next_run) = advance(task, execution.run_at);
        match self.store.update_task_status(&task.id, status, next_run) {
            Ok(_) => {
                info!(
                    task_id = %task.id,
                    status_code = result.status_code,
                    success = result.success,
                    next_status = %status,
                    "execution recorded"
                );
            }
            Err(SchedulerError::TaskCanceled { .. }) => {
                info!(task_id = %task.id, "task canceled while in flight; result kept");
            }
            Err(e) => {
                error!(task_id = %task.id, result_id = %result.id, "result stored but status update failed: {e}");
                match self
                    .store
                    .update_task_status(&task.id, TaskStatus::Scheduled, task.next_run)
                {
                    Ok(_) => warn!(task_id = %task.id, "claim released; task will run again"),
                    Err(release) => {
                        error!(task_id = %task.id, "claim release failed, task stays claimed: {release}")
                    }
                }
                return Err(e);
            }
        }
        Ok(result)
    }
}

fn build_result(task: &Task, execution: &Execution, now: DateTime<Utc>) -> TaskResult {
    let (response_headers, response_body, error_message) = match &execution.outcome {
        CallbackOutcome::Response { headers, body, .. } => {
            (Some(headers.clone()), Some(body.clone()), None)
        }
        CallbackOutcome::Failed { error } => (None, None, Some(error.clone())),
    };
    TaskResult {
        id: Uuid::new_v4().to_string(),
        task_id: task.id.clone(),
        run_at: execution.run_at,
        status_code: execution.status_code(),
        success: execution.is_success(),
        response_headers,
        response_body,
        error_message,
        duration_ms: execution.duration_ms,
        created_at: now,
    }
}

/// Status and `next_run` a task moves to after an attempt started at `run_at`.
fn advance(task: &Task, run_at: DateTime<Utc>) -> (TaskStatus, Option<DateTime<Utc>>) {
    match &task.trigger {
        Trigger::OneOff { .. } => (TaskStatus::Completed, None),
        Trigger::Cron { expression } => match compute_next_run(&task.trigger, run_at) {
            Ok(Some(next)) => (TaskStatus::Scheduled, Some(next)),
            Ok(None) => {
                warn!(task_id = %task.id, cron = %expression, "cron schedule exhausted; completing task");
                (TaskStatus::Completed, None)
            }
            Err(e) => {
                warn!(task_id = %task.id, cron = %expression, "cron expression unusable, completing task: {e}");
                (TaskStatus::Completed, None)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::TaskManager;
    use crate::test_support::{memory_store, one_off, webhook};
    use crate::types::NewTask;
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use std::sync::Mutex;

    fn response(code: u16) -> Execution {
        Execution {
            run_at: Utc::now(),
            duration_ms: 7,
            outcome: CallbackOutcome::Response {
                status_code: code,
                headers: json!({"content-type": ["application/json"]}),
                body: json!({"ok": code < 300}),
            },
        }
    }

    fn claim(store: &TaskManager, id: &str) -> Task {
        let due = store.fetch_due_tasks(Utc::now() + Duration::days(400)).unwrap();
        due.into_iter().find(|t| t.id == id).unwrap()
    }

    #[test]
    fn one_off_completes_even_on_failure() {
        let store = Arc::new(memory_store());
        let recorder = ResultRecorder::new(store.clone());
        let created = store.create_task(one_off("once", Utc::now())).unwrap();
        let task = claim(&store, &created.id);

        let failed = Execution {
            run_at: Utc::now(),
            duration_ms: 3,
            outcome: CallbackOutcome::Failed {
                error: "connection refused".into(),
            },
        };
        let result = recorder.record(&task, &failed, Utc::now()).unwrap();
        assert_eq!(result.status_code, 0);
        assert!(!result.success);
        assert!(result.response_body.is_none());
        assert_eq!(result.error_message.as_deref(), Some("connection refused"));

        let stored = store.get_task(&task.id).unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert!(stored.next_run.is_none());
        assert_eq!(store.list_task_results(&task.id).unwrap().len(), 1);
    }

    #[test]
    fn cron_task_moves_to_next_occurrence() {
        let store = Arc::new(memory_store());
        let recorder = ResultRecorder::new(store.clone());
        let created = store
            .create_task(NewTask {
                name: "daily".into(),
                trigger: Trigger::Cron {
                    expression: "0 8 * * *".into(),
                },
                action: webhook("http://example.test"),
            })
            .unwrap();
        let task = claim(&store, &created.id);

        let now = Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 3).unwrap();
        let execution = Execution {
            run_at: Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 1).unwrap(),
            ..response(200)
        };
        let result = recorder.record(&task, &execution, now).unwrap();
        assert!(result.success);
        assert_eq!(result.created_at, now);

        let stored = store.get_task(&task.id).unwrap();
        assert_eq!(stored.status, TaskStatus::Scheduled);
        assert_eq!(
            stored.next_run,
            Some(Utc.with_ymd_and_hms(2026, 5, 2, 8, 0, 0).unwrap())
        );
    }

    #[test]
    fn slow_callback_does_not_skip_an_occurrence() {
        let store = Arc::new(memory_store());
        let recorder = ResultRecorder::new(store.clone());
        let created = store
            .create_task(NewTask {
                name: "minutely".into(),
                trigger: Trigger::Cron {
                    expression: "* * * * *".into(),
                },
                action: webhook("http://example.test"),
            })
            .unwrap();
        let task = claim(&store, &created.id);

        let started = Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap() + Duration::milliseconds(500);
        let execution = Execution {
            run_at: started,
            duration_ms: 70_000,
            ..response(200)
        };
        let finished = Utc.with_ymd_and_hms(2026, 5, 1, 8, 1, 10).unwrap();
        recorder.record(&task, &execution, finished).unwrap();

        let stored = store.get_task(&task.id).unwrap();
        assert_eq!(stored.status, TaskStatus::Scheduled);
        assert_eq!(
            stored.next_run,
            Some(Utc.with_ymd_and_hms(2026, 5, 1, 8, 1, 0).unwrap())
        );
    }

    #[test]
    fn cancel_during_flight_is_preserved() {
        let store = Arc::new(memory_store());
        let recorder = ResultRecorder::new(store.clone());
        let created = store
            .create_task(NewTask {
                name: "minutely".into(),
                trigger: Trigger::Cron {
                    expression: "* * * * *".into(),
                },
                action: webhook("http://example.test"),
            })
            .unwrap();
        let task = claim(&store, &created.id);
        store.cancel_task(&task.id).unwrap();

        recorder.record(&task, &response(204), Utc::now()).unwrap();
        let stored = store.get_task(&task.id).unwrap();
        assert_eq!(stored.status, TaskStatus::Canceled);
        assert!(stored.next_run.is_none());
        assert_eq!(store.list_task_results(&task.id).unwrap().len(), 1);
    }

    #[test]
    fn unusable_cron_completes_task() {
        let task = crate::test_support::claimed_task(
            "broken",
            Trigger::Cron {
                expression: "61 * * * *".into(),
            },
        );
        assert_eq!(advance(&task, Utc::now()), (TaskStatus::Completed, None));
    }

    /// Store whose result insert always fails; records every status update.
    #[derive(Default)]
    struct FailingInsert {
        updates: Mutex<Vec<String>>,
    }

    impl TaskStore for FailingInsert {
        fn fetch_due_tasks(&self, _now: DateTime<Utc>) -> Result<Vec<Task>> {
            Ok(Vec::new())
        }
        fn update_task_status(
            &self,
            id: &str,
            _status: TaskStatus,
            _next_run: Option<DateTime<Utc>>,
        ) -> Result<Task> {
            self.updates.lock().unwrap().push(id.to_string());
            Err(SchedulerError::TaskNotFound { id: id.to_string() })
        }
        fn insert_task_result(&self, _result: &TaskResult) -> Result<String> {
            Err(SchedulerError::LockPoisoned)
        }
        fn cancel_task(&self, id: &str) -> Result<Task> {
            Err(SchedulerError::TaskNotFound { id: id.to_string() })
        }
        fn release_claims(&self) -> Result<usize> {
            Ok(0)
        }
    }

    #[test]
    fn failed_insert_skips_status_update() {
        let store = Arc::new(FailingInsert::default());
        let recorder = ResultRecorder::new(store.clone());
        let task = crate::test_support::claimed_task("x", Trigger::OneOff { fire_at: Utc::now() });

        assert!(recorder.record(&task, &response(200), Utc::now()).is_err());
        assert!(store.updates.lock().unwrap().is_empty());
    }

    /// Real store whose first status update fails.
    struct FlakyStatus {
        inner: TaskManager,
        failed: std::sync::atomic::AtomicBool,
    }

    impl TaskStore for FlakyStatus {
        fn fetch_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<Task>> {
            self.inner.fetch_due_tasks(now)
        }
        fn update_task_status(
            &self,
            id: &str,
            status: TaskStatus,
            next_run: Option<DateTime<Utc>>,
        ) -> Result<Task> {
            if !self.failed.swap(true, std::sync::atomic::Ordering::SeqCst) {
                return Err(SchedulerError::LockPoisoned);
            }
            self.inner.update_task_status(id, status, next_run)
        }
        fn insert_task_result(&self, result: &TaskResult) -> Result<String> {
            self.inner.insert_task_result(result)
        }
        fn cancel_task(&self, id: &str) -> Result<Task> {
            self.inner.cancel_task(id)
        }
        fn release_claims(&self) -> Result<usize> {
            self.inner.release_claims()
        }
    }

    #[test]
    fn failed_status_update_releases_the_claim() {
        let store = Arc::new(FlakyStatus {
            inner: memory_store(),
            failed: Default::default(),
        });
        let recorder = ResultRecorder::new(store.clone());
        let created = store
            .inner
            .create_task(NewTask {
                name: "minutely".into(),
                trigger: Trigger::Cron {
                    expression: "* * * * *".into(),
                },
                action: webhook("http://example.test"),
            })
            .unwrap();
        let task = claim(&store.inner, &created.id);
        assert_eq!(store.inner.get_task(&task.id).unwrap().status, TaskStatus::Claimed);

        assert!(recorder.record(&task, &response(500), Utc::now()).is_err());

        let stored = store.inner.get_task(&task.id).unwrap();
        assert_eq!(stored.status, TaskStatus::Scheduled);
        assert_eq!(stored.next_run, task.next_run);
        assert_eq!(store.inner.list_task_results(&task.id).unwrap().len(), 1);

        let again = store.fetch_due_tasks(Utc::now() + Duration::days(400)).unwrap();
        assert!(again.iter().any(|t| t.id == task.id));
    }
}
