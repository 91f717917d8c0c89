use cronhook_core::CronhookError;
use thiserror::Error;

use crate::types::TaskStatus;

/// Errors that can occur within the dispatch subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored JSON column could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The provided trigger definition is invalid or unsupported.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// The task definition failed validation (empty method, URL, ...).
    #[error("Invalid task: {0}")]
    InvalidTask(String),

    /// No task with the given ID exists in the store.
    #[error("Task not found: {id}")]
    TaskNotFound { id: String },

    /// The task was canceled; the dispatch engine must not move it again.
    #[error("Task canceled: {id}")]
    TaskCanceled { id: String },

    /// The requested transition is not allowed from the task's current status.
    #[error("Task {id} is {status}: {reason}")]
    InvalidState {
        id: String,
        status: TaskStatus,
        reason: String,
    },

    /// The outbound HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// The store connection mutex was poisoned by a panicking holder.
    #[error("Store lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

impl From<SchedulerError> for CronhookError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Database(e) => CronhookError::Database(e.to_string()),
            SchedulerError::Serialization(e) => CronhookError::Serialization(e),
            SchedulerError::InvalidSchedule(msg) => {
                CronhookError::InvalidRequest(format!("invalid schedule: {msg}"))
            }
            SchedulerError::InvalidTask(msg) => CronhookError::InvalidRequest(msg),
            SchedulerError::TaskNotFound { id } => CronhookError::TaskNotFound { id },
            e @ SchedulerError::TaskCanceled { .. } | e @ SchedulerError::InvalidState { .. } => {
                CronhookError::InvalidState {
                    reason: e.to_string(),
                }
            }
            SchedulerError::HttpClient(e) => CronhookError::Internal(e.to_string()),
            SchedulerError::LockPoisoned => CronhookError::Internal("store lock poisoned".into()),
        }
    }
}
