use thiserror::Error;

#[derive(Debug, Error)]
pub enum CronhookError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Task not found: {id}")]
    TaskNotFound { id: String },

    #[error("Invalid task state: {reason}")]
    InvalidState { reason: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CronhookError {
    /// Short error code string sent to API clients alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            CronhookError::Config(_) => "CONFIG_ERROR",
            CronhookError::InvalidRequest(_) => "INVALID_REQUEST",
            CronhookError::TaskNotFound { .. } => "TASK_NOT_FOUND",
            CronhookError::InvalidState { .. } => "INVALID_STATE",
            CronhookError::Database(_) => "DATABASE_ERROR",
            CronhookError::Serialization(_) => "SERIALIZATION_ERROR",
            CronhookError::Io(_) => "IO_ERROR",
            CronhookError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CronhookError>;
