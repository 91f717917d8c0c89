use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// When a task fires.
///
/// Wire shape: `{"type":"one-off","datetime":"2026-01-01T00:00:00Z"}` or
/// `{"type":"cron","cron":"*/5 * * * *"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Trigger {
    /// Fire exactly once at the given UTC instant.
    OneOff {
        #[serde(rename = "datetime")]
        fire_at: DateTime<Utc>,
    },
    /// Fire on every occurrence of a 5-field cron expression (UTC).
    Cron {
        #[serde(rename = "cron")]
        expression: String,
    },
}

impl Trigger {
    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::OneOff { .. } => "one-off",
            Trigger::Cron { .. } => "cron",
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self, Trigger::Cron { .. })
    }
}

/// The outbound HTTP callback a task performs when it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub method: String,
    pub url: String,
    /// Request headers, each set verbatim.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Request body. A JSON string is sent as its raw text; any other JSON
    /// value is sent serialized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Action {
    /// Bytes sent as the request body, if any.
    pub fn body_bytes(&self) -> Option<Vec<u8>> {
        match &self.payload {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) => Some(raw.clone().into_bytes()),
            Some(other) => Some(other.to_string().into_bytes()),
        }
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for `next_run`.
    Scheduled,
    /// Picked up by the poller; an execution attempt is outstanding.
    Claimed,
    /// Terminal: a one-off task that has run (successfully or not).
    Completed,
    /// Terminal: canceled through the API.
    Canceled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Scheduled => "scheduled",
            TaskStatus::Claimed => "claimed",
            TaskStatus::Completed => "completed",
            TaskStatus::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(TaskStatus::Scheduled),
            "claimed" => Ok(TaskStatus::Claimed),
            "completed" => Ok(TaskStatus::Completed),
            "canceled" => Ok(TaskStatus::Canceled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// A persisted task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// UUID v4 string, primary key.
    pub id: String,
    /// Human-readable label, not unique.
    pub name: String,
    pub trigger: Trigger,
    pub action: Action,
    pub status: TaskStatus,
    /// When the task next becomes due. `None` once exhausted or canceled.
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Due means scheduled with a `next_run` at or before `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Scheduled && self.next_run.is_some_and(|at| at <= now)
    }
}

/// Input for creating a task through the management API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub name: String,
    pub trigger: Trigger,
    pub action: Action,
}

/// Partial update of a task; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub trigger: Option<Trigger>,
    #[serde(default)]
    pub action: Option<ActionUpdate>,
}

/// Partial update of an action. Empty method/url strings are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionUpdate {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub payload: Option<Value>,
}

/// Immutable record of one execution attempt.
///
/// Either a captured HTTP exchange (`response_headers`/`response_body` set) or
/// a transport failure (`error_message` set), never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: String,
    pub task_id: String,
    /// When the attempt began.
    pub run_at: DateTime<Utc>,
    /// HTTP status, or 0 when no response was obtained.
    pub status_code: u16,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// What a single callback attempt produced.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    /// A response was received, whatever its status.
    Response {
        status_code: u16,
        headers: Value,
        body: Value,
    },
    /// No response: the request could not be built or the transport failed.
    Failed { error: String },
}

/// A finished callback attempt, ready to be recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub run_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: CallbackOutcome,
}

impl Execution {
    pub fn status_code(&self) -> u16 {
        match &self.outcome {
            CallbackOutcome::Response { status_code, .. } => *status_code,
            CallbackOutcome::Failed { .. } => 0,
        }
    }

    /// Success is a function of the status code alone.
    pub fn is_success(&self) -> bool {
        matches!(&self.outcome, CallbackOutcome::Response { status_code, .. } if (200..300).contains(status_code))
    }
}
