use axum::{http::StatusCode, Json};
use cronhook_core::CronhookError;
use serde_json::{json, Value};
use tracing::{debug, error};

/// Error half of every handler's return type.
pub type ApiError = (StatusCode, Json<Value>);

/// Map a domain error to a status code and an `{"error", "code"}` body.
pub fn api_error(err: impl Into<CronhookError>) -> ApiError {
    let err = err.into();
    let status = match &err {
        CronhookError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        CronhookError::TaskNotFound { .. } => StatusCode::NOT_FOUND,
        CronhookError::InvalidState { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(code = err.code(), "request failed: {err}");
    } else {
        debug!(code = err.code(), "request rejected: {err}");
    }
    (status, Json(json!({"error": err.to_string(), "code": err.code()})))
}

/// 400 for input rejected before it reaches the task manager.
pub fn bad_request(reason: impl Into<String>) -> ApiError {
    api_error(CronhookError::InvalidRequest(reason.into()))
}
