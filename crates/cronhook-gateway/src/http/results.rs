use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use super::error::{api_error, ApiError};
use crate::app::AppState;

/// GET /tasks/{id}/results: execution history of one task, newest first.
pub async fn task_results(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let results = state.tasks.list_task_results(&id).map_err(api_error)?;
    Ok(Json(json!({ "task_id": id, "results": results })))
}

/// GET /results
pub async fn all_results(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let results = state.tasks.list_all_results().map_err(api_error)?;
    Ok(Json(json!({ "results": results })))
}
