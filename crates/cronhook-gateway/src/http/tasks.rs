use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use cronhook_scheduler::{NewTask, Task, TaskFilter, TaskStatus, TaskStore, TaskUpdate};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::error::{api_error, bad_request, ApiError};
use crate::app::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<u32>,
    pub size: Option<u32>,
    pub status: Option<String>,
}

/// POST /tasks: create a task; 201 with the stored record.
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    body: Result<Json<NewTask>, JsonRejection>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let Json(new) = body.map_err(|e| bad_request(e.body_text()))?;
    let task = state.tasks.create_task(new).map_err(api_error)?;
    info!(task_id = %task.id, "task created via API");
    Ok((StatusCode::CREATED, Json(task)))
}

/// GET /tasks?page=&size=&status=: newest first.
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    let status = params
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<TaskStatus>)
        .transpose()
        .map_err(bad_request)?;
    let filter = TaskFilter {
        status,
        page: params.page.unwrap_or(1),
        size: params.size.unwrap_or(0),
    };
    let tasks = state.tasks.list_tasks(&filter).map_err(api_error)?;
    let count = tasks.len();
    Ok(Json(json!({
        "tasks": tasks,
        "page": filter.page.max(1),
        "count": count,
    })))
}

/// GET /tasks/{id}
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    state.tasks.get_task(&id).map(Json).map_err(api_error)
}

/// PUT /tasks/{id}: partial update.
pub async fn update_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<TaskUpdate>, JsonRejection>,
) -> Result<Json<Task>, ApiError> {
    let Json(update) = body.map_err(|e| bad_request(e.body_text()))?;
    state.tasks.update_task(&id, update).map(Json).map_err(api_error)
}

/// DELETE /tasks/{id}: cancel. Tasks are never removed.
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    state.tasks.cancel_task(&id).map(Json).map_err(api_error)
}
