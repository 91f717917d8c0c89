use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness probe, returns server metadata.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "git_sha": env!("CRONHOOK_GIT_SHA"),
        "workers": state.config.dispatch.workers,
        "poll_interval_secs": state.config.dispatch.poll_interval_secs,
    }))
}
