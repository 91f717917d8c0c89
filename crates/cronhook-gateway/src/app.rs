use std::sync::Arc;

use axum::{
    http::{HeaderValue, Method},
    routing::get,
    Router,
};
use cronhook_core::config::CronhookConfig;
use cronhook_scheduler::TaskManager;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

/// Central shared state, passed as `Arc<AppState>` to all Axum handlers.
pub struct AppState {
    pub config: CronhookConfig,
    /// Shared with the dispatch engine; the manager serializes access itself.
    pub tasks: Arc<TaskManager>,
}

impl AppState {
    pub fn new(config: CronhookConfig, tasks: Arc<TaskManager>) -> Self {
        Self { config, tasks }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/tasks",
            get(crate::http::tasks::list_tasks).post(crate::http::tasks::create_task),
        )
        .route(
            "/tasks/{id}",
            get(crate::http::tasks::get_task)
                .put(crate::http::tasks::update_task)
                .delete(crate::http::tasks::cancel_task),
        )
        .route(
            "/tasks/{id}/results",
            get(crate::http::results::task_results),
        )
        .route("/results", get(crate::http::results::all_results))
        .with_state(state)
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::ORIGIN,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
        ])
}
