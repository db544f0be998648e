use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(handlers::health_check))
        .route("/api/v1/config", get(handlers::get_engine_config))

        // Project-scoped inputs
        .route("/api/v1/projects/{project_id}/groups", post(handlers::create_group))
        .route("/api/v1/projects/{project_id}/scenes", post(handlers::create_scene))
        .route("/api/v1/projects/{project_id}/runs", get(handlers::list_project_runs))

        // Runs
        .route("/api/v1/runs", post(handlers::submit_run))
        .route("/api/v1/runs/{run_id}", get(handlers::get_run).delete(handlers::delete_run))
        .route("/api/v1/runs/{run_id}/cancel", post(handlers::cancel_run))

        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
