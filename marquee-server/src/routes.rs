use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::health_handlers::health_handler;
use crate::job_handlers::run_job_handler;
use crate::source_handlers::stream_sources_handler;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/watch/{tmdb_id}/sources", get(stream_sources_handler))
        .route("/admin/jobs", post(run_job_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
