use axum::{
    extract::{Path, State},
    response::Json,
};
use serde_json::{Value, json};
use tracing::info;

use crate::errors::AppResult;
use crate::state::AppState;

/// Collect streaming sources for one title.
///
/// The handler only builds the payload and formats the settled outcome; the
/// scrape itself runs on a pool worker, off the request path.
pub async fn stream_sources_handler(
    State(state): State<AppState>,
    Path(tmdb_id): Path<u64>,
) -> AppResult<Json<Value>> {
    info!(tmdb_id, "stream source request");

    let result = state.pool.run_task(json!({ "tmdb_id": tmdb_id })).await?;
    Ok(Json(result))
}
