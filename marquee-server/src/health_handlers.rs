use axum::{extract::State, response::Json};
use serde_json::{Value, json};

use crate::errors::AppResult;
use crate::state::AppState;

/// Liveness plus a snapshot of pool health (roster, backlog, counters).
pub async fn health_handler(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let pool = state.pool.snapshot().await?;
    Ok(Json(json!({
        "status": "ok",
        "pool": pool,
    })))
}
