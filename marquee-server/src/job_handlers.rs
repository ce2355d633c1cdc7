use axum::{extract::State, response::Json};
use marquee_core::JobKind;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct OneOffJob {
    pub kind: JobKind,
    #[serde(default)]
    pub data: Value,
}

/// Run a one-off job on an ephemeral worker.
///
/// Identical submissions are rejected while one is still in flight, so a
/// retried admin request cannot fan out into duplicate scrapes.
pub async fn run_job_handler(
    State(state): State<AppState>,
    Json(request): Json<OneOffJob>,
) -> AppResult<Json<Value>> {
    info!(kind = %request.kind, "one-off job request");

    let key = format!("{}:{}", request.kind, request.data);
    if !state.ledger.begin(&key).await {
        return Err(AppError::conflict("an identical job is already running"));
    }

    let outcome = state.spawner.spawn(request.kind, request.data).await;
    state.ledger.finish(&key).await;

    let result = outcome?;
    Ok(Json(json!({ "kind": request.kind, "result": result })))
}
