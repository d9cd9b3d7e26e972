//! Liveness endpoint.

use axum::extract::State;
use axum::Json;
use uuid::Uuid;

use pagesmith_core::store::StoreError;

use crate::state::AppState;

use super::HealthResponse;

/// `GET /health` — cheap store probe plus worker count.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = match state.store.get_job(Uuid::nil()).await {
        Ok(_) | Err(StoreError::NotFound(_)) => "ok",
        Err(_) => "degraded",
    };
    let status = if store == "ok" { "ok" } else { "degraded" };
    Json(HealthResponse {
        status: status.to_string(),
        store: store.to_string(),
        workers: state.workers,
    })
}
