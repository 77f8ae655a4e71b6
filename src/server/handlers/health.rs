use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::state::AppState;

pub async fn root() -> impl IntoResponse {
    "ragline backend is running."
}

pub async fn health(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let long_records = state.long_term.count().await.unwrap_or(0);
    let short_records = state.short_term.count().await.unwrap_or(0);

    Ok(Json(json!({
        "status": "ok",
        "worker_running": state.short_term.worker_running().await,
        "long_term_records": long_records,
        "short_term_records": short_records,
    })))
}
