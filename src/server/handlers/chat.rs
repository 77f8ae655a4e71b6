use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::agent::RagPipeline;
use crate::core::errors::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatPayload {
    pub query: String,
    pub user_uuid: String,
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatPayload>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.query.trim().is_empty() {
        return Err(ApiError::BadRequest("No query provided".to_string()));
    }
    if payload.user_uuid.trim().is_empty() {
        return Err(ApiError::BadRequest("No user_uuid provided".to_string()));
    }

    let model = state.current_model()?;
    let config = state.config.load_config();
    let llm = state.llm.clone();
    let retriever = state.retriever.clone();

    let response = state
        .sessions
        .chat(&payload.user_uuid, &payload.query, move || {
            RagPipeline::new(llm, retriever, config, model)
        })
        .await;

    Ok(Json(json!({ "response": response })))
}
