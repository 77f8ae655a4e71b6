//! Admin surface: corpus upload, worker lifecycle, model switch, log
//! download, credential check. All routes except `verify_credentials`
//! require the configured `x-admin-token` header.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use subtle::ConstantTimeEq;

use crate::core::errors::ApiError;
use crate::state::AppState;

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

fn constant_time_matches(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let config = state.config.load_config();
    let expected = config
        .get("admin")
        .and_then(|v| v.get("token"))
        .and_then(|v| v.as_str())
        .unwrap_or("");

    if expected.is_empty() {
        return Err(ApiError::Config("admin.token is not configured".to_string()));
    }

    let provided = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if provided.is_empty() || !constant_time_matches(provided, expected) {
        return Err(ApiError::Unauthorized);
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

pub async fn verify_credentials(
    State(state): State<Arc<AppState>>,
    Json(creds): Json<Credentials>,
) -> Result<impl IntoResponse, ApiError> {
    if creds.email.is_empty() || creds.password.is_empty() {
        return Err(ApiError::BadRequest(
            "Email and password are required".to_string(),
        ));
    }

    let config = state.config.load_config();
    let admin = config.get("admin");
    let expected_email = admin
        .and_then(|v| v.get("email"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let expected_password = admin
        .and_then(|v| v.get("password"))
        .and_then(|v| v.as_str())
        .unwrap_or("");

    let email_ok = !expected_email.is_empty() && constant_time_matches(&creds.email, expected_email);
    let password_ok =
        !expected_password.is_empty() && constant_time_matches(&creds.password, expected_password);

    if email_ok && password_ok {
        Ok(Json(json!({ "message": "Authentication successful." })))
    } else {
        Err(ApiError::Unauthorized)
    }
}

/// Bulk-load a JSON corpus into the long-term store.
pub async fn upload_json(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(corpus): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers)?;

    let records = state.long_term.ingest(&corpus).await?;
    Ok(Json(json!({
        "message": "Corpus ingested into the long-term store.",
        "records": records,
    })))
}

pub async fn worker_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers)?;
    Ok(Json(json!({
        "running": state.short_term.worker_running().await
    })))
}

pub async fn start_worker(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers)?;
    state.short_term.run_worker().await;
    Ok(Json(json!({ "message": "Ingestion worker started." })))
}

pub async fn stop_worker(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers)?;
    state.short_term.stop_worker().await;
    Ok(Json(json!({ "message": "Ingestion worker stopped." })))
}

#[derive(Debug, Deserialize)]
pub struct ChangeModelPayload {
    pub model: String,
}

pub async fn change_model(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<ChangeModelPayload>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers)?;

    if payload.model.trim().is_empty() {
        return Err(ApiError::BadRequest("No model provided".to_string()));
    }

    state.set_model(payload.model.clone())?;
    tracing::info!("Chat model changed to '{}'", payload.model);
    Ok(Json(json!({
        "message": format!("Model changed to {}.", payload.model)
    })))
}

/// Download the most recent log file.
pub async fn get_logs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers)?;

    let mut entries: Vec<_> = std::fs::read_dir(&state.paths.log_dir)
        .map_err(ApiError::internal)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    entries.sort();

    let Some(latest) = entries.last() else {
        return Err(ApiError::NotFound("No log files yet".to_string()));
    };

    let content = std::fs::read_to_string(latest).map_err(ApiError::internal)?;
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_comparison_handles_length_mismatch() {
        assert!(constant_time_matches("secret", "secret"));
        assert!(!constant_time_matches("secret", "secret2"));
        assert!(!constant_time_matches("", "secret"));
    }
}
