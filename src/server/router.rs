use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use serde_json::Value;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::server::handlers::{admin, chat, health};
use crate::state::AppState;

/// Creates the application router: public chat endpoint, admin surface,
/// CORS from config, and request tracing.
pub fn router(state: Arc<AppState>) -> Router {
    let cors_layer = build_cors_layer(&state);

    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        .route("/chat", post(chat::chat))
        .route("/admin/verify_credentials", post(admin::verify_credentials))
        .route("/admin/upload_json", post(admin::upload_json))
        .route("/admin/worker_status", get(admin::worker_status))
        .route("/admin/start_worker", post(admin::start_worker))
        .route("/admin/stop_worker", post(admin::stop_worker))
        .route("/admin/change_model", post(admin::change_model))
        .route("/admin/logs", get(admin::get_logs))
        .with_state(state)
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
}

fn build_cors_layer(state: &Arc<AppState>) -> CorsLayer {
    let config = state.config.load_config();
    let allowed_origins = resolve_allowed_origins(&config)
        .into_iter()
        .filter_map(|origin| HeaderValue::from_str(&origin).ok())
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::ACCEPT,
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-admin-token"),
        ])
}

fn resolve_allowed_origins(config: &Value) -> Vec<String> {
    let origins = config
        .get("server")
        .and_then(|v| v.get("cors_allowed_origins"))
        .and_then(|value| value.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|item| item.as_str())
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| item.to_string())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if origins.is_empty() {
        return default_local_origins();
    }
    origins
}

fn default_local_origins() -> Vec<String> {
    vec![
        "http://localhost".to_string(),
        "http://localhost:3000".to_string(),
        "http://127.0.0.1".to_string(),
        "http://127.0.0.1:3000".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn configured_origins_replace_the_defaults() {
        let config = json!({
            "server": {"cors_allowed_origins": ["https://qa.example.org", " "]}
        });
        let origins = resolve_allowed_origins(&config);
        assert_eq!(origins, vec!["https://qa.example.org"]);
    }

    #[test]
    fn missing_origins_fall_back_to_local() {
        let origins = resolve_allowed_origins(&json!({}));
        assert!(origins.iter().any(|origin| origin.contains("localhost")));
    }
}
