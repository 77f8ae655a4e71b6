use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::agent::SessionManager;
use crate::core::config::{AppPaths, ConfigService};
use crate::core::errors::ApiError;
use crate::feed::SpoolFeed;
use crate::llm::{LlmProvider, OpenAiCompatProvider};
use crate::providers::{EmbeddingProvider, RemoteEmbedder, RemoteSummarizer, Summarizer};
use crate::retrieval::{RetrievalConfig, Retriever};
use crate::store::{LongTermStore, ShortTermConfig, ShortTermStore};
use crate::vector::SqliteCollection;

const DEFAULT_MODEL: &str = "qwen/qwen3-32b";
const DEFAULT_DIMENSION: usize = 384;

pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: ConfigService,
    pub long_term: Arc<LongTermStore>,
    pub short_term: Arc<ShortTermStore>,
    pub retriever: Arc<Retriever>,
    pub sessions: SessionManager,
    pub llm: Arc<dyn LlmProvider>,
    /// Chat model id used for new agent sessions; swappable at runtime.
    pub model: RwLock<String>,
    #[allow(dead_code)]
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub async fn initialize() -> anyhow::Result<Arc<Self>> {
        let paths = Arc::new(AppPaths::new());
        let config_service = ConfigService::new(paths.clone());
        let config = config_service.load_config();

        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(build_embedder(&config)?);
        let summarizer: Arc<dyn Summarizer> = Arc::new(build_summarizer(&config)?);

        let long_collection = Arc::new(
            SqliteCollection::open(paths.long_term_db_path.clone(), embedder.dimension()).await?,
        );
        let short_collection = Arc::new(
            SqliteCollection::open(paths.short_term_db_path.clone(), embedder.dimension()).await?,
        );

        let long_term = Arc::new(LongTermStore::new(long_collection, embedder.clone()));
        let feed = Arc::new(SpoolFeed::new(paths.spool_dir.clone()));
        let short_term = Arc::new(ShortTermStore::new(
            short_collection,
            embedder,
            summarizer,
            feed,
            long_term.clone(),
            short_term_config(&config),
        ));

        let retriever = Arc::new(Retriever::new(
            long_term.clone(),
            short_term.clone(),
            RetrievalConfig::from_config(&config),
        ));

        let idle_timeout = config
            .get("sessions")
            .and_then(|v| v.get("idle_timeout_secs"))
            .and_then(|v| v.as_u64())
            .unwrap_or(30 * 60);
        let sessions = SessionManager::new(Duration::from_secs(idle_timeout));

        let llm: Arc<dyn LlmProvider> = Arc::new(build_llm(&config)?);
        let model = RwLock::new(
            config
                .get("llm")
                .and_then(|v| v.get("model"))
                .and_then(|v| v.as_str())
                .unwrap_or(DEFAULT_MODEL)
                .to_string(),
        );

        Ok(Arc::new(AppState {
            paths,
            config: config_service,
            long_term,
            short_term,
            retriever,
            sessions,
            llm,
            model,
            started_at: Utc::now(),
        }))
    }

    pub fn current_model(&self) -> Result<String, ApiError> {
        Ok(self.model.read().map_err(ApiError::internal)?.clone())
    }

    pub fn set_model(&self, model: String) -> Result<(), ApiError> {
        *self.model.write().map_err(ApiError::internal)? = model;
        Ok(())
    }
}

fn build_embedder(config: &Value) -> Result<RemoteEmbedder, ApiError> {
    let section = config.get("embedding");
    let endpoint = section
        .and_then(|v| v.get("endpoint"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| ApiError::Config("embedding.endpoint is not configured".to_string()))?;
    let dimension = section
        .and_then(|v| v.get("dimension"))
        .and_then(|v| v.as_u64())
        .unwrap_or(DEFAULT_DIMENSION as u64) as usize;

    Ok(RemoteEmbedder::new(endpoint.to_string(), dimension))
}

fn build_summarizer(config: &Value) -> Result<RemoteSummarizer, ApiError> {
    let endpoint = config
        .get("summarizer")
        .and_then(|v| v.get("endpoint"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| ApiError::Config("summarizer.endpoint is not configured".to_string()))?;
    Ok(RemoteSummarizer::new(endpoint.to_string()))
}

fn build_llm(config: &Value) -> Result<OpenAiCompatProvider, ApiError> {
    let section = config.get("llm");
    let endpoint = section
        .and_then(|v| v.get("endpoint"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| ApiError::Config("llm.endpoint is not configured".to_string()))?;
    let api_key = section
        .and_then(|v| v.get("api_key"))
        .and_then(|v| v.as_str())
        .map(|v| v.to_string());
    Ok(OpenAiCompatProvider::new(endpoint.to_string(), api_key))
}

fn short_term_config(config: &Value) -> ShortTermConfig {
    let defaults = ShortTermConfig::default();
    let section = config.get("short_term");

    let poll_interval = section
        .and_then(|v| v.get("poll_interval_secs"))
        .and_then(|v| v.as_u64())
        .map(Duration::from_secs)
        .unwrap_or(defaults.poll_interval);
    let flush_max_records = section
        .and_then(|v| v.get("flush_max_records"))
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(defaults.flush_max_records);
    let flush_max_age = section
        .and_then(|v| v.get("flush_max_age_secs"))
        .and_then(|v| v.as_u64())
        .map(Duration::from_secs)
        .unwrap_or(defaults.flush_max_age);
    let blocklist = section
        .and_then(|v| v.get("blocklist"))
        .and_then(|v| v.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|item| item.as_str())
                .map(|item| item.to_string())
                .collect()
        })
        .unwrap_or_else(|| vec!["noreply".to_string(), "no-reply".to_string()]);

    ShortTermConfig {
        poll_interval,
        flush_max_records,
        flush_max_age,
        blocklist,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn short_term_config_reads_overrides() {
        let config = json!({
            "short_term": {
                "poll_interval_secs": 5,
                "flush_max_records": 7,
                "flush_max_age_secs": 60,
                "blocklist": ["spam@x", "Security alert"],
            }
        });

        let parsed = short_term_config(&config);
        assert_eq!(parsed.poll_interval, Duration::from_secs(5));
        assert_eq!(parsed.flush_max_records, 7);
        assert_eq!(parsed.flush_max_age, Duration::from_secs(60));
        assert_eq!(parsed.blocklist.len(), 2);
    }

    #[test]
    fn missing_provider_endpoints_are_config_errors() {
        let config = json!({});
        assert!(matches!(build_embedder(&config), Err(ApiError::Config(_))));
        assert!(matches!(build_summarizer(&config), Err(ApiError::Config(_))));
        assert!(matches!(build_llm(&config), Err(ApiError::Config(_))));
    }
}
