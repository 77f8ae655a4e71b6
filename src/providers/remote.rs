use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{EmbeddingProvider, Summarizer};
use crate::core::errors::ApiError;

/// Client for the hosted embedding service.
///
/// The service exposes `/embed_dense` and `/embed_colbert`, each taking
/// `{"text": ...}` and answering either a bare array or an object whose
/// first value is the array; both shapes are normalized here, once.
#[derive(Clone)]
pub struct RemoteEmbedder {
    base_url: String,
    dimension: usize,
    client: Client,
}

impl RemoteEmbedder {
    pub fn new(base_url: String, dimension: usize) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            dimension,
            client: Client::new(),
        }
    }

    async fn call(&self, endpoint: &str, text: &str) -> Result<Value, ApiError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "text": text }))
            .send()
            .await
            .map_err(ApiError::internal)?;

        if !response.status().is_success() {
            return Err(ApiError::Internal(format!(
                "embedding endpoint {} returned {}",
                endpoint,
                response.status()
            )));
        }

        let payload: Value = response.json().await.map_err(ApiError::internal)?;
        Ok(unwrap_payload(payload))
    }
}

/// Responses arrive either as the raw value or wrapped in a single-entry
/// object; unwrap to the raw value.
fn unwrap_payload(payload: Value) -> Value {
    match payload {
        Value::Object(map) => map.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null),
        other => other,
    }
}

fn parse_vector(value: &Value) -> Option<Vec<f32>> {
    let numbers = value.as_array()?;
    let mut vector = Vec::with_capacity(numbers.len());
    for number in numbers {
        vector.push(number.as_f64()? as f32);
    }
    Some(vector)
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_dense(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        let payload = self.call("embed_dense", text).await?;
        let vector = parse_vector(&payload)
            .ok_or_else(|| ApiError::Internal("dense embedding is not a number array".to_string()))?;

        if vector.len() != self.dimension {
            return Err(ApiError::Config(format!(
                "embedding service returned dimension {}, configured {}",
                vector.len(),
                self.dimension
            )));
        }
        Ok(vector)
    }

    async fn embed_late(&self, text: &str) -> Result<Vec<Vec<f32>>, ApiError> {
        let payload = self.call("embed_colbert", text).await?;
        let rows = payload
            .as_array()
            .ok_or_else(|| ApiError::Internal("late embedding is not a matrix".to_string()))?;

        let mut matrix = Vec::with_capacity(rows.len());
        for row in rows {
            let parsed = parse_vector(row).ok_or_else(|| {
                ApiError::Internal("late embedding row is not a number array".to_string())
            })?;
            matrix.push(parsed);
        }

        if matrix.is_empty() {
            return Err(ApiError::Internal("late embedding has no tokens".to_string()));
        }
        Ok(matrix)
    }
}

/// Client for the hosted summarizer's `/predict` endpoint.
#[derive(Clone)]
pub struct RemoteSummarizer {
    base_url: String,
    client: Client,
}

impl RemoteSummarizer {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Summarizer for RemoteSummarizer {
    async fn summarize(&self, text: &str) -> Result<String, ApiError> {
        let url = format!("{}/predict", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "text": text }))
            .send()
            .await
            .map_err(ApiError::internal)?;

        if !response.status().is_success() {
            return Err(ApiError::Internal(format!(
                "summarizer returned {}",
                response.status()
            )));
        }

        let payload: Value = response.json().await.map_err(ApiError::internal)?;
        match unwrap_payload(payload) {
            Value::String(summary) => Ok(summary),
            other => Err(ApiError::Internal(format!(
                "summarizer returned unexpected payload: {}",
                other
            ))),
        }
    }
}
