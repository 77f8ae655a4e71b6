//! Long-term archival store: bulk ingestion of structured corpora plus the
//! hybrid `smart_query` retrieval path.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use super::{smart_query, QueryOptions};
use crate::core::errors::ApiError;
use crate::providers::EmbeddingProvider;
use crate::vector::{point_id, Record, VectorCollection};

/// Documents longer than this are split into fixed character windows.
/// Boundaries are raw char offsets, not sentence-aware; chunks become
/// independent records and are never reassembled.
pub const MAX_CHUNK_CHARS: usize = 1500;

pub struct LongTermStore {
    collection: Arc<dyn VectorCollection>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl LongTermStore {
    pub fn new(collection: Arc<dyn VectorCollection>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            collection,
            embedder,
        }
    }

    /// Bulk-load a JSON corpus file (admin upload path). Returns the number
    /// of records stored.
    pub async fn ingest_file(&self, path: &Path) -> Result<usize, ApiError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| ApiError::BadRequest(format!("cannot read {}: {}", path.display(), err)))?;
        let source: Value = serde_json::from_str(&raw)
            .map_err(|err| ApiError::BadRequest(format!("invalid JSON corpus: {}", err)))?;
        self.ingest(&source).await
    }

    /// Ingest a structured corpus: either an object map (key becomes the
    /// source id) or an array (an `id` field or the index becomes the source
    /// id). Each entry is serialized, chunked, embedded, and upserted.
    ///
    /// An entry that fails to embed is skipped and logged rather than stored
    /// with a placeholder vector.
    pub async fn ingest(&self, source: &Value) -> Result<usize, ApiError> {
        let mut stored = 0;

        match source {
            Value::Object(map) => {
                for (source_id, item) in map {
                    stored += self.ingest_entry(source_id, item).await;
                }
            }
            Value::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    let source_id = item
                        .get("id")
                        .and_then(|v| v.as_str())
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| index.to_string());
                    stored += self.ingest_entry(&source_id, item).await;
                }
            }
            _ => {
                return Err(ApiError::BadRequest(
                    "corpus must be a JSON object map or array".to_string(),
                ))
            }
        }

        tracing::info!("Ingested {} records into long-term store", stored);
        Ok(stored)
    }

    async fn ingest_entry(&self, source_id: &str, item: &Value) -> usize {
        let document = match item {
            Value::String(text) => text.clone(),
            other => serde_json::to_string(other).unwrap_or_default(),
        };
        if document.is_empty() {
            tracing::warn!("Skipping empty corpus entry '{}'", source_id);
            return 0;
        }

        let metadata = item.get("metadata").cloned();
        let chunks = chunk_document(&document, MAX_CHUNK_CHARS);
        let chunked = chunks.len() > 1;
        let mut stored = 0;

        for (index, chunk) in chunks.into_iter().enumerate() {
            let key = if chunked {
                format!("{source_id}_{index}")
            } else {
                source_id.to_string()
            };

            let record = match self.embed_chunk(&key, chunk, metadata.clone()).await {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!("Skipping chunk '{}' of '{}': {}", key, source_id, err);
                    continue;
                }
            };

            match self.collection.upsert(record).await {
                Ok(()) => stored += 1,
                Err(err) => tracing::warn!("Upsert failed for '{}': {}", key, err),
            }
        }

        stored
    }

    async fn embed_chunk(
        &self,
        key: &str,
        document: String,
        metadata: Option<Value>,
    ) -> Result<Record, ApiError> {
        let dense = self.embedder.embed_dense(&document).await?;
        let late = self.embedder.embed_late(&document).await?;
        Ok(Record {
            id: point_id(key),
            document,
            dense,
            late: Some(late),
            metadata,
        })
    }

    /// Accept pre-embedded records unchanged (the migration path from the
    /// short-term store). Keyed upsert makes re-delivery harmless.
    pub async fn receive(&self, records: Vec<Record>) -> Result<(), ApiError> {
        self.collection.upsert_batch(records).await
    }

    pub async fn smart_query(
        &self,
        query_text: &str,
        options: &QueryOptions,
    ) -> Result<Vec<String>, ApiError> {
        smart_query(
            self.collection.as_ref(),
            self.embedder.as_ref(),
            query_text,
            options,
        )
        .await
    }

    pub async fn count(&self) -> Result<usize, ApiError> {
        self.collection.count().await
    }
}

/// Split on raw char boundaries into windows of at most `max_chars`.
fn chunk_document(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return vec![text.to_string()];
    }

    chars
        .chunks(max_chars.max(1))
        .map(|window| window.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::HashEmbedder;
    use crate::vector::SqliteCollection;
    use serde_json::json;

    async fn test_store() -> LongTermStore {
        let path = std::env::temp_dir().join(format!(
            "ragline-long-term-test-{}.db",
            uuid::Uuid::new_v4()
        ));
        let embedder = Arc::new(HashEmbedder::new(32));
        let collection = Arc::new(
            SqliteCollection::open(path, embedder.dimension())
                .await
                .unwrap(),
        );
        LongTermStore::new(collection, embedder)
    }

    #[test]
    fn short_documents_stay_whole() {
        let chunks = chunk_document("hello world", 1500);
        assert_eq!(chunks, vec!["hello world"]);
    }

    #[test]
    fn long_documents_split_on_char_boundaries() {
        let text = "x".repeat(3200);
        let chunks = chunk_document(&text, 1500);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 1500);
        assert_eq!(chunks[2].chars().count(), 200);
    }

    #[test]
    fn chunking_respects_multibyte_chars() {
        let text = "日本語テキスト".repeat(300);
        let chunks = chunk_document(&text, 1500);
        let total: usize = chunks.iter().map(|c| c.chars().count()).sum();
        assert_eq!(total, 2100);
    }

    #[tokio::test]
    async fn ingest_object_map_keys_records_by_source_id() {
        let store = test_store().await;
        let corpus = json!({
            "e1": {"title": "orientation", "body": "welcome week"},
            "e2": {"title": "exams", "body": "schedule posted"},
        });

        let count = store.ingest(&corpus).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(store.count().await.unwrap(), 2);

        // Re-ingesting the same map updates in place.
        let again = store.ingest(&corpus).await.unwrap();
        assert_eq!(again, 2);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn ingest_array_uses_id_field_when_present() {
        let store = test_store().await;
        let corpus = json!([
            {"id": "a", "body": "first"},
            {"body": "second"},
        ]);

        assert_eq!(store.ingest(&corpus).await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn oversized_entries_become_multiple_records() {
        let store = test_store().await;
        let big = "word ".repeat(700); // 3500 chars serialized
        let corpus = json!({ "big": big });

        let count = store.ingest(&corpus).await.unwrap();
        assert!(count >= 3);
        assert_eq!(store.count().await.unwrap(), count);
    }

    #[tokio::test]
    async fn ingest_file_loads_a_json_corpus() {
        let store = test_store().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.json");
        std::fs::write(
            &path,
            serde_json::to_string(&json!({
                "e1": {"title": "orientation"},
                "e2": {"title": "exams"},
            }))
            .unwrap(),
        )
        .unwrap();

        let count = store.ingest_file(&path).await.unwrap();
        assert_eq!(count, 2);

        let missing = store.ingest_file(&dir.path().join("nope.json")).await;
        assert!(matches!(missing, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn scalar_corpus_is_rejected() {
        let store = test_store().await;
        let result = store.ingest(&json!("just a string")).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn end_to_end_exact_document_is_retrievable() {
        let store = test_store().await;
        store
            .ingest(&json!({ "e1": "Director: Dr. X" }))
            .await
            .unwrap();

        let results = store
            .smart_query(
                "Director",
                &QueryOptions {
                    topk: 5,
                    top_l: 5,
                    use_late: false,
                    doc_search: true,
                },
            )
            .await
            .unwrap();

        assert!(results.iter().any(|doc| doc == "Director: Dr. X"));
    }
}
