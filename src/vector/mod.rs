//! Vector collection abstraction: durable id/vector/document storage with
//! dense and hybrid (dense prefetch + late-interaction re-rank) search.
//!
//! The primary implementation is `SqliteCollection` in the `sqlite` module.

mod scoring;
mod sqlite;

pub use scoring::{cosine_similarity, max_sim};
pub use sqlite::SqliteCollection;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::core::errors::ApiError;

/// A stored record: one document with its embeddings.
#[derive(Debug, Clone)]
pub struct Record {
    /// Normalized point id (see [`point_id`]).
    pub id: String,
    /// Serialized text payload; never empty for ingested records.
    pub document: String,
    /// Fixed-dimension dense embedding.
    pub dense: Vec<f32>,
    /// Optional token-level late-interaction matrix.
    pub late: Option<Vec<Vec<f32>>>,
    /// Auxiliary fields (sender, subject, timestamp). Not indexed.
    pub metadata: Option<Value>,
}

/// A record with its similarity score, higher is better.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: Record,
    pub score: f32,
}

/// One page of a full-collection scan plus the cursor for the next page.
#[derive(Debug, Clone)]
pub struct ScrollPage {
    pub records: Vec<Record>,
    /// Pass back to `scroll` to resume; `None` means the scan is complete.
    pub next: Option<i64>,
}

/// Storage backend contract shared by the long-term and short-term stores.
///
/// Implementations must tolerate concurrent upsert/search/delete from the
/// query path and the ingestion worker.
#[async_trait]
pub trait VectorCollection: Send + Sync {
    /// Insert or overwrite by id. Persisted before returning.
    async fn upsert(&self, record: Record) -> Result<(), ApiError>;

    /// Upsert many records. Rows are committed as they are written, so a
    /// failure may leave a prefix stored; retrying the batch is safe.
    async fn upsert_batch(&self, records: Vec<Record>) -> Result<(), ApiError>;

    /// Remove matching records. Unknown ids are ignored.
    async fn delete(&self, ids: &[String]) -> Result<(), ApiError>;

    async fn count(&self) -> Result<usize, ApiError>;

    /// Paginated full scan. Restartable from any returned cursor.
    async fn scroll(&self, cursor: Option<i64>, page: usize) -> Result<ScrollPage, ApiError>;

    /// Top `limit` records by cosine similarity, descending. Ties break by
    /// ascending id so top-k boundaries are reproducible.
    async fn search_dense(
        &self,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, ApiError>;

    /// Dense prefetch of `prefetch` candidates, MaxSim re-rank, top `limit`.
    /// The result is always a subset of the dense prefetch set.
    async fn search_hybrid(
        &self,
        dense_query: &[f32],
        late_query: &[Vec<f32>],
        prefetch: usize,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, ApiError>;
}

/// Map an arbitrary source key (email message id, JSON object key) into the
/// UUID id space. Already-valid UUIDs pass through; everything else becomes
/// a v5 UUID of the key bytes, so re-ingesting the same key always updates
/// the same record.
pub fn point_id(source_key: &str) -> String {
    match Uuid::parse_str(source_key) {
        Ok(uuid) => uuid.to_string(),
        Err(_) => Uuid::new_v5(&Uuid::NAMESPACE_DNS, source_key.as_bytes()).to_string(),
    }
}
