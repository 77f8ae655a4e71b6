//! SQLite-backed vector collection.
//!
//! One database file per collection, using sqlx with WAL so the ingestion
//! worker and the query path can share it. Dense vectors are stored as
//! little-endian f32 BLOBs; late-interaction matrices as a BLOB with a u32
//! row-width header. Search is brute-force cosine over the collection,
//! which is the intended design at this corpus size.

use std::cmp::Ordering;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use super::scoring::{cosine_similarity, max_sim};
use super::{Record, ScoredRecord, ScrollPage, VectorCollection};
use crate::core::errors::ApiError;

pub struct SqliteCollection {
    pool: SqlitePool,
    dimension: usize,
    #[allow(dead_code)]
    db_path: PathBuf,
}

impl SqliteCollection {
    /// Open (or create) a collection with a fixed dense dimension.
    ///
    /// A dimension recorded by a previous run that differs from `dimension`
    /// is a fatal configuration error, never silently coerced.
    pub async fn open(db_path: PathBuf, dimension: usize) -> Result<Self, ApiError> {
        if dimension == 0 {
            return Err(ApiError::Config(
                "vector dimension must be non-zero".to_string(),
            ));
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(ApiError::internal)?;

        let collection = Self {
            pool,
            dimension,
            db_path,
        };
        collection.init_schema().await?;
        collection.check_dimension().await?;
        Ok(collection)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS points (
                id TEXT PRIMARY KEY,
                document TEXT NOT NULL,
                dense BLOB NOT NULL,
                late BLOB,
                metadata TEXT DEFAULT '{}',
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS collection_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    async fn check_dimension(&self) -> Result<(), ApiError> {
        let stored: Option<String> =
            sqlx::query_scalar("SELECT value FROM collection_meta WHERE key = 'dimension'")
                .fetch_optional(&self.pool)
                .await
                .map_err(ApiError::internal)?;

        match stored.and_then(|value| value.parse::<usize>().ok()) {
            Some(existing) if existing != self.dimension => Err(ApiError::Config(format!(
                "collection was created with dimension {}, configured {}",
                existing, self.dimension
            ))),
            Some(_) => Ok(()),
            None => {
                sqlx::query("INSERT OR REPLACE INTO collection_meta (key, value) VALUES ('dimension', ?1)")
                    .bind(self.dimension.to_string())
                    .execute(&self.pool)
                    .await
                    .map_err(ApiError::internal)?;
                Ok(())
            }
        }
    }

    fn validate(&self, record: &Record) -> Result<(), ApiError> {
        if record.dense.len() != self.dimension {
            return Err(ApiError::Config(format!(
                "dense vector for '{}' has dimension {}, collection expects {}",
                record.id,
                record.dense.len(),
                self.dimension
            )));
        }
        Ok(())
    }

    async fn write_record(&self, record: &Record) -> Result<(), ApiError> {
        let dense_blob = serialize_dense(&record.dense);
        let late_blob = record.late.as_deref().and_then(serialize_late);
        let metadata_str = record
            .metadata
            .as_ref()
            .map(|m| serde_json::to_string(m).unwrap_or_default())
            .unwrap_or_else(|| "{}".to_string());

        sqlx::query(
            "INSERT OR REPLACE INTO points (id, document, dense, late, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&record.id)
        .bind(&record.document)
        .bind(&dense_blob)
        .bind(&late_blob)
        .bind(&metadata_str)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    async fn fetch_all(&self, include_late: bool) -> Result<Vec<Record>, ApiError> {
        let rows = sqlx::query("SELECT id, document, dense, late, metadata FROM points")
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(rows
            .iter()
            .map(|row| row_to_record(row, include_late))
            .collect())
    }
}

#[async_trait]
impl VectorCollection for SqliteCollection {
    async fn upsert(&self, record: Record) -> Result<(), ApiError> {
        self.validate(&record)?;
        self.write_record(&record).await
    }

    async fn upsert_batch(&self, records: Vec<Record>) -> Result<(), ApiError> {
        for record in &records {
            self.validate(record)?;
        }
        for record in &records {
            self.write_record(record).await?;
        }
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<(), ApiError> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;
        for id in ids {
            sqlx::query("DELETE FROM points WHERE id = ?1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(ApiError::internal)?;
        }
        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }

    async fn count(&self) -> Result<usize, ApiError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM points")
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(count as usize)
    }

    async fn scroll(&self, cursor: Option<i64>, page: usize) -> Result<ScrollPage, ApiError> {
        let page = page.max(1);
        let after = cursor.unwrap_or(0);

        let rows = sqlx::query(
            "SELECT rowid, id, document, dense, late, metadata
             FROM points
             WHERE rowid > ?1
             ORDER BY rowid
             LIMIT ?2",
        )
        .bind(after)
        .bind(page as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let next = if rows.len() == page {
            rows.last().map(|row| row.get::<i64, _>("rowid"))
        } else {
            None
        };

        let records = rows.iter().map(|row| row_to_record(row, true)).collect();
        Ok(ScrollPage { records, next })
    }

    async fn search_dense(
        &self,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, ApiError> {
        let mut scored: Vec<ScoredRecord> = self
            .fetch_all(false)
            .await?
            .into_iter()
            .map(|record| {
                let score = cosine_similarity(query, &record.dense);
                ScoredRecord { record, score }
            })
            .collect();

        sort_scored(&mut scored);
        scored.truncate(limit);
        Ok(scored)
    }

    async fn search_hybrid(
        &self,
        dense_query: &[f32],
        late_query: &[Vec<f32>],
        prefetch: usize,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, ApiError> {
        let mut candidates: Vec<ScoredRecord> = self
            .fetch_all(true)
            .await?
            .into_iter()
            .map(|record| {
                let score = cosine_similarity(dense_query, &record.dense);
                ScoredRecord { record, score }
            })
            .collect();

        sort_scored(&mut candidates);
        candidates.truncate(prefetch);

        // Re-rank the bounded candidate set only; records without a stored
        // late matrix keep their dense score.
        for candidate in &mut candidates {
            if let Some(late) = candidate.record.late.as_deref() {
                candidate.score = max_sim(late_query, late);
            }
        }

        sort_scored(&mut candidates);
        candidates.truncate(limit);
        Ok(candidates)
    }
}

/// Descending score; ties break by ascending id for reproducible top-k.
fn sort_scored(scored: &mut [ScoredRecord]) {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.record.id.cmp(&b.record.id))
    });
}

fn serialize_dense(dense: &[f32]) -> Vec<u8> {
    dense.iter().flat_map(|value| value.to_le_bytes()).collect()
}

fn deserialize_dense(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Late matrix layout: u32 row width, then rows of little-endian f32.
fn serialize_late(late: &[Vec<f32>]) -> Option<Vec<u8>> {
    let width = late.first().map(|row| row.len())?;
    if width == 0 || late.iter().any(|row| row.len() != width) {
        return None;
    }

    let mut bytes = Vec::with_capacity(4 + late.len() * width * 4);
    bytes.extend((width as u32).to_le_bytes());
    for row in late {
        for value in row {
            bytes.extend(value.to_le_bytes());
        }
    }
    Some(bytes)
}

fn deserialize_late(bytes: &[u8]) -> Option<Vec<Vec<f32>>> {
    if bytes.len() < 4 {
        return None;
    }
    let width = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if width == 0 {
        return None;
    }

    let values = deserialize_dense(&bytes[4..]);
    if values.is_empty() || values.len() % width != 0 {
        return None;
    }

    Some(values.chunks(width).map(|row| row.to_vec()).collect())
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow, include_late: bool) -> Record {
    let dense_bytes: Vec<u8> = row.get("dense");
    let late = if include_late {
        row.get::<Option<Vec<u8>>, _>("late")
            .as_deref()
            .and_then(deserialize_late)
    } else {
        None
    };
    let metadata_str: String = row.get("metadata");
    let metadata = serde_json::from_str::<Value>(&metadata_str)
        .ok()
        .filter(|value| !value.is_null());

    Record {
        id: row.get("id"),
        document: row.get("document"),
        dense: deserialize_dense(&dense_bytes),
        late,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_collection(dimension: usize) -> SqliteCollection {
        let path = std::env::temp_dir().join(format!(
            "ragline-collection-test-{}.db",
            uuid::Uuid::new_v4()
        ));
        SqliteCollection::open(path, dimension).await.unwrap()
    }

    fn record(id: &str, document: &str, dense: Vec<f32>) -> Record {
        Record {
            id: id.to_string(),
            document: document.to_string(),
            dense,
            late: None,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn upsert_overwrites_by_id() {
        let collection = test_collection(3).await;

        collection
            .upsert(record("p1", "first", vec![1.0, 0.0, 0.0]))
            .await
            .unwrap();
        collection
            .upsert(record("p1", "second", vec![0.0, 1.0, 0.0]))
            .await
            .unwrap();

        assert_eq!(collection.count().await.unwrap(), 1);
        let page = collection.scroll(None, 10).await.unwrap();
        assert_eq!(page.records[0].document, "second");
    }

    #[tokio::test]
    async fn delete_unknown_id_is_a_noop() {
        let collection = test_collection(2).await;
        collection
            .upsert(record("p1", "doc", vec![1.0, 0.0]))
            .await
            .unwrap();

        collection
            .delete(&["missing".to_string()])
            .await
            .unwrap();
        assert_eq!(collection.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_a_config_error() {
        let collection = test_collection(3).await;
        let result = collection.upsert(record("p1", "doc", vec![1.0])).await;
        assert!(matches!(result, Err(ApiError::Config(_))));
    }

    #[tokio::test]
    async fn reopening_with_other_dimension_fails() {
        let path = std::env::temp_dir().join(format!(
            "ragline-collection-dim-test-{}.db",
            uuid::Uuid::new_v4()
        ));

        {
            SqliteCollection::open(path.clone(), 3).await.unwrap();
        }

        let result = SqliteCollection::open(path, 4).await;
        assert!(matches!(result, Err(ApiError::Config(_))));
    }

    #[tokio::test]
    async fn scroll_is_restartable_by_cursor() {
        let collection = test_collection(2).await;
        for i in 0..5 {
            collection
                .upsert(record(&format!("p{i}"), &format!("doc {i}"), vec![1.0, 0.0]))
                .await
                .unwrap();
        }

        let first = collection.scroll(None, 2).await.unwrap();
        assert_eq!(first.records.len(), 2);
        let cursor = first.next.unwrap();

        let mut seen: Vec<String> = first.records.iter().map(|r| r.id.clone()).collect();
        let mut next = Some(cursor);
        while let Some(cursor) = next {
            let page = collection.scroll(Some(cursor), 2).await.unwrap();
            seen.extend(page.records.iter().map(|r| r.id.clone()));
            next = page.next;
        }

        seen.sort();
        assert_eq!(seen, vec!["p0", "p1", "p2", "p3", "p4"]);
    }

    #[tokio::test]
    async fn dense_search_ranks_by_cosine() {
        let collection = test_collection(2).await;
        collection
            .upsert(record("far", "far doc", vec![0.0, 1.0]))
            .await
            .unwrap();
        collection
            .upsert(record("near", "near doc", vec![1.0, 0.1]))
            .await
            .unwrap();

        let results = collection.search_dense(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(results[0].record.id, "near");
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn hybrid_results_are_subset_of_dense_prefetch() {
        let collection = test_collection(2).await;
        for i in 0..6 {
            let angle = i as f32 * 0.2;
            collection
                .upsert(Record {
                    id: format!("p{i}"),
                    document: format!("doc {i}"),
                    dense: vec![angle.cos(), angle.sin()],
                    late: Some(vec![vec![angle.cos(), angle.sin()]]),
                    metadata: None,
                })
                .await
                .unwrap();
        }

        let prefetch = 3;
        let dense = collection.search_dense(&[1.0, 0.0], prefetch).await.unwrap();
        let dense_ids: Vec<&str> = dense.iter().map(|r| r.record.id.as_str()).collect();

        let hybrid = collection
            .search_hybrid(&[1.0, 0.0], &[vec![0.0, 1.0]], prefetch, 2)
            .await
            .unwrap();

        for result in &hybrid {
            assert!(dense_ids.contains(&result.record.id.as_str()));
        }
    }

    #[tokio::test]
    async fn hybrid_rerank_promotes_late_token_match() {
        let collection = test_collection(2).await;

        // "a" wins the dense stage, but "b" carries the token the late
        // query is looking for.
        collection
            .upsert(Record {
                id: "a".to_string(),
                document: "dense favourite".to_string(),
                dense: vec![1.0, 0.0],
                late: Some(vec![vec![1.0, 0.0]]),
                metadata: None,
            })
            .await
            .unwrap();
        collection
            .upsert(Record {
                id: "b".to_string(),
                document: "late favourite".to_string(),
                dense: vec![0.9, 0.1],
                late: Some(vec![vec![0.0, 1.0]]),
                metadata: None,
            })
            .await
            .unwrap();

        let results = collection
            .search_hybrid(&[1.0, 0.0], &[vec![0.0, 1.0]], 2, 1)
            .await
            .unwrap();

        assert_eq!(results[0].record.id, "b");
    }

    #[tokio::test]
    async fn late_blob_round_trips_through_scroll() {
        let collection = test_collection(2).await;
        let late = vec![vec![0.25, -0.5], vec![1.5, 2.0]];

        collection
            .upsert(Record {
                id: "p1".to_string(),
                document: "doc".to_string(),
                dense: vec![1.0, 0.0],
                late: Some(late.clone()),
                metadata: Some(serde_json::json!({"from": "a@b"})),
            })
            .await
            .unwrap();

        let page = collection.scroll(None, 1).await.unwrap();
        assert_eq!(page.records[0].late.as_ref().unwrap(), &late);
        assert_eq!(
            page.records[0].metadata.as_ref().unwrap()["from"],
            serde_json::json!("a@b")
        );
    }
}
