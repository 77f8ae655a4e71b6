//! Short-term feed buffer: a background worker pulls items from the feed,
//! filters and embeds them, and periodically migrates the whole buffer into
//! the long-term store.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{smart_query, LongTermStore, QueryOptions, SCROLL_PAGE};
use crate::core::errors::ApiError;
use crate::feed::{EmailRecord, FeedSource};
use crate::providers::{EmbeddingProvider, Summarizer};
use crate::vector::{point_id, Record, VectorCollection};

#[derive(Debug, Clone)]
pub struct ShortTermConfig {
    /// Sleep between worker iterations; also bounds flush-trigger latency.
    pub poll_interval: Duration,
    /// Flush when the buffer reaches this many records.
    pub flush_max_records: usize,
    /// Flush when this much time has passed since the last flush.
    pub flush_max_age: Duration,
    /// Case-sensitive substrings matched against sender and subject.
    pub blocklist: Vec<String>,
}

impl Default for ShortTermConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            flush_max_records: 100,
            flush_max_age: Duration::from_secs(24 * 60 * 60),
            blocklist: Vec::new(),
        }
    }
}

struct WorkerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct ShortTermStore {
    collection: Arc<dyn VectorCollection>,
    embedder: Arc<dyn EmbeddingProvider>,
    summarizer: Arc<dyn Summarizer>,
    feed: Arc<dyn FeedSource>,
    long_term: Arc<LongTermStore>,
    config: ShortTermConfig,
    /// Replay guard: id of the most recently stored feed item. Not a dedup
    /// index; it only suppresses back-to-back re-delivery.
    last_seen: Mutex<Option<String>>,
    last_flush: Mutex<Instant>,
    worker: tokio::sync::Mutex<Option<WorkerHandle>>,
}

impl ShortTermStore {
    pub fn new(
        collection: Arc<dyn VectorCollection>,
        embedder: Arc<dyn EmbeddingProvider>,
        summarizer: Arc<dyn Summarizer>,
        feed: Arc<dyn FeedSource>,
        long_term: Arc<LongTermStore>,
        config: ShortTermConfig,
    ) -> Self {
        Self {
            collection,
            embedder,
            summarizer,
            feed,
            long_term,
            config,
            last_seen: Mutex::new(None),
            last_flush: Mutex::new(Instant::now()),
            worker: tokio::sync::Mutex::new(None),
        }
    }

    /// Start the ingestion worker. A second call while the worker is alive
    /// is a no-op.
    pub async fn run_worker(self: &Arc<Self>) {
        let mut slot = self.worker.lock().await;
        if let Some(handle) = slot.as_ref() {
            if !handle.task.is_finished() {
                tracing::debug!("Ingestion worker already running");
                return;
            }
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let store = Arc::clone(self);
        let task = tokio::spawn(async move { store.worker_loop(stop_rx).await });
        *slot = Some(WorkerHandle {
            stop: stop_tx,
            task,
        });
        tracing::info!("Ingestion worker started");
    }

    /// Signal the worker to stop and wait for the loop to exit. The signal
    /// is cooperative: an in-flight fetch/embed call finishes first.
    pub async fn stop_worker(&self) {
        let handle = self.worker.lock().await.take();
        let Some(handle) = handle else {
            return;
        };

        let _ = handle.stop.send(true);
        if let Err(err) = handle.task.await {
            tracing::warn!("Ingestion worker join failed: {}", err);
        }
        tracing::info!("Ingestion worker stopped");
    }

    pub async fn worker_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .map(|handle| !handle.task.is_finished())
            .unwrap_or(false)
    }

    async fn worker_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        loop {
            if *stop.borrow() {
                break;
            }

            if let Err(err) = self.poll_once().await {
                tracing::warn!("Ingestion cycle failed: {}", err);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// One worker iteration: fetch, filter, embed, store, then evaluate the
    /// flush condition.
    pub async fn poll_once(&self) -> Result<(), ApiError> {
        match self.feed.fetch_next().await {
            Ok(Some(item)) => self.ingest_item(item).await?,
            Ok(None) => {}
            Err(err) => {
                // Transient feed failure: skip this cycle, keep the worker up.
                tracing::warn!("Feed fetch failed: {}", err);
                return Ok(());
            }
        }

        self.maybe_flush().await
    }

    async fn ingest_item(&self, item: EmailRecord) -> Result<(), ApiError> {
        if self.is_blocked(&item) {
            tracing::info!("Blocked feed item from '{}': '{}'", item.from, item.subject);
            return Ok(());
        }

        {
            let last_seen = self.last_seen.lock().map_err(ApiError::internal)?;
            if last_seen.as_deref() == Some(item.id.as_str()) {
                tracing::debug!("Skipping already-processed feed item '{}'", item.id);
                return Ok(());
            }
        }

        // A record that fails to summarize or embed is dropped whole; better
        // to omit than to index garbage.
        let summary = match self.summarizer.summarize(&item.body).await {
            Ok(summary) => summary,
            Err(err) => {
                tracing::warn!("Summarization failed for '{}', skipping: {}", item.id, err);
                return Ok(());
            }
        };

        let document = format!(
            "From: {}\nSubject: {}\nTimestamp: {}\n{}",
            item.from, item.subject, item.timestamp, summary
        );

        let (dense, late) = match self.embed_document(&document).await {
            Ok(vectors) => vectors,
            Err(err) => {
                tracing::warn!("Embedding failed for '{}', skipping: {}", item.id, err);
                return Ok(());
            }
        };

        self.collection
            .upsert(Record {
                id: point_id(&item.id),
                document,
                dense,
                late: Some(late),
                metadata: Some(json!({
                    "from": item.from,
                    "subject": item.subject,
                    "timestamp": item.timestamp,
                })),
            })
            .await?;

        *self.last_seen.lock().map_err(ApiError::internal)? = Some(item.id);
        Ok(())
    }

    async fn embed_document(&self, document: &str) -> Result<(Vec<f32>, Vec<Vec<f32>>), ApiError> {
        let dense = self.embedder.embed_dense(document).await?;
        let late = self.embedder.embed_late(document).await?;
        Ok((dense, late))
    }

    fn is_blocked(&self, item: &EmailRecord) -> bool {
        self.config
            .blocklist
            .iter()
            .any(|entry| item.from.contains(entry) || item.subject.contains(entry))
    }

    /// Fire a migration when either the record count or the elapsed time
    /// since the last flush crosses its threshold. Evaluated once per poll
    /// cycle, so actual trigger latency is bounded by the poll interval.
    pub async fn maybe_flush(&self) -> Result<(), ApiError> {
        let count = self.collection.count().await?;
        let age = self.last_flush.lock().map_err(ApiError::internal)?.elapsed();

        let count_due = self.config.flush_max_records > 0 && count >= self.config.flush_max_records;
        let age_due = age >= self.config.flush_max_age;

        if count_due || age_due {
            self.flush_to_long_term().await?;
        }
        Ok(())
    }

    /// Drain the whole buffer into the long-term store: upsert everything
    /// unchanged, delete the migrated ids here, reset the flush clock.
    ///
    /// If the delete fails after the upsert, the batch exists in both stores
    /// until the next flush re-migrates it; long-term upsert is keyed by id,
    /// so re-migration is harmless.
    pub async fn flush_to_long_term(&self) -> Result<usize, ApiError> {
        let mut records = Vec::new();
        let mut cursor = None;
        loop {
            let page = self.collection.scroll(cursor, SCROLL_PAGE).await?;
            records.extend(page.records);
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        if records.is_empty() {
            *self.last_flush.lock().map_err(ApiError::internal)? = Instant::now();
            return Ok(0);
        }

        let ids: Vec<String> = records.iter().map(|record| record.id.clone()).collect();
        self.long_term.receive(records).await?;
        self.collection.delete(&ids).await?;
        *self.last_flush.lock().map_err(ApiError::internal)? = Instant::now();

        tracing::info!("Migrated {} records into the long-term store", ids.len());
        Ok(ids.len())
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
