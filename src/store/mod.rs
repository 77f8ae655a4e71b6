//! The two-tier corpus: a long-term archival store and a short-term feed
//! buffer, both backed by a `VectorCollection` and sharing one retrieval
//! pipeline (`smart_query`).

mod long_term;
mod short_term;

pub use long_term::{LongTermStore, MAX_CHUNK_CHARS};
pub use short_term::{ShortTermConfig, ShortTermStore};

use std::collections::HashSet;

use crate::core::errors::ApiError;
use crate::providers::EmbeddingProvider;
use crate::vector::VectorCollection;

/// Page size for full-collection scans (flush, substring fallback).
pub(crate) const SCROLL_PAGE: usize = 256;

/// Knobs for one `smart_query` call.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Dense prefetch size for the hybrid funnel.
    pub topk: usize,
    /// Number of ranked results returned.
    pub top_l: usize,
    /// Re-rank the prefetch set with late-interaction MaxSim.
    pub use_late: bool,
    /// Also scan the whole collection for substring matches.
    pub doc_search: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            topk: 15,
            top_l: 10,
            use_late: true,
            doc_search: true,
        }
    }
}

/// Ranked retrieval with an exact-match safety net.
///
/// Embedding-only retrieval can miss lexically rare entities (names, ids),
/// so when `doc_search` is set the entire collection is scanned for
/// case-insensitive substring matches and the hits are appended after the
/// ranked results, de-duplicated by id with ranked hits winning.
pub(crate) async fn smart_query(
    collection: &dyn VectorCollection,
    embedder: &dyn EmbeddingProvider,
    query_text: &str,
    options: &QueryOptions,
) -> Result<Vec<String>, ApiError> {
    let dense_query = embedder.embed_dense(query_text).await?;

    let ranked = if options.use_late {
        let late_query = embedder.embed_late(query_text).await?;
        collection
            .search_hybrid(&dense_query, &late_query, options.topk, options.top_l)
            .await?
    } else {
        collection.search_dense(&dense_query, options.top_l).await?
    };

    let mut seen: HashSet<String> = HashSet::new();
    let mut documents = Vec::with_capacity(ranked.len());
    for hit in ranked {
        if seen.insert(hit.record.id.clone()) {
            documents.push(hit.record.document);
        }
    }

    if options.doc_search {
        let needle = query_text.to_lowercase();
        let mut cursor = None;
        loop {
            let page = collection.scroll(cursor, SCROLL_PAGE).await?;
            for record in page.records {
                if seen.contains(&record.id) {
                    continue;
                }
                if record.document.to_lowercase().contains(&needle) {
                    seen.insert(record.id);
                    documents.push(record.document);
                }
            }
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
    }

    Ok(documents)
}
