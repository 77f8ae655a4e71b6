//! Retrieval orchestrator: the single entry point the agent's tool layer
//! calls. Merges both stores, enforces the context budget, and always
//! produces a parsable text block.

use std::sync::Arc;

use serde_json::Value;

use crate::store::{LongTermStore, QueryOptions, ShortTermStore};

/// Approximate chars-per-token used to convert the token budget.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub query: QueryOptions,
    /// Context budget in tokens; the char budget is `tokens * 4`.
    pub max_context_tokens: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            query: QueryOptions::default(),
            max_context_tokens: 1024,
        }
    }
}

impl RetrievalConfig {
    /// Read the `retrieval` section of the config tree, falling back to
    /// defaults field by field.
    pub fn from_config(config: &Value) -> Self {
        let defaults = Self::default();
        let section = config.get("retrieval");
        let get_usize = |key: &str, fallback: usize| {
            section
                .and_then(|v| v.get(key))
                .and_then(|v| v.as_u64())
                .map(|v| v as usize)
                .unwrap_or(fallback)
        };
        let get_bool = |key: &str, fallback: bool| {
            section
                .and_then(|v| v.get(key))
                .and_then(|v| v.as_bool())
                .unwrap_or(fallback)
        };

        Self {
            query: QueryOptions {
                topk: get_usize("topk", defaults.query.topk),
                top_l: get_usize("top_l", defaults.query.top_l),
                use_late: get_bool("use_late", defaults.query.use_late),
                doc_search: get_bool("doc_search", defaults.query.doc_search),
            },
            max_context_tokens: get_usize("max_context_tokens", defaults.max_context_tokens),
        }
    }
}

pub struct Retriever {
    long_term: Arc<LongTermStore>,
    short_term: Arc<ShortTermStore>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        long_term: Arc<LongTermStore>,
        short_term: Arc<ShortTermStore>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            long_term,
            short_term,
            config,
        }
    }

    /// Query both stores and format one numbered block.
    ///
    /// Merge policy: long-term results first, then short-term, de-duplicated
    /// by document text. Results are taken in that order until one would
    /// exceed the remaining char budget; that result and everything after it
    /// are dropped whole, never truncated mid-string.
    ///
    /// Store or provider failures degrade to the no-results line; this
    /// method never fails, so the agent loop always receives parsable tool
    /// output.
    pub async fn retrieve(&self, query_text: &str) -> String {
        let long_results = match self.long_term.smart_query(query_text, &self.config.query).await
        {
            Ok(results) => results,
            Err(err) => {
                tracing::warn!("Long-term retrieval failed: {}", err);
                Vec::new()
            }
        };
        let short_results = match self
            .short_term
            .smart_query(query_text, &self.config.query)
            .await
        {
            Ok(results) => results,
            Err(err) => {
                tracing::warn!("Short-term retrieval failed: {}", err);
                Vec::new()
            }
        };

        let budget = self.config.max_context_tokens * CHARS_PER_TOKEN;
        let mut total_chars = 0;
        let mut selected = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for result in long_results.into_iter().chain(short_results) {
            if !seen.insert(result.clone()) {
                continue;
            }
            if total_chars + result.len() > budget {
                break;
            }
            total_chars += result.len();
            selected.push(result);
        }

        let mut lines = vec![format!("This is the query by the user: '{}'", query_text)];
        if selected.is_empty() {
            lines.push("No results found.".to_string());
        } else {
            for (index, result) in selected.iter().enumerate() {
                lines.push(format!("{}. {}", index + 1, result));
            }
        }
        lines.join("\n")
    }
}
