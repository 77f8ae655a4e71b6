//! Hosted text-service contracts: embeddings and summarization.
//!
//! Both are thin HTTP collaborators; the crate never computes embeddings
//! itself. `RemoteEmbedder` / `RemoteSummarizer` in the `remote` module talk
//! to the deployed endpoints.

mod remote;

pub use remote::{RemoteEmbedder, RemoteSummarizer};

use async_trait::async_trait;

use crate::core::errors::ApiError;

/// Maps text to a fixed-dimension dense vector and to a token-level
/// late-interaction matrix. Repeated calls on identical text must rank
/// consistently; bit-exact reproducibility is not required.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Dense output dimension. Collections are created with this value.
    fn dimension(&self) -> usize;

    async fn embed_dense(&self, text: &str) -> Result<Vec<f32>, ApiError>;

    /// One row per token; row width is the late-interaction dimension.
    async fn embed_late(&self, text: &str) -> Result<Vec<Vec<f32>>, ApiError>;
}

/// Condenses a feed item body before it is embedded and stored.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String, ApiError>;
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Deterministic bag-of-words embedder for tests: texts sharing words get
    /// similar dense vectors, and each token contributes one late row.
    pub struct HashEmbedder {
        dimension: usize,
    }

    impl HashEmbedder {
        pub fn new(dimension: usize) -> Self {
            Self { dimension }
        }

        fn token_bucket(&self, token: &str) -> usize {
            let mut hash: u64 = 1469598103934665603;
            for byte in token.to_lowercase().bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(1099511628211);
            }
            (hash % self.dimension as u64) as usize
        }

        fn token_row(&self, token: &str) -> Vec<f32> {
            let mut row = vec![0.0; self.dimension];
            row[self.token_bucket(token)] = 1.0;
            row
        }
    }

    #[async_trait]
    impl EmbeddingProvider for HashEmbedder {
        fn dimension(&self) -> usize {
            self.dimension
        }

        async fn embed_dense(&self, text: &str) -> Result<Vec<f32>, ApiError> {
            let mut vector = vec![0.0; self.dimension];
            for token in text.split_whitespace() {
                vector[self.token_bucket(token)] += 1.0;
            }
            Ok(vector)
        }

        async fn embed_late(&self, text: &str) -> Result<Vec<Vec<f32>>, ApiError> {
            let rows: Vec<Vec<f32>> = text
                .split_whitespace()
                .map(|token| self.token_row(token))
                .collect();
            if rows.is_empty() {
                return Ok(vec![vec![0.0; self.dimension]]);
            }
            Ok(rows)
        }
    }

    /// Summarizer stub that echoes its input unchanged.
    pub struct EchoSummarizer;

    #[async_trait]
    impl Summarizer for EchoSummarizer {
        async fn summarize(&self, text: &str) -> Result<String, ApiError> {
            Ok(text.to_string())
        }
    }

    /// Summarizer stub that always fails, for skip-on-error tests.
    pub struct FailingSummarizer;

    #[async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(&self, _text: &str) -> Result<String, ApiError> {
            Err(ApiError::ServiceUnavailable)
        }
    }

    #[tokio::test]
    async fn hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::new(16);
        let first = embedder.embed_dense("alpha beta").await.unwrap();
        let second = embedder.embed_dense("alpha beta").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn shared_words_score_closer_than_disjoint_words() {
        let embedder = HashEmbedder::new(32);
        let query = embedder.embed_dense("quarterly budget").await.unwrap();
        let related = embedder
            .embed_dense("budget meeting notes")
            .await
            .unwrap();
        let unrelated = embedder.embed_dense("zebra migration").await.unwrap();

        let close = crate::vector::cosine_similarity(&query, &related);
        let far = crate::vector::cosine_similarity(&query, &unrelated);
        assert!(close > far);
    }
}
