//! Feed source contract: timestamped text records produced by an external
//! scraper. The in-repo implementation (`SpoolFeed`) consumes JSON files
//! dropped into a spool directory; the scraper itself lives outside this
//! service.

mod spool;

pub use spool::SpoolFeed;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

/// One email-shaped feed item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRecord {
    /// Source message id; normalized with `vector::point_id` at ingestion.
    pub id: String,
    #[serde(alias = "from_")]
    pub from: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    /// RFC 3339 timestamp as produced by the scraper.
    #[serde(default, alias = "date")]
    pub timestamp: String,
}

/// Pull-based feed: `Ok(None)` means no new item this poll.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_next(&self) -> Result<Option<EmailRecord>, ApiError>;
}
