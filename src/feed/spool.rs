use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{EmailRecord, FeedSource};
use crate::core::errors::ApiError;

/// Reads feed records from `*.json` files in a spool directory, oldest
/// filename first. A consumed file is deleted; a file that fails to parse is
/// renamed to `*.bad` and skipped so one corrupt drop cannot wedge the feed.
pub struct SpoolFeed {
    dir: PathBuf,
}

impl SpoolFeed {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn next_file(&self) -> Result<Option<PathBuf>, ApiError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(ApiError::internal(err)),
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().map(|ext| ext == "json").unwrap_or(false))
            .collect();

        files.sort();
        Ok(files.into_iter().next())
    }

    fn quarantine(path: &Path) {
        let target = path.with_extension("bad");
        if let Err(err) = std::fs::rename(path, &target) {
            tracing::warn!("Failed to quarantine {}: {}", path.display(), err);
        }
    }
}

#[async_trait]
impl FeedSource for SpoolFeed {
    async fn fetch_next(&self) -> Result<Option<EmailRecord>, ApiError> {
        let Some(path) = self.next_file()? else {
            return Ok(None);
        };

        let raw = std::fs::read_to_string(&path).map_err(ApiError::internal)?;
        match serde_json::from_str::<EmailRecord>(&raw) {
            Ok(record) => {
                std::fs::remove_file(&path).map_err(ApiError::internal)?;
                Ok(Some(record))
            }
            Err(err) => {
                tracing::warn!("Unparsable feed file {}: {}", path.display(), err);
                Self::quarantine(&path);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_record(dir: &Path, name: &str, id: &str) {
        let record = serde_json::json!({
            "id": id,
            "from": "alice@example.org",
            "subject": "status",
            "body": "weekly update",
            "timestamp": "2025-06-01T10:00:00Z",
        });
        std::fs::write(dir.join(name), record.to_string()).unwrap();
    }

    #[tokio::test]
    async fn consumes_oldest_file_first_and_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        write_record(dir.path(), "002.json", "second");
        write_record(dir.path(), "001.json", "first");

        let feed = SpoolFeed::new(dir.path().to_path_buf());

        let first = feed.fetch_next().await.unwrap().unwrap();
        assert_eq!(first.id, "first");
        let second = feed.fetch_next().await.unwrap().unwrap();
        assert_eq!(second.id, "second");
        assert!(feed.fetch_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_files_are_quarantined_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();

        let feed = SpoolFeed::new(dir.path().to_path_buf());
        assert!(feed.fetch_next().await.unwrap().is_none());
        assert!(dir.path().join("bad.bad").exists());
    }

    #[tokio::test]
    async fn missing_directory_yields_empty_poll() {
        let feed = SpoolFeed::new(PathBuf::from("/nonexistent/ragline-spool"));
        assert!(feed.fetch_next().await.unwrap().is_none());
    }
}
