//! Sources of [`Document`] records awaiting indexing.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::Document;

#[async_trait]
pub trait DocumentCatalog: Send + Sync {
    /// Documents created strictly after `after` and strictly before `before`,
    /// oldest first.
    async fn fetch_documents(
        &self,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> Result<Vec<Document>>;
}

/// A JSON file holding an array of documents.
///
/// ```json
/// [{"id": "…", "type": "pdf", "title": "Handbook", "object_name": "hr/handbook.pdf",
///   "access_level": 2, "created_at": "2024-09-01T00:00:00Z", "updated_at": "2024-09-01T00:00:00Z"}]
/// ```
pub struct ManifestCatalog {
    path: PathBuf,
}

impl ManifestCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DocumentCatalog for ManifestCatalog {
    async fn fetch_documents(
        &self,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> Result<Vec<Document>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read manifest: {}", self.path.display()))?;
        let docs: Vec<Document> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse manifest: {}", self.path.display()))?;

        let mut selected: Vec<Document> = docs
            .into_iter()
            .filter(|d| d.created_at > after && d.created_at < before)
            .collect();
        selected.sort_by_key(|d| d.created_at);
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const MANIFEST: &str = r#"[
        {"id": "6f1c0a4e-3b1d-4c55-9a57-0d7a1f6c2b10", "type": "txt", "title": "Late",
         "object_name": "late.txt", "access_level": 1,
         "created_at": "2024-03-01T00:00:00Z", "updated_at": "2024-03-01T00:00:00Z"},
        {"id": "0b0e5f6a-7c8d-4e9f-a0b1-c2d3e4f5a6b7", "type": "csv", "title": "Early",
         "object_name": "early.csv", "access_level": 3,
         "created_at": "2024-02-01T00:00:00Z", "updated_at": "2024-02-01T00:00:00Z"},
        {"id": "1a2b3c4d-5e6f-4a7b-8c9d-0e1f2a3b4c5d", "type": "pdf", "title": "Old",
         "object_name": "old.pdf", "access_level": 2,
         "created_at": "2023-12-31T00:00:00Z", "updated_at": "2023-12-31T00:00:00Z"}
    ]"#;

    fn manifest() -> (tempfile::TempDir, ManifestCatalog) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs.json");
        std::fs::write(&path, MANIFEST).unwrap();
        (dir, ManifestCatalog::new(path))
    }

    #[tokio::test]
    async fn filters_by_creation_window_and_sorts() {
        let (_dir, catalog) = manifest();
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let before = Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap();

        let docs = catalog.fetch_documents(after, before).await.unwrap();
        let titles: Vec<&str> = docs.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, vec!["Early", "Late"]);
    }

    #[tokio::test]
    async fn bounds_are_exclusive() {
        let (_dir, catalog) = manifest();
        let after = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let before = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert!(catalog.fetch_documents(after, before).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_type_fails_to_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs.json");
        std::fs::write(&path, MANIFEST.replace("\"pdf\"", "\"docx\"")).unwrap();

        let err = ManifestCatalog::new(path)
            .fetch_documents(Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(), Utc::now())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to parse manifest"));
    }
}
