//! Document indexing pipeline.
//!
//! Pulls newly created documents from a [`DocumentCatalog`], downloads each
//! through an [`ObjectStore`] presigned URL, and routes it by type:
//!
//! ```text
//! catalog ─▶ presign ─▶ fetch ─▶ processor ─┬─▶ CSV/XLSX ─▶ SQL table + metadata_table
//!                                           └─▶ PDF/TXT  ─▶ nodes ─▶ vector tiers
//! ```
//!
//! The first failing document aborts the run; documents already indexed
//! stay indexed.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::catalog::DocumentCatalog;
use crate::completion::CompletionModel;
use crate::config::{ChunkingConfig, Config};
use crate::models::{Document, NodeMetadata};
use crate::node_storage::NodeStorage;
use crate::object_store::ObjectStore;
use crate::processor::{self, Processed, ProcessorContext};
use crate::sql::{sanitize_table_name, TableMetadata, TabularStore};

/// Counts for one indexing run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub documents: usize,
    pub tables: usize,
    pub nodes: usize,
}

pub struct DocumentIndexer {
    catalog: Arc<dyn DocumentCatalog>,
    objects: Arc<dyn ObjectStore>,
    tables: Arc<dyn TabularStore>,
    nodes: NodeStorage,
    model: Arc<dyn CompletionModel>,
    chunking: ChunkingConfig,
    preview_rows: usize,
    presign_expiry_secs: u64,
}

impl DocumentIndexer {
    pub fn new(
        config: &Config,
        catalog: Arc<dyn DocumentCatalog>,
        objects: Arc<dyn ObjectStore>,
        tables: Arc<dyn TabularStore>,
        nodes: NodeStorage,
        model: Arc<dyn CompletionModel>,
    ) -> Self {
        Self {
            catalog,
            objects,
            tables,
            nodes,
            model,
            chunking: config.chunking.clone(),
            preview_rows: config.tabular.preview_rows,
            presign_expiry_secs: config.storage.presign_expiry_secs,
        }
    }

    /// Index every document created after `start_date` and before now.
    pub async fn process_documents(&self, start_date: DateTime<Utc>) -> Result<IndexReport> {
        let docs = self
            .catalog
            .fetch_documents(start_date, Utc::now())
            .await
            .context("Failed to fetch documents from catalog")?;
        tracing::info!(count = docs.len(), since = %start_date, "documents to index");

        let mut report = IndexReport::default();
        for doc in &docs {
            self.index_document(doc, &mut report).await.with_context(|| {
                format!("Failed to index document {} ({})", doc.id, doc.object_name)
            })?;
            report.documents += 1;
        }

        tracing::info!(
            documents = report.documents,
            tables = report.tables,
            nodes = report.nodes,
            "indexing complete"
        );
        Ok(report)
    }

    async fn index_document(&self, doc: &Document, report: &mut IndexReport) -> Result<()> {
        doc.validate()?;

        let url = self
            .objects
            .presigned_url(&doc.object_name, self.presign_expiry_secs)
            .await?;
        let bytes = self.objects.fetch(&url).await?;

        let ctx = ProcessorContext {
            chunking: &self.chunking,
            preview_rows: self.preview_rows,
            model: self.model.as_ref(),
        };
        let processed = processor::process(
            doc.doc_type,
            &bytes,
            &doc.object_name,
            doc.sheet_name.as_deref(),
            &ctx,
        )
        .await?;

        match processed {
            Processed::Tabular { table, info } => {
                let table_name = sanitize_table_name(&doc.title);
                self.tables
                    .replace_table(&table_name, &table, doc.access_level)
                    .await?;
                self.tables
                    .upsert_metadata(&TableMetadata::for_document(
                        doc,
                        &table_name,
                        &info.table_summary,
                    ))
                    .await?;
                tracing::info!(
                    document = %doc.id,
                    table = %table_name,
                    rows = table.rows.len(),
                    "tabular document indexed"
                );
                report.tables += 1;
            }
            Processed::Nodes(mut nodes) => {
                if nodes.is_empty() {
                    tracing::warn!(document = %doc.id, "document produced no text; skipped");
                    return Ok(());
                }
                let metadata = NodeMetadata::from_document(doc);
                for node in &mut nodes {
                    node.metadata = metadata.clone();
                }
                let stored = self
                    .nodes
                    .store_document_nodes(&doc.id.to_string(), &nodes, doc.access_level)
                    .await?;
                tracing::info!(document = %doc.id, nodes = stored, "text document indexed");
                report.nodes += stored;
            }
        }
        Ok(())
    }
}

/// Parse a `YYYY-MM-DD` date as midnight UTC.
pub fn parse_start_date(s: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}': expected YYYY-MM-DD", s))?;
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| anyhow::anyhow!("Invalid date '{}'", s))
}
