//! Embed nodes and hand them to the vector store.
//!
//! All nodes of a call are embedded before anything is written, so an
//! embedding failure leaves the store untouched. Writes go out as a single
//! [`VectorStore::upsert_vectors`] call.

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::embedding::EmbeddingProvider;
use crate::error::RagError;
use crate::models::{Node, VectorRecord};
use crate::store::VectorStore;

pub struct NodeStorage {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    batch_size: usize,
}

impl NodeStorage {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        batch_size: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Store nodes with position-based ids `"0"..."n-1"`.
    ///
    /// Ids restart at zero on every call, so a later call overwrites the
    /// records of an earlier one. Use [`store_document_nodes`] when several
    /// documents share the tiers.
    ///
    /// [`store_document_nodes`]: NodeStorage::store_document_nodes
    pub async fn store_nodes(&self, nodes: &[Node], access_level: i64) -> Result<usize> {
        self.store_with_ids(nodes, access_level, |i| i.to_string())
            .await
    }

    /// Store nodes with ids `"{document_id}:{index}"`.
    pub async fn store_document_nodes(
        &self,
        document_id: &str,
        nodes: &[Node],
        access_level: i64,
    ) -> Result<usize> {
        self.store_with_ids(nodes, access_level, |i| format!("{}:{}", document_id, i))
            .await
    }

    async fn store_with_ids<F>(&self, nodes: &[Node], access_level: i64, id_for: F) -> Result<usize>
    where
        F: Fn(usize) -> String,
    {
        if nodes.is_empty() {
            return Err(RagError::NoVectorsToStore.into());
        }

        let texts: Vec<String> = nodes.iter().map(|n| n.text.clone()).collect();
        let embeddings = self.embed_all(&texts).await?;

        let records: Vec<VectorRecord> = texts
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (text, values))| VectorRecord {
                item_id: id_for(i),
                values,
                text_content: text,
            })
            .collect();

        self.store
            .upsert_vectors(&records, access_level)
            .await
            .with_context(|| format!("Failed to store {} vectors", records.len()))?;

        tracing::info!(
            count = records.len(),
            access_level,
            model = self.embedder.model_name(),
            "nodes stored"
        );
        Ok(records.len())
    }

    async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let dims = self.embedder.dims();
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let vectors = self
                .embedder
                .embed(batch)
                .await
                .context("Failed to embed nodes")?;
            if vectors.len() != batch.len() {
                bail!(
                    "Embedding provider returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                );
            }
            if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
                bail!(
                    "Embedding has {} dimensions, expected {}",
                    bad.len(),
                    dims
                );
            }
            out.extend(vectors);
        }

        Ok(out)
    }
}
