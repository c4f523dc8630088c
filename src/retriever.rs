//! Context retrieval for a user at a given access level.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::store::VectorStore;

pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// Embed `text` and return the `top_k` closest chunks visible at
    /// `access_level`, nearest first, followed by any tabular context.
    ///
    /// No embedding cache: every call embeds the query again.
    pub async fn query(&self, text: &str, access_level: i64, top_k: usize) -> Result<Vec<String>> {
        let vector = embed_query(self.embedder.as_ref(), text)
            .await
            .context("Failed to embed query")?;

        let matches = self
            .store
            .query(&vector, access_level, top_k)
            .await
            .with_context(|| format!("Vector query failed at access level {}", access_level))?;

        let mut context: Vec<String> = matches.into_iter().map(|m| m.text_content).collect();
        if let Some(tabular) = self.tabular_context(text, access_level).await? {
            context.push(tabular);
        }

        tracing::debug!(access_level, top_k, results = context.len(), "retrieved");
        Ok(context)
    }

    // Tabular answers are served by the tabular query engine; nothing is
    // merged into retrieval results yet.
    async fn tabular_context(&self, _text: &str, _access_level: i64) -> Result<Option<String>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VectorRecord;
    use crate::store::InMemoryVectorStore;
    use async_trait::async_trait;

    /// Maps a handful of words onto axes.
    struct AxisEmbedder;

    #[async_trait]
    impl EmbeddingProvider for AxisEmbedder {
        fn model_name(&self) -> &str {
            "axis"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    if t.contains("loan") {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    }
                })
                .collect())
        }
    }

    async fn seeded() -> Arc<InMemoryVectorStore> {
        let store = Arc::new(InMemoryVectorStore::new(3));
        store
            .upsert_vectors(
                &[VectorRecord {
                    item_id: "public".into(),
                    values: vec![0.9, 0.1],
                    text_content: "Loans are approved weekly.".into(),
                }],
                1,
            )
            .await
            .unwrap();
        store
            .upsert_vectors(
                &[VectorRecord {
                    item_id: "secret".into(),
                    values: vec![1.0, 0.0],
                    text_content: "Loan limits per branch.".into(),
                }],
                3,
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn results_respect_access_level() {
        let store = seeded().await;
        let retriever = Retriever::new(Arc::new(AxisEmbedder), store);

        let low = retriever.query("loan policy", 1, 5).await.unwrap();
        assert_eq!(low, vec!["Loans are approved weekly."]);

        let high = retriever.query("loan policy", 3, 5).await.unwrap();
        assert_eq!(
            high,
            vec!["Loan limits per branch.", "Loans are approved weekly."]
        );
    }

    #[tokio::test]
    async fn out_of_range_level_fails() {
        let store = seeded().await;
        let retriever = Retriever::new(Arc::new(AxisEmbedder), store);
        assert!(retriever.query("loan", 4, 5).await.is_err());
    }
}
