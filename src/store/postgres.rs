//! Postgres + pgvector [`VectorStore`].
//!
//! Each tier is a table `index_l{n}` with a `vector(dims)` column. Upserts
//! write every tier from the record's level upward inside one transaction;
//! queries use pgvector's `<->` (Euclidean) operator on a single tier.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use pgvector::Vector;
use sqlx::{PgPool, Row};

use crate::config::Config;
use crate::error::check_access_level;
use crate::migrate::ensure_tier_tables;
use crate::models::{QueryMatch, VectorRecord};

use super::{tier_table_name, VectorStore};

pub struct PgVectorStore {
    pool: PgPool,
    total_levels: u32,
    dims: usize,
    closed: AtomicBool,
}

impl PgVectorStore {
    /// Connect and make sure the extension and tier tables exist. A
    /// connection failure here is fatal to the caller.
    pub async fn connect(config: &Config) -> Result<Self> {
        let dims = config
            .embedding
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims is required for the pgvector store"))?;
        let pool = crate::db::connect(config).await?;
        Self::from_pool(pool, config.access.total_levels, dims).await
    }

    pub async fn from_pool(pool: PgPool, total_levels: u32, dims: usize) -> Result<Self> {
        ensure_tier_tables(&pool, total_levels, dims).await?;
        tracing::info!(total_levels, dims, "vector tiers ready");
        Ok(Self {
            pool,
            total_levels,
            dims,
            closed: AtomicBool::new(false),
        })
    }

    fn check_dims(&self, values: &[f32]) -> Result<()> {
        if values.len() != self.dims {
            bail!(
                "Vector has {} dimensions, tier tables expect {}",
                values.len(),
                self.dims
            );
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    fn total_levels(&self) -> u32 {
        self.total_levels
    }

    async fn upsert_vectors(&self, vectors: &[VectorRecord], access_level: i64) -> Result<()> {
        let level = check_access_level(access_level, self.total_levels)?;
        for v in vectors {
            self.check_dims(&v.values)?;
        }

        let mut tx = self.pool.begin().await?;
        for tier in level..=self.total_levels {
            let table = tier_table_name(tier);
            let sql = format!(
                r#"
                INSERT INTO {table} (item_id, embedding, text_content)
                VALUES ($1, $2, $3)
                ON CONFLICT (item_id) DO UPDATE SET
                    embedding = EXCLUDED.embedding,
                    text_content = EXCLUDED.text_content
                "#
            );
            for v in vectors {
                sqlx::query(&sql)
                    .bind(&v.item_id)
                    .bind(Vector::from(v.values.clone()))
                    .bind(&v.text_content)
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("Failed to upsert {} into {}", v.item_id, table))?;
            }
        }
        tx.commit().await?;

        tracing::debug!(
            count = vectors.len(),
            from_level = level,
            to_level = self.total_levels,
            "vectors upserted"
        );
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        access_level: i64,
        top_k: usize,
    ) -> Result<Vec<QueryMatch>> {
        let level = check_access_level(access_level, self.total_levels)?;
        self.check_dims(vector)?;
        let table = tier_table_name(level);
        let limit = i64::try_from(top_k).context("top_k does not fit in a SQL LIMIT")?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT item_id, text_content, embedding <-> $1 AS distance
            FROM {table}
            ORDER BY distance
            LIMIT $2
            "#
        ))
        .bind(Vector::from(vector.to_vec()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Vector query on {} failed", table))?;

        rows.iter()
            .map(|row| -> Result<QueryMatch> {
                Ok(QueryMatch {
                    item_id: row.try_get("item_id")?,
                    text_content: row.try_get("text_content")?,
                    distance: row.try_get("distance")?,
                })
            })
            .collect()
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.pool.close().await;
        }
        Ok(())
    }
}
