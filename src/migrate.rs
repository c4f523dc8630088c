use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::config::Config;
use crate::db;
use crate::store::tier_table_name;

/// Create the schema from scratch or bring an existing one up to date:
/// the `vector` extension, one table per access tier, and the metadata
/// table describing ingested tabular documents.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let dims = config
        .embedding
        .dims
        .ok_or_else(|| anyhow::anyhow!("embedding.dims must be set to create the vector tiers"))?;
    let pool = db::connect(config).await?;

    ensure_tier_tables(&pool, config.access.total_levels, dims).await?;
    ensure_metadata_table(&pool).await?;

    pool.close().await;
    Ok(())
}

pub async fn ensure_tier_tables(pool: &PgPool, total_levels: u32, dims: usize) -> Result<()> {
    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
        .execute(pool)
        .await
        .context("Failed to create the vector extension")?;

    for level in 1..=total_levels {
        let table = tier_table_name(level);
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id BIGSERIAL PRIMARY KEY,
                item_id TEXT UNIQUE NOT NULL,
                embedding vector({dims}),
                text_content TEXT NOT NULL DEFAULT ''
            )
            "#
        ))
        .execute(pool)
        .await
        .with_context(|| format!("Failed to create {}", table))?;

        // Tables created before text_content was stored alongside vectors.
        sqlx::query(&format!(
            "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS text_content TEXT NOT NULL DEFAULT ''"
        ))
        .execute(pool)
        .await?;
    }

    Ok(())
}

pub async fn ensure_metadata_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metadata_table (
            id SERIAL PRIMARY KEY,
            document_id VARCHAR NOT NULL UNIQUE,
            title VARCHAR,
            type VARCHAR,
            object_name VARCHAR,
            table_name VARCHAR,
            created_at TIMESTAMPTZ,
            updated_at TIMESTAMPTZ,
            access_level INTEGER,
            summary TEXT
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create metadata_table")?;

    Ok(())
}
