//! Postgres implementation of [`SqlExecutor`] and [`TabularStore`].
//!
//! Read results are converted to text inside the database
//! (`json_each_text(row_to_json(..))`) so any column type, `NUMERIC`
//! aggregates included, comes back as a string without per-type decoding.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};

use super::engine::{ColumnInfo, SqlExecutor, TableMetadata, TabularStore};
use super::quote_ident;
use crate::migrate::ensure_metadata_table;
use crate::models::Table;

/// Postgres caps bind parameters per statement at 65535.
const MAX_BIND_PARAMS: usize = 65_535;

#[derive(Clone)]
pub struct PgTabular {
    pool: PgPool,
}

impl PgTabular {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SqlExecutor for PgTabular {
    async fn table_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows = sqlx::query(
            r#"
            SELECT column_name, data_type
            FROM information_schema.columns
            WHERE table_schema = current_schema() AND table_name = $1
            ORDER BY ordinal_position
            "#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ColumnInfo> {
                Ok(ColumnInfo {
                    name: row.try_get("column_name")?,
                    data_type: row.try_get("data_type")?,
                })
            })
            .collect()
    }

    async fn fetch_rows(&self, sql: &str) -> Result<Vec<Vec<String>>> {
        let wrapped = format!(
            r#"
            SELECT ARRAY(
                SELECT e.value
                FROM json_each_text(row_to_json(q)) WITH ORDINALITY AS e(key, value, ord)
                ORDER BY e.ord
            ) AS cells
            FROM ({}) AS q
            "#,
            sql
        );
        let rows = sqlx::query(&wrapped).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| -> Result<Vec<String>> {
                let cells: Vec<Option<String>> = row.try_get("cells")?;
                Ok(cells
                    .into_iter()
                    .map(|c| c.unwrap_or_else(|| "NULL".to_string()))
                    .collect())
            })
            .collect()
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let result = sqlx::query(sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl TabularStore for PgTabular {
    async fn replace_table(&self, name: &str, table: &Table, access_level: i64) -> Result<()> {
        // An access_level column in the source is replaced by the document's level.
        let keep: Vec<usize> = (0..table.columns.len())
            .filter(|&i| !table.columns[i].eq_ignore_ascii_case("access_level"))
            .collect();
        let kinds = table.column_kinds();

        let mut defs: Vec<String> = keep
            .iter()
            .map(|&i| format!("{} {}", quote_ident(&table.columns[i]), kinds[i].sql_type()))
            .collect();
        defs.push("access_level BIGINT NOT NULL".to_string());

        let ident = quote_ident(name);
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {}", ident))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("CREATE TABLE {} ({})", ident, defs.join(", ")))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to create table {}", name))?;

        let column_list = keep
            .iter()
            .map(|&i| quote_ident(&table.columns[i]))
            .chain(std::iter::once("access_level".to_string()))
            .collect::<Vec<_>>()
            .join(", ");
        let per_row = keep.len() + 1;
        let rows_per_insert = (MAX_BIND_PARAMS / per_row).max(1);

        for batch in table.rows.chunks(rows_per_insert) {
            let mut placeholders = Vec::with_capacity(batch.len());
            let mut n = 0usize;
            for _ in batch {
                let mut cells = Vec::with_capacity(per_row);
                for &i in &keep {
                    n += 1;
                    cells.push(format!("CAST(${} AS {})", n, kinds[i].sql_type()));
                }
                n += 1;
                cells.push(format!("${}", n));
                placeholders.push(format!("({})", cells.join(", ")));
            }

            let sql = format!(
                "INSERT INTO {} ({}) VALUES {}",
                ident,
                column_list,
                placeholders.join(", ")
            );
            let mut query = sqlx::query(&sql);
            for row in batch {
                for &i in &keep {
                    let value = row.get(i).map(|v| v.trim()).filter(|v| !v.is_empty());
                    query = query.bind(value.map(|v| v.to_string()));
                }
                query = query.bind(access_level);
            }
            query
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to load rows into {}", name))?;
        }

        tx.commit().await?;
        tracing::info!(table = name, rows = table.rows.len(), access_level, "table replaced");
        Ok(())
    }

    async fn upsert_metadata(&self, meta: &TableMetadata) -> Result<()> {
        ensure_metadata_table(&self.pool).await?;

        sqlx::query(
            r#"
            INSERT INTO metadata_table
                (document_id, title, type, object_name, table_name,
                 created_at, updated_at, access_level, summary)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (document_id) DO UPDATE SET
                title = EXCLUDED.title,
                type = EXCLUDED.type,
                object_name = EXCLUDED.object_name,
                table_name = EXCLUDED.table_name,
                created_at = EXCLUDED.created_at,
                updated_at = EXCLUDED.updated_at,
                access_level = EXCLUDED.access_level,
                summary = EXCLUDED.summary
            "#,
        )
        .bind(meta.document_id.to_string())
        .bind(&meta.title)
        .bind(meta.doc_type.as_str())
        .bind(&meta.object_name)
        .bind(&meta.table_name)
        .bind(meta.created_at)
        .bind(meta.updated_at)
        .bind(meta.access_level as i32)
        .bind(&meta.summary)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert metadata for {}", meta.document_id))?;

        Ok(())
    }
}
