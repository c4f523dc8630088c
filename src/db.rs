use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::Config;

pub async fn connect(config: &Config) -> Result<PgPool> {
    let url = config.database_url()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.db.max_connections)
        .connect(url)
        .await
        .context("Failed to connect to Postgres")?;

    Ok(pool)
}
