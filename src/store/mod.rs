//! Tiered vector storage.
//!
//! Vectors live in one table per access level, `index_l1` through
//! `index_lN`. A record written at level `L` is duplicated into every tier
//! from `L` to `N`, so a reader at level `K` sees everything written at
//! levels `<= K` by searching tier `K` alone. Reads never join tiers.
//!
//! | Backend | Module | Use |
//! |---------|--------|-----|
//! | [`PgVectorStore`] | [`postgres`] | Postgres + pgvector, production |
//! | [`InMemoryVectorStore`] | [`memory`] | tests, local experiments |

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{QueryMatch, VectorRecord};

pub use memory::InMemoryVectorStore;
pub use postgres::PgVectorStore;

/// Storage backend for access-tiered vectors.
///
/// Implementations must be `Send + Sync`; one handle is shared by every
/// request.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Number of tiers `N`; valid levels are `1..=N`.
    fn total_levels(&self) -> u32;

    /// Insert-or-update each record, keyed by `item_id`, into every tier
    /// from `access_level` up to `N`.
    async fn upsert_vectors(&self, vectors: &[VectorRecord], access_level: i64) -> Result<()>;

    /// Nearest `top_k` records in tier `access_level`, ascending Euclidean
    /// distance.
    async fn query(&self, vector: &[f32], access_level: i64, top_k: usize)
        -> Result<Vec<QueryMatch>>;

    /// Release backend resources. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// Name of the table holding tier `level`.
pub fn tier_table_name(level: u32) -> String {
    format!("index_l{}", level)
}
