//! In-memory [`VectorStore`] for tests and local runs.
//!
//! One `HashMap` per tier behind a `std::sync::RwLock`. Queries are
//! brute-force Euclidean distance over the tier.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::euclidean_distance;
use crate::error::check_access_level;
use crate::models::{QueryMatch, VectorRecord};

use super::VectorStore;

pub struct InMemoryVectorStore {
    total_levels: u32,
    tiers: RwLock<BTreeMap<u32, HashMap<String, VectorRecord>>>,
}

impl InMemoryVectorStore {
    pub fn new(total_levels: u32) -> Self {
        let tiers = (1..=total_levels).map(|l| (l, HashMap::new())).collect();
        Self {
            total_levels,
            tiers: RwLock::new(tiers),
        }
    }

    /// Item ids stored in tier `level`, sorted.
    pub fn tier_item_ids(&self, level: u32) -> Vec<String> {
        let tiers = self.tiers.read().unwrap();
        let mut ids: Vec<String> = tiers
            .get(&level)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Number of records in tier `level`.
    pub fn tier_len(&self, level: u32) -> usize {
        let tiers = self.tiers.read().unwrap();
        tiers.get(&level).map(|t| t.len()).unwrap_or(0)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn total_levels(&self) -> u32 {
        self.total_levels
    }

    async fn upsert_vectors(&self, vectors: &[VectorRecord], access_level: i64) -> Result<()> {
        let level = check_access_level(access_level, self.total_levels)?;
        let mut tiers = self.tiers.write().unwrap();
        for tier in level..=self.total_levels {
            let table = tiers.entry(tier).or_default();
            for v in vectors {
                table.insert(v.item_id.clone(), v.clone());
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        access_level: i64,
        top_k: usize,
    ) -> Result<Vec<QueryMatch>> {
        let level = check_access_level(access_level, self.total_levels)?;
        let tiers = self.tiers.read().unwrap();
        let mut matches: Vec<QueryMatch> = tiers
            .get(&level)
            .map(|t| {
                t.values()
                    .map(|r| QueryMatch {
                        item_id: r.item_id.clone(),
                        text_content: r.text_content.clone(),
                        distance: euclidean_distance(vector, &r.values),
                    })
                    .collect()
            })
            .unwrap_or_default();

        matches.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.item_id.cmp(&b.item_id))
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
