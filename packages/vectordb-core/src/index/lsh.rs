//! Locality-sensitive hashing index: random hyperplane sign-hashing into
//! `num_tables` independent hash tables, unioned at query time.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use uuid::Uuid;

use crate::concurrency::ReaderWriterLock;
use crate::error::{CoreError, Result};
use crate::rng::standard_normal;

use super::contract::{SearchHit, VectorIndex};
use super::metric::Metric;

#[derive(Debug, Clone)]
pub struct LshConfig {
    pub dimension: usize,
    pub metric: Metric,
    pub num_tables: usize,
    pub key_size: usize,
    pub seed: u64,
}

impl LshConfig {
    pub fn new(dimension: usize) -> Self {
        Self { dimension, metric: Metric::Euclidean, num_tables: 10, key_size: 10, seed: 42 }
    }
}

struct LshState {
    tables: Vec<HashMap<String, HashSet<Uuid>>>,
    vectors: HashMap<Uuid, Vec<f32>>,
}

/// LSH ANN backend. See `SPEC_FULL.md` §4.3.1 for the algorithm.
pub struct LshIndex {
    config: LshConfig,
    /// `hyperplanes[table][row]` is one `dimension`-length Gaussian vector;
    /// a vector's hash bit for `(table, row)` is `sign(hyperplane · vector)`.
    hyperplanes: Vec<Vec<Vec<f32>>>,
    state: ReaderWriterLock<LshState>,
}

impl LshIndex {
    pub fn new(config: LshConfig) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let hyperplanes = (0..config.num_tables)
            .map(|_| {
                (0..config.key_size)
                    .map(|_| (0..config.dimension).map(|_| standard_normal(&mut rng)).collect())
                    .collect()
            })
            .collect();
        let tables = (0..config.num_tables).map(|_| HashMap::new()).collect();
        Self { config, hyperplanes, state: ReaderWriterLock::new(LshState { tables, vectors: HashMap::new() }) }
    }

    fn hash_vector(&self, vector: &[f32], table_idx: usize) -> String {
        self.hyperplanes[table_idx]
            .iter()
            .map(|row| {
                let projection: f32 = row.iter().zip(vector.iter()).map(|(h, v)| h * v).sum();
                if projection > 0.0 {
                    '1'
                } else {
                    '0'
                }
            })
            .collect()
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dimension {
            return Err(CoreError::dimension_mismatch(self.config.dimension, vector.len()));
        }
        Ok(())
    }

    fn insert_locked(state: &mut LshState, hyperplanes: &[Vec<Vec<f32>>], id: Uuid, vector: Vec<f32>) {
        for (t, table) in state.tables.iter_mut().enumerate() {
            let hash = hyperplanes[t]
                .iter()
                .map(|row| {
                    let projection: f32 = row.iter().zip(vector.iter()).map(|(h, v)| h * v).sum();
                    if projection > 0.0 {
                        '1'
                    } else {
                        '0'
                    }
                })
                .collect::<String>();
            table.entry(hash).or_default().insert(id);
        }
        state.vectors.insert(id, vector);
    }
}

#[async_trait]
impl VectorIndex for LshIndex {
    async fn add(&self, id: Uuid, vector: Vec<f32>) -> Result<()> {
        self.check_dimension(&vector)?;
        if {
            let guard = self.state.read().await;
            guard.vectors.contains_key(&id)
        } {
            return Err(CoreError::duplicate_id(id));
        }
        let mut guard = self.state.write().await;
        if guard.vectors.contains_key(&id) {
            return Err(CoreError::duplicate_id(id));
        }
        Self::insert_locked(&mut guard, &self.hyperplanes, id, vector);
        tracing::debug!(%id, "added vector to LSH index");
        Ok(())
    }

    async fn add_batch(&self, vectors: Vec<(Uuid, Vec<f32>)>) -> Result<()> {
        for (_, v) in &vectors {
            self.check_dimension(v)?;
        }
        let mut guard = self.state.write().await;
        for (id, _) in &vectors {
            if guard.vectors.contains_key(id) {
                return Err(CoreError::duplicate_id(*id));
            }
        }
        let count = vectors.len();
        for (id, vector) in vectors {
            Self::insert_locked(&mut guard, &self.hyperplanes, id, vector);
        }
        tracing::info!(count, "added batch to LSH index");
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize, filter_ids: Option<&[Uuid]>) -> Result<Vec<SearchHit>> {
        self.check_dimension(query)?;
        let guard = self.state.read().await;

        let mut candidates: HashSet<Uuid> = HashSet::new();
        for t in 0..self.config.num_tables {
            let hash = self.hash_vector(query, t);
            if let Some(bucket) = guard.tables[t].get(&hash) {
                candidates.extend(bucket.iter().copied());
            }
        }
        if let Some(filter) = filter_ids {
            let allowed: HashSet<Uuid> = filter.iter().copied().collect();
            candidates.retain(|id| allowed.contains(id));
        }

        let mut scored: Vec<SearchHit> = candidates
            .into_iter()
            .filter_map(|id| guard.vectors.get(&id).map(|v| (id, self.config.metric.distance(query, v))))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    async fn remove(&self, id: Uuid) -> Result<bool> {
        let mut guard = self.state.write().await;
        let Some(vector) = guard.vectors.remove(&id) else {
            return Ok(false);
        };
        for t in 0..self.config.num_tables {
            let hash = self.hash_vector(&vector, t);
            if let Some(bucket) = guard.tables[t].get_mut(&hash) {
                bucket.remove(&id);
                if bucket.is_empty() {
                    guard.tables[t].remove(&hash);
                }
            }
        }
        tracing::debug!(%id, "removed vector from LSH index");
        Ok(true)
    }

    async fn clear(&self) {
        let mut guard = self.state.write().await;
        for table in guard.tables.iter_mut() {
            table.clear();
        }
        guard.vectors.clear();
        tracing::info!("cleared LSH index");
    }

    async fn size(&self) -> usize {
        self.state.read().await.vectors.len()
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    // ═══ Contract Tests ═══

    #[tokio::test]
    async fn rejects_dimension_mismatch() {
        let idx = LshIndex::new(LshConfig::new(4));
        let err = idx.add(Uuid::new_v4(), vec![0.0; 3]).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::CoreErrorKind::DimensionMismatch);
    }

    #[tokio::test]
    async fn rejects_duplicate_id() {
        let idx = LshIndex::new(LshConfig::new(4));
        let id = Uuid::new_v4();
        idx.add(id, unit(4, 0)).await.unwrap();
        let err = idx.add(id, unit(4, 1)).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::CoreErrorKind::DuplicateId);
    }

    #[tokio::test]
    async fn search_finds_inserted_vector_at_distance_zero() {
        let idx = LshIndex::new(LshConfig::new(8));
        let mut ids = Vec::new();
        for i in 0..8 {
            let id = Uuid::new_v4();
            idx.add(id, unit(8, i)).await.unwrap();
            ids.push(id);
        }
        let hits = idx.search(&unit(8, 3), 5, None).await.unwrap();
        assert!(hits.iter().any(|(id, dist)| *id == ids[3] && *dist < 1e-6));
    }

    #[tokio::test]
    async fn remove_drops_vector_from_future_searches() {
        let idx = LshIndex::new(LshConfig::new(4));
        let id = Uuid::new_v4();
        idx.add(id, unit(4, 0)).await.unwrap();
        assert!(idx.remove(id).await.unwrap());
        assert!(!idx.remove(id).await.unwrap());
        assert_eq!(idx.size().await, 0);
    }

    #[tokio::test]
    async fn empty_index_search_returns_empty() {
        let idx = LshIndex::new(LshConfig::new(4));
        let hits = idx.search(&unit(4, 0), 5, None).await.unwrap();
        assert!(hits.is_empty());
    }
}
