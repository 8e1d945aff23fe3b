//! KD-Tree index over a random-projected subspace, for high-dimensional
//! vectors where an exact KD-Tree degrades to brute force. See
//! `SPEC_FULL.md` §4.3.3.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};

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
pub struct KdTreeConfig {
    pub dimension: usize,
    pub metric: Metric,
    pub leaf_size: usize,
    pub projection_dim: usize,
    pub seed: u64,
}

impl KdTreeConfig {
    pub fn new(dimension: usize) -> Self {
        let projection_dim = (dimension / 2).clamp(1, 32);
        Self { dimension, metric: Metric::Euclidean, leaf_size: 40, projection_dim, seed: 42 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct OrdF32(f32);
impl Eq for OrdF32 {}
impl PartialOrd for OrdF32 {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for OrdF32 {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.0.partial_cmp(&other.0).unwrap_or(CmpOrdering::Equal)
    }
}

enum KdNode {
    Leaf { ids: Vec<Uuid>, min_bound: Vec<f32>, max_bound: Vec<f32> },
    Internal { split_dim: usize, split_value: f32, left: Box<KdNode>, right: Box<KdNode>, min_bound: Vec<f32>, max_bound: Vec<f32> },
}

impl KdNode {
    fn min_bound(&self) -> &[f32] {
        match self {
            KdNode::Leaf { min_bound, .. } | KdNode::Internal { min_bound, .. } => min_bound,
        }
    }

    fn max_bound(&self) -> &[f32] {
        match self {
            KdNode::Leaf { max_bound, .. } | KdNode::Internal { max_bound, .. } => max_bound,
        }
    }
}

struct Explore<'a> {
    dist: OrdF32,
    node: &'a KdNode,
}
impl PartialEq for Explore<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.dist == other.dist
    }
}
impl Eq for Explore<'_> {}
impl PartialOrd for Explore<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for Explore<'_> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.dist.cmp(&other.dist)
    }
}

struct KdTreeState {
    vectors: HashMap<Uuid, Vec<f32>>,
    projected: HashMap<Uuid, Vec<f32>>,
    root: Option<KdNode>,
}

/// KD-Tree ANN backend with a random-projection front end.
pub struct KdTreeIndex {
    config: KdTreeConfig,
    /// Unit-norm rows; projecting onto them gives a `projection_dim`-length
    /// coordinate the tree actually splits on. Exact distances at leaves are
    /// still computed on the original vectors.
    projection_matrix: Vec<Vec<f32>>,
    state: ReaderWriterLock<KdTreeState>,
}

impl KdTreeIndex {
    pub fn new(config: KdTreeConfig) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let mut projection_matrix: Vec<Vec<f32>> = (0..config.projection_dim)
            .map(|_| (0..config.dimension).map(|_| standard_normal(&mut rng)).collect())
            .collect();
        for row in &mut projection_matrix {
            let norm: f32 = row.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                for x in row.iter_mut() {
                    *x /= norm;
                }
            }
        }
        Self {
            config,
            projection_matrix,
            state: ReaderWriterLock::new(KdTreeState { vectors: HashMap::new(), projected: HashMap::new(), root: None }),
        }
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dimension {
            return Err(CoreError::dimension_mismatch(self.config.dimension, vector.len()));
        }
        Ok(())
    }

    fn project(&self, vector: &[f32]) -> Vec<f32> {
        self.projection_matrix.iter().map(|row| row.iter().zip(vector).map(|(a, b)| a * b).sum()).collect()
    }

    fn min_distance_to_box(point: &[f32], min_bound: &[f32], max_bound: &[f32]) -> f32 {
        point
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                if p < min_bound[i] {
                    (min_bound[i] - p).powi(2)
                } else if p > max_bound[i] {
                    (p - max_bound[i]).powi(2)
                } else {
                    0.0
                }
            })
            .sum::<f32>()
            .sqrt()
    }

    fn build_tree(ids: Vec<Uuid>, projected: Vec<Vec<f32>>, depth: usize, leaf_size: usize, projection_dim: usize) -> KdNode {
        let n = ids.len();
        if n <= leaf_size {
            let mut min_bound = projected[0].clone();
            let mut max_bound = projected[0].clone();
            for row in &projected[1..] {
                for i in 0..row.len() {
                    min_bound[i] = min_bound[i].min(row[i]);
                    max_bound[i] = max_bound[i].max(row[i]);
                }
            }
            return KdNode::Leaf { ids, min_bound, max_bound };
        }

        let split_dim = depth % projection_dim;
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| projected[a][split_dim].partial_cmp(&projected[b][split_dim]).unwrap_or(CmpOrdering::Equal));
        let median_idx = n / 2;
        let split_value = projected[order[median_idx]][split_dim];

        let mut left_mask: Vec<bool> = (0..n).map(|i| projected[i][split_dim] < split_value).collect();
        let all_left = left_mask.iter().all(|&x| x);
        let all_right = left_mask.iter().all(|&x| !x);
        if all_left || all_right {
            for (rank, &idx) in order.iter().enumerate() {
                left_mask[idx] = rank < median_idx;
            }
        }

        let mut left_ids = Vec::new();
        let mut left_proj = Vec::new();
        let mut right_ids = Vec::new();
        let mut right_proj = Vec::new();
        for i in 0..n {
            if left_mask[i] {
                left_ids.push(ids[i]);
                left_proj.push(projected[i].clone());
            } else {
                right_ids.push(ids[i]);
                right_proj.push(projected[i].clone());
            }
        }

        let left = Self::build_tree(left_ids, left_proj, depth + 1, leaf_size, projection_dim);
        let right = Self::build_tree(right_ids, right_proj, depth + 1, leaf_size, projection_dim);
        let min_bound: Vec<f32> = left.min_bound().iter().zip(right.min_bound()).map(|(a, b)| a.min(*b)).collect();
        let max_bound: Vec<f32> = left.max_bound().iter().zip(right.max_bound()).map(|(a, b)| a.max(*b)).collect();

        KdNode::Internal { split_dim, split_value, left: Box::new(left), right: Box::new(right), min_bound, max_bound }
    }

    fn rebuild_locked(state: &mut KdTreeState, leaf_size: usize, projection_dim: usize) {
        if state.projected.is_empty() {
            state.root = None;
            return;
        }
        let ids: Vec<Uuid> = state.projected.keys().copied().collect();
        let projected: Vec<Vec<f32>> = ids.iter().map(|id| state.projected[id].clone()).collect();
        state.root = Some(Self::build_tree(ids, projected, 0, leaf_size, projection_dim));
    }
}

#[async_trait]
impl VectorIndex for KdTreeIndex {
    async fn add(&self, id: Uuid, vector: Vec<f32>) -> Result<()> {
        self.check_dimension(&vector)?;
        let mut state = self.state.write().await;
        if state.vectors.contains_key(&id) {
            return Err(CoreError::duplicate_id(id));
        }
        let projected = self.project(&vector);
        state.vectors.insert(id, vector);
        state.projected.insert(id, projected);
        Self::rebuild_locked(&mut state, self.config.leaf_size, self.config.projection_dim);
        tracing::debug!(%id, "added vector to KD-Tree index");
        Ok(())
    }

    async fn add_batch(&self, vectors: Vec<(Uuid, Vec<f32>)>) -> Result<()> {
        for (_, v) in &vectors {
            self.check_dimension(v)?;
        }
        let mut state = self.state.write().await;
        for (id, _) in &vectors {
            if state.vectors.contains_key(id) {
                return Err(CoreError::duplicate_id(*id));
            }
        }
        let count = vectors.len();
        for (id, vector) in vectors {
            let projected = self.project(&vector);
            state.vectors.insert(id, vector);
            state.projected.insert(id, projected);
        }
        Self::rebuild_locked(&mut state, self.config.leaf_size, self.config.projection_dim);
        tracing::info!(count, "added batch to KD-Tree index");
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize, filter_ids: Option<&[Uuid]>) -> Result<Vec<SearchHit>> {
        self.check_dimension(query)?;
        let state = self.state.read().await;
        let Some(root) = state.root.as_ref() else {
            return Ok(Vec::new());
        };
        let projected_query = self.project(query);
        let metric = self.config.metric;
        let allowed: Option<HashSet<Uuid>> = filter_ids.map(|f| f.iter().copied().collect());

        let mut nearest: BinaryHeap<(OrdF32, Uuid)> = BinaryHeap::new();
        let mut explore: BinaryHeap<Reverse<Explore>> = BinaryHeap::new();
        explore.push(Reverse(Explore { dist: OrdF32(0.0), node: root }));

        while let Some(Reverse(Explore { dist, node })) = explore.pop() {
            if nearest.len() >= k {
                if let Some((worst, _)) = nearest.peek() {
                    if dist.0 > worst.0 {
                        break;
                    }
                }
            }
            match node {
                KdNode::Leaf { ids, .. } => {
                    for id in ids {
                        if let Some(allowed) = &allowed {
                            if !allowed.contains(id) {
                                continue;
                            }
                        }
                        let Some(v) = state.vectors.get(id) else { continue };
                        let d = metric.distance(query, v);
                        if nearest.len() < k {
                            nearest.push((OrdF32(d), *id));
                        } else if let Some((worst, _)) = nearest.peek() {
                            if d < worst.0 {
                                nearest.pop();
                                nearest.push((OrdF32(d), *id));
                            }
                        }
                    }
                }
                KdNode::Internal { split_dim, split_value, left, right, .. } => {
                    let (first, second) =
                        if projected_query[*split_dim] < *split_value { (left.as_ref(), right.as_ref()) } else { (right.as_ref(), left.as_ref()) };
                    let first_dist = Self::min_distance_to_box(&projected_query, first.min_bound(), first.max_bound());
                    explore.push(Reverse(Explore { dist: OrdF32(first_dist), node: first }));

                    let second_dist = Self::min_distance_to_box(&projected_query, second.min_bound(), second.max_bound());
                    let worst = nearest.peek().map(|(d, _)| d.0).unwrap_or(f32::INFINITY);
                    if nearest.len() < k || second_dist < worst {
                        explore.push(Reverse(Explore { dist: OrdF32(second_dist), node: second }));
                    }
                }
            }
        }

        let mut result: Vec<SearchHit> = nearest.into_iter().map(|(d, id)| (id, d.0)).collect();
        result.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(CmpOrdering::Equal));
        Ok(result)
    }

    async fn remove(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.vectors.remove(&id).is_none() {
            return Ok(false);
        }
        state.projected.remove(&id);
        Self::rebuild_locked(&mut state, self.config.leaf_size, self.config.projection_dim);
        tracing::debug!(%id, "removed vector from KD-Tree index");
        Ok(true)
    }

    async fn clear(&self) {
        let mut state = self.state.write().await;
        state.vectors.clear();
        state.projected.clear();
        state.root = None;
        tracing::info!("cleared KD-Tree index");
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
        let idx = KdTreeIndex::new(KdTreeConfig::new(8));
        let err = idx.add(Uuid::new_v4(), vec![0.0; 3]).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::CoreErrorKind::DimensionMismatch);
    }

    #[tokio::test]
    async fn rejects_duplicate_id() {
        let idx = KdTreeIndex::new(KdTreeConfig::new(8));
        let id = Uuid::new_v4();
        idx.add(id, unit(8, 0)).await.unwrap();
        let err = idx.add(id, unit(8, 1)).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::CoreErrorKind::DuplicateId);
    }

    #[tokio::test]
    async fn search_finds_each_inserted_vector_at_distance_zero() {
        let idx = KdTreeIndex::new(KdTreeConfig::new(16));
        let mut ids = Vec::new();
        for i in 0..60 {
            let mut v = vec![0.0f32; 16];
            v[i % 16] = 1.0 + (i as f32) * 0.001;
            let id = Uuid::new_v4();
            idx.add(id, v).await.unwrap();
            ids.push(id);
        }
        for (i, id) in ids.iter().enumerate() {
            let mut v = vec![0.0f32; 16];
            v[i % 16] = 1.0 + (i as f32) * 0.001;
            let hits = idx.search(&v, 3, None).await.unwrap();
            assert_eq!(hits[0].0, *id);
            assert!(hits[0].1 < 1e-4);
        }
    }

    #[tokio::test]
    async fn remove_drops_vector_from_future_searches() {
        let idx = KdTreeIndex::new(KdTreeConfig::new(4));
        let id = Uuid::new_v4();
        idx.add(id, unit(4, 0)).await.unwrap();
        assert!(idx.remove(id).await.unwrap());
        assert!(!idx.remove(id).await.unwrap());
        assert_eq!(idx.size().await, 0);
    }

    #[tokio::test]
    async fn empty_index_search_returns_empty() {
        let idx = KdTreeIndex::new(KdTreeConfig::new(4));
        let hits = idx.search(&unit(4, 0), 5, None).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn filter_restricts_results_to_allowed_ids() {
        let idx = KdTreeIndex::new(KdTreeConfig::new(4));
        let mut ids = Vec::new();
        for i in 0..10 {
            let id = Uuid::new_v4();
            let mut v = vec![0.0f32; 4];
            v[i % 4] = 1.0 + i as f32 * 0.01;
            idx.add(id, v).await.unwrap();
            ids.push(id);
        }
        let allowed = vec![ids[2], ids[5]];
        let hits = idx.search(&vec![0.0; 4], 10, Some(&allowed)).await.unwrap();
        assert!(hits.iter().all(|(id, _)| allowed.contains(id)));
    }
}
