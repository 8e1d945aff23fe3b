//! Hierarchical Navigable Small World graph index.
//!
//! See `SPEC_FULL.md` §4.3.2. Layer search is the textbook two-heap
//! best-first search: a min-heap of candidates still worth expanding and a
//! bounded max-heap holding the current best `ef` results, pruning a
//! candidate once it is worse than the current worst best-result and the
//! best-result set is full.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use uuid::Uuid;

use crate::concurrency::ReaderWriterLock;
use crate::error::{CoreError, Result};

use super::contract::{SearchHit, VectorIndex};
use super::metric::Metric;

#[derive(Debug, Clone)]
pub struct HnswConfig {
    pub dimension: usize,
    pub metric: Metric,
    pub m: usize,
    pub ef_construction: usize,
    pub seed: u64,
}

impl HnswConfig {
    pub fn new(dimension: usize) -> Self {
        Self { dimension, metric: Metric::Euclidean, m: 16, ef_construction: 200, seed: 42 }
    }

    fn max_m(&self) -> usize {
        self.m
    }

    fn max_m0(&self) -> usize {
        2 * self.m
    }
}

/// Wraps `f32` with a total order for heap use; NaN never appears because
/// every distance kernel in [`Metric`] is NaN-free for finite inputs.
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

struct HnswNode {
    vector: Vec<f32>,
    level: usize,
    neighbors: Vec<HashSet<Uuid>>,
}

struct HnswState {
    nodes: HashMap<Uuid, HnswNode>,
    entry_point: Option<Uuid>,
    rng: ChaCha8Rng,
}

/// HNSW ANN backend.
pub struct HnswIndex {
    config: HnswConfig,
    state: ReaderWriterLock<HnswState>,
}

impl HnswIndex {
    pub fn new(config: HnswConfig) -> Self {
        let seed = config.seed;
        Self {
            config,
            state: ReaderWriterLock::new(HnswState {
                nodes: HashMap::new(),
                entry_point: None,
                rng: ChaCha8Rng::seed_from_u64(seed),
            }),
        }
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dimension {
            return Err(CoreError::dimension_mismatch(self.config.dimension, vector.len()));
        }
        Ok(())
    }

    fn random_level(rng: &mut ChaCha8Rng) -> usize {
        let mut level = 0;
        while rng.gen::<f32>() < 0.5 {
            level += 1;
        }
        level
    }

    /// Best-first search of one layer, returning up to `ef` results sorted
    /// ascending by distance.
    fn search_layer(&self, state: &HnswState, query: &[f32], entry: Uuid, ef: usize, layer: usize) -> Vec<SearchHit> {
        let metric = self.config.metric;
        let mut visited: HashSet<Uuid> = HashSet::new();
        visited.insert(entry);

        let entry_dist = metric.distance(query, &state.nodes[&entry].vector);
        let mut frontier: BinaryHeap<std::cmp::Reverse<(OrdF32, Uuid)>> = BinaryHeap::new();
        frontier.push(std::cmp::Reverse((OrdF32(entry_dist), entry)));
        let mut best: BinaryHeap<(OrdF32, Uuid)> = BinaryHeap::new();
        best.push((OrdF32(entry_dist), entry));

        while let Some(std::cmp::Reverse((OrdF32(cur_dist), cur_id))) = frontier.pop() {
            let worst = best.peek().map(|(d, _)| d.0).unwrap_or(f32::INFINITY);
            if best.len() >= ef && cur_dist > worst {
                break;
            }
            let Some(node) = state.nodes.get(&cur_id) else { continue };
            if layer >= node.neighbors.len() {
                continue;
            }
            for &neighbor_id in node.neighbors[layer].iter() {
                if !visited.insert(neighbor_id) {
                    continue;
                }
                let Some(neighbor) = state.nodes.get(&neighbor_id) else { continue };
                let dist = metric.distance(query, &neighbor.vector);
                let worst = best.peek().map(|(d, _)| d.0).unwrap_or(f32::INFINITY);
                if best.len() < ef || dist < worst {
                    frontier.push(std::cmp::Reverse((OrdF32(dist), neighbor_id)));
                    best.push((OrdF32(dist), neighbor_id));
                    if best.len() > ef {
                        best.pop();
                    }
                }
            }
        }

        let mut result: Vec<SearchHit> = best.into_iter().map(|(d, id)| (id, d.0)).collect();
        result.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(CmpOrdering::Equal));
        result
    }

    fn greedy_nearest(&self, state: &HnswState, query: &[f32], entry: Uuid, layer: usize) -> Uuid {
        self.search_layer(state, query, entry, 1, layer).into_iter().next().map(|(id, _)| id).unwrap_or(entry)
    }

    fn prune(&self, state: &mut HnswState, id: Uuid, layer: usize, m_max: usize) {
        let Some(node) = state.nodes.get(&id) else { return };
        if node.neighbors[layer].len() <= m_max {
            return;
        }
        let vector = node.vector.clone();
        let neighbor_ids: Vec<Uuid> = node.neighbors[layer].iter().copied().collect();
        let metric = self.config.metric;
        let mut scored: Vec<(Uuid, f32)> = neighbor_ids
            .iter()
            .filter_map(|nid| state.nodes.get(nid).map(|n| (*nid, metric.distance(&vector, &n.vector))))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(CmpOrdering::Equal));
        let keep: HashSet<Uuid> = scored.iter().take(m_max).map(|(nid, _)| *nid).collect();
        let dropped: Vec<Uuid> = neighbor_ids.into_iter().filter(|nid| !keep.contains(nid)).collect();

        state.nodes.get_mut(&id).unwrap().neighbors[layer] = keep;
        for dropped_id in dropped {
            if let Some(n) = state.nodes.get_mut(&dropped_id) {
                n.neighbors[layer].remove(&id);
            }
        }
    }

    fn insert_locked(&self, state: &mut HnswState, id: Uuid, vector: Vec<f32>) {
        let level = Self::random_level(&mut state.rng);

        let Some(entry_id) = state.entry_point else {
            state.nodes.insert(id, HnswNode { vector, level, neighbors: vec![HashSet::new(); level + 1] });
            state.entry_point = Some(id);
            return;
        };
        let entry_level = state.nodes[&entry_id].level;

        let mut current = entry_id;
        for layer in (level + 1..=entry_level).rev() {
            current = self.greedy_nearest(state, &vector, current, layer);
        }

        let mut node_neighbors: Vec<HashSet<Uuid>> = vec![HashSet::new(); level + 1];
        let top_shared_layer = level.min(entry_level);
        for layer in (0..=top_shared_layer).rev() {
            let ef = if layer == 0 { self.config.ef_construction } else { self.config.m };
            let candidates = self.search_layer(state, &vector, current, ef, layer);
            let m_max = if layer == 0 { self.config.max_m0() } else { self.config.max_m() };
            let selected: Vec<SearchHit> = candidates.into_iter().take(m_max).collect();

            for &(neighbor_id, _) in &selected {
                node_neighbors[layer].insert(neighbor_id);
                if let Some(neighbor) = state.nodes.get_mut(&neighbor_id) {
                    neighbor.neighbors[layer].insert(id);
                }
                self.prune(state, neighbor_id, layer, m_max);
            }
            if let Some((nearest, _)) = selected.first() {
                current = *nearest;
            }
        }

        state.nodes.insert(id, HnswNode { vector, level, neighbors: node_neighbors });
        if level > entry_level {
            state.entry_point = Some(id);
        }
    }
}

#[async_trait]
impl VectorIndex for HnswIndex {
    async fn add(&self, id: Uuid, vector: Vec<f32>) -> Result<()> {
        self.check_dimension(&vector)?;
        let mut state = self.state.write().await;
        if state.nodes.contains_key(&id) {
            return Err(CoreError::duplicate_id(id));
        }
        self.insert_locked(&mut state, id, vector);
        tracing::debug!(%id, "added vector to HNSW index");
        Ok(())
    }

    async fn add_batch(&self, vectors: Vec<(Uuid, Vec<f32>)>) -> Result<()> {
        for (_, v) in &vectors {
            self.check_dimension(v)?;
        }
        let mut state = self.state.write().await;
        for (id, _) in &vectors {
            if state.nodes.contains_key(id) {
                return Err(CoreError::duplicate_id(*id));
            }
        }
        let count = vectors.len();
        for (id, vector) in vectors {
            self.insert_locked(&mut state, id, vector);
        }
        tracing::info!(count, "added batch to HNSW index");
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize, filter_ids: Option<&[Uuid]>) -> Result<Vec<SearchHit>> {
        self.check_dimension(query)?;
        let state = self.state.read().await;
        let Some(entry_id) = state.entry_point else {
            return Ok(Vec::new());
        };
        let entry_level = state.nodes[&entry_id].level;

        let mut current = entry_id;
        for layer in (1..=entry_level).rev() {
            current = self.greedy_nearest(&state, query, current, layer);
        }

        let ef = self.config.ef_construction.max(k);
        let mut hits = self.search_layer(&state, query, current, ef, 0);
        if let Some(filter) = filter_ids {
            let allowed: HashSet<Uuid> = filter.iter().copied().collect();
            hits.retain(|(id, _)| allowed.contains(id));
        }
        hits.truncate(k);
        Ok(hits)
    }

    async fn remove(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(node) = state.nodes.remove(&id) else {
            return Ok(false);
        };
        for (layer, neighbors) in node.neighbors.iter().enumerate() {
            for neighbor_id in neighbors {
                if let Some(n) = state.nodes.get_mut(neighbor_id) {
                    if layer < n.neighbors.len() {
                        n.neighbors[layer].remove(&id);
                    }
                }
            }
        }
        if state.entry_point == Some(id) {
            state.entry_point = state.nodes.keys().next().copied();
        }
        tracing::debug!(%id, "removed vector from HNSW index");
        Ok(true)
    }

    async fn clear(&self) {
        let mut state = self.state.write().await;
        state.nodes.clear();
        state.entry_point = None;
        tracing::info!("cleared HNSW index");
    }

    async fn size(&self) -> usize {
        self.state.read().await.nodes.len()
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}
