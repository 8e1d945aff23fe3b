//! The uniform contract every ANN backend implements.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::metric::Metric;
use crate::error::Result;

/// Discriminates the three backends an [`crate::index::factory::IndexFactory`]
/// can construct. `KdTree` serializes as `KD_TREE`, the canonical spelling
/// this specification settled on (the reference implementation's source
/// mixed `KDTREE` and `KD_TREE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexKind {
    Lsh,
    Hnsw,
    #[serde(rename = "KD_TREE")]
    KdTree,
}

/// Shared configuration every backend accepts, plus its own tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexConfig {
    pub dimension: usize,
    pub metric: Metric,
}

impl IndexConfig {
    pub fn new(dimension: usize, metric: Metric) -> Self {
        Self { dimension, metric }
    }
}

/// One hit returned by [`VectorIndex::search`]: a stored id and its distance
/// to the query under the index's configured metric.
pub type SearchHit = (Uuid, f32);

/// The contract shared by LSH, HNSW and KD-Tree. Every mutating method takes
/// the backend's internal write lock; `search` takes its read lock, so many
/// concurrent searches can run alongside each other but never alongside a
/// mutation.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert one vector. Fails if `vector.len() != dimension` or `id` is
    /// already present.
    async fn add(&self, id: Uuid, vector: Vec<f32>) -> Result<()>;

    /// Insert many vectors atomically within the index's write lock; same
    /// dimension/duplicate rules as [`add`](Self::add) apply per entry.
    async fn add_batch(&self, vectors: Vec<(Uuid, Vec<f32>)>) -> Result<()>;

    /// Return up to `k` `(id, distance)` pairs sorted ascending by distance.
    /// If `filter_ids` is given, results are restricted to that set; ids
    /// absent from the index shorten the result list rather than erroring.
    /// An empty index returns an empty list.
    async fn search(&self, query: &[f32], k: usize, filter_ids: Option<&[Uuid]>) -> Result<Vec<SearchHit>>;

    /// Remove a vector, returning whether it was present.
    async fn remove(&self, id: Uuid) -> Result<bool>;

    /// Empty the index.
    async fn clear(&self);

    /// Current number of stored vectors.
    async fn size(&self) -> usize;

    /// Dimension this index was constructed with.
    fn dimension(&self) -> usize;

    /// Optional finalizer for backends that benefit from an explicit build
    /// step (none of the three shipped backends require one; this is a
    /// no-op default so [`crate::index::factory::IndexFactory`]-built indexes
    /// can be called uniformly).
    async fn build(&self) -> Result<()> {
        Ok(())
    }
}
