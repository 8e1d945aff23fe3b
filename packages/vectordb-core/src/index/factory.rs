//! Builds a [`VectorIndex`] from an [`IndexKind`] discriminant, the one
//! place that needs to know about all three concrete backends at once.

use crate::error::{CoreError, Result};

use super::contract::{IndexConfig, IndexKind, VectorIndex};
use super::hnsw::{HnswConfig, HnswIndex};
use super::kdtree::{KdTreeConfig, KdTreeIndex};
use super::lsh::{LshConfig, LshIndex};

/// Per-backend tuning knobs a caller may override; unset fields fall back to
/// that backend's defaults (mirroring each `*Config::new`).
#[derive(Debug, Clone, Default)]
pub struct IndexOverrides {
    pub num_tables: Option<usize>,
    pub key_size: Option<usize>,
    pub m: Option<usize>,
    pub ef_construction: Option<usize>,
    pub leaf_size: Option<usize>,
    pub projection_dim: Option<usize>,
    pub seed: Option<u64>,
}

pub struct IndexFactory;

impl IndexFactory {
    /// Construct the requested backend. `dimension` must be at least 1;
    /// anything else fails with `InvalidConfig`.
    pub fn create_index(kind: IndexKind, config: IndexConfig, overrides: Option<IndexOverrides>) -> Result<Box<dyn VectorIndex>> {
        if config.dimension == 0 {
            return Err(CoreError::invalid_config("dimension must be >= 1"));
        }
        let overrides = overrides.unwrap_or_default();

        let index: Box<dyn VectorIndex> = match kind {
            IndexKind::Lsh => {
                let mut cfg = LshConfig::new(config.dimension);
                cfg.metric = config.metric;
                if let Some(v) = overrides.num_tables {
                    cfg.num_tables = v;
                }
                if let Some(v) = overrides.key_size {
                    cfg.key_size = v;
                }
                if let Some(v) = overrides.seed {
                    cfg.seed = v;
                }
                Box::new(LshIndex::new(cfg))
            }
            IndexKind::Hnsw => {
                let mut cfg = HnswConfig::new(config.dimension);
                cfg.metric = config.metric;
                if let Some(v) = overrides.m {
                    cfg.m = v;
                }
                if let Some(v) = overrides.ef_construction {
                    cfg.ef_construction = v;
                }
                if let Some(v) = overrides.seed {
                    cfg.seed = v;
                }
                Box::new(HnswIndex::new(cfg))
            }
            IndexKind::KdTree => {
                let mut cfg = KdTreeConfig::new(config.dimension);
                cfg.metric = config.metric;
                if let Some(v) = overrides.leaf_size {
                    cfg.leaf_size = v;
                }
                if let Some(v) = overrides.projection_dim {
                    cfg.projection_dim = v;
                }
                if let Some(v) = overrides.seed {
                    cfg.seed = v;
                }
                Box::new(KdTreeIndex::new(cfg))
            }
        };

        tracing::info!(kind = ?kind, dimension = config.dimension, "created vector index");
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::metric::Metric;
    use uuid::Uuid;

    // ═══ Construction Tests ═══

    #[test]
    fn rejects_zero_dimension() {
        let err = IndexFactory::create_index(IndexKind::Lsh, IndexConfig::new(0, Metric::Euclidean), None).unwrap_err();
        assert_eq!(err.kind(), crate::error::CoreErrorKind::InvalidConfig);
    }

    #[tokio::test]
    async fn each_kind_builds_a_working_index() {
        for kind in [IndexKind::Lsh, IndexKind::Hnsw, IndexKind::KdTree] {
            let index = IndexFactory::create_index(kind, IndexConfig::new(8, Metric::Euclidean), None).unwrap();
            assert_eq!(index.dimension(), 8);
            index.add(Uuid::new_v4(), vec![1.0; 8]).await.unwrap();
            assert_eq!(index.size().await, 1);
        }
    }

    #[tokio::test]
    async fn overrides_reach_the_built_backend() {
        let overrides = IndexOverrides { num_tables: Some(3), ..Default::default() };
        let index = IndexFactory::create_index(IndexKind::Lsh, IndexConfig::new(4, Metric::Euclidean), Some(overrides)).unwrap();
        assert_eq!(index.dimension(), 4);
    }
}
