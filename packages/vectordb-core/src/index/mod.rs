//! The ANN index family: a uniform [`VectorIndex`] contract with three
//! backends (LSH, HNSW, KD-Tree) and a [`factory::IndexFactory`] to pick one
//! by [`contract::IndexKind`] at runtime.

pub mod bench;
pub mod contract;
pub mod factory;
pub mod hnsw;
pub mod kdtree;
pub mod lsh;
pub mod metric;

pub use bench::{benchmark_index, BenchmarkReport};
pub use contract::{IndexConfig, IndexKind, SearchHit, VectorIndex};
pub use factory::{IndexFactory, IndexOverrides};
pub use hnsw::{HnswConfig, HnswIndex};
pub use kdtree::{KdTreeConfig, KdTreeIndex};
pub use lsh::{LshConfig, LshIndex};
pub use metric::Metric;
