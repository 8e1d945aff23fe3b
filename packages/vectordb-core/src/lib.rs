//! Core in-process primitives for the vector database: the ANN index
//! family and the concurrency substrate everything else is built on.
//!
//! ## Modules
//!
//! - [`index`] — the [`index::VectorIndex`] contract and its three backends
//!   (LSH, HNSW, KD-Tree), selected at runtime via [`index::IndexFactory`].
//! - [`concurrency`] — [`concurrency::ReaderWriterLock`], a fair async R/W
//!   lock, and [`concurrency::LockManager`], which layers hierarchical
//!   multi-resource locking on top of it.
//! - [`error`] — the error type shared by both.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vectordb_core::index::{IndexFactory, IndexConfig, IndexKind, Metric};
//!
//! let index = IndexFactory::create_index(
//!     IndexKind::Hnsw,
//!     IndexConfig::new(768, Metric::Cosine),
//!     None,
//! )?;
//! index.add(id, vector).await?;
//! let hits = index.search(&query, 10, None).await?;
//! ```

pub mod concurrency;
pub mod error;
pub mod index;
pub mod rng;

pub use error::{CoreError, CoreErrorKind, Result};
