//! Repository layer: [`Library`], [`Chunk`] and [`Document`], each backed by
//! an in-memory, RW-locked, copy-on-read repository.

pub mod chunk;
pub mod document;
pub mod library;

pub use chunk::{Chunk, ChunkRepository, ChunkUpdate};
pub use document::{Document, DocumentRepository, DocumentUpdate};
pub use library::{Library, LibraryRepository, LibraryUpdate};
