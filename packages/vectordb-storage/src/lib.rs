//! Repository, write-ahead log, and snapshot layer for the vector database:
//! the on-disk and in-memory state every higher-level service reads and
//! mutates through.
//!
//! ## Modules
//!
//! - [`domain`] — [`domain::LibraryRepository`], [`domain::ChunkRepository`]
//!   and [`domain::DocumentRepository`], each an in-memory, RW-locked,
//!   copy-on-read store.
//! - [`wal`] — segmented append-only write-ahead log.
//! - [`snapshot`] — compressed, checksummed point-in-time state dumps.
//! - [`persistence`] — wires the WAL and snapshot store into one durability
//!   pipeline (`log_operation`, periodic checkpoint/snapshot, recovery).
//! - [`recovery`] — replays a snapshot plus its WAL tail back into the
//!   repositories at startup, and verifies the two stay consistent.
//! - [`error`] — the error type shared by all of the above.

pub mod domain;
pub mod error;
pub mod persistence;
pub mod recovery;
pub mod snapshot;
pub mod wal;

pub use domain::{Chunk, ChunkRepository, Document, DocumentRepository, Library, LibraryRepository};
pub use error::{ErrorKind, Result, StorageError};
pub use persistence::{PersistenceManager, RecoveredState};
pub use recovery::{ConsistencyReport, RecoveryReport, RecoveryService};
pub use snapshot::SnapshotStore;
pub use wal::WriteAheadLog;
