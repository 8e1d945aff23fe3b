//! The concurrency substrate: a fair reader/writer lock primitive and the
//! hierarchical lock manager built on top of it.

mod lock_manager;
mod rwlock;

pub use lock_manager::{HierarchicalGuard, LockLevel, LockManager, LockMode};
pub use rwlock::{
    OwnedReadGuard, OwnedReaderWriterLock, OwnedWriteGuard, ReadGuard, ReaderWriterLock, WriteGuard,
};
