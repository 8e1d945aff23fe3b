//! Hierarchical lock manager: named R/W locks keyed by `(level, resource-id)`,
//! acquired in level-sorted order to make multi-resource mutations
//! deadlock-free by construction.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use super::rwlock::{OwnedReadGuard, OwnedReaderWriterLock, OwnedWriteGuard, ReaderWriterLock};

/// A named lock guards no payload of its own; callers coordinate access to
/// the actual resource (a repository row, an index) separately. `()` is the
/// guarded value.
type NamedLock = ReaderWriterLock<()>;

/// Ordering of resource kinds a hierarchical acquisition may span.
/// Acquisition proceeds `LIBRARY` → `DOCUMENT` → `CHUNK` → `INDEX`; violating
/// this order anywhere in the service layer is a correctness bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LockLevel {
    Library = 1,
    Document = 2,
    Chunk = 3,
    Index = 4,
}

impl LockLevel {
    fn name(self) -> &'static str {
        match self {
            LockLevel::Library => "LIBRARY",
            LockLevel::Document => "DOCUMENT",
            LockLevel::Chunk => "CHUNK",
            LockLevel::Index => "INDEX",
        }
    }
}

/// Whether a single entry in a hierarchical lock request wants shared or
/// exclusive access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

/// A single held lock in a hierarchical acquisition, in acquisition order.
enum HeldGuard {
    Read(OwnedReadGuard<()>),
    Write(OwnedWriteGuard<()>),
}

/// Manages named hierarchical locks. Locks are created lazily on first use
/// under a creation mutex (double-checked against the map).
pub struct LockManager {
    locks: DashMap<(LockLevel, Uuid), Arc<NamedLock>>,
    creation_lock: AsyncMutex<()>,
    cleanup_threshold: usize,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self { locks: DashMap::new(), creation_lock: AsyncMutex::new(()), cleanup_threshold: 1000 }
    }

    async fn get_or_create(&self, level: LockLevel, resource_id: Uuid) -> Arc<NamedLock> {
        if let Some(lock) = self.locks.get(&(level, resource_id)) {
            return lock.clone();
        }
        let _guard = self.creation_lock.lock().await;
        self.locks
            .entry((level, resource_id))
            .or_insert_with(|| {
                tracing::debug!(level = level.name(), %resource_id, "created lock");
                Arc::new(NamedLock::new(()))
            })
            .clone()
    }

    /// Acquire a single read lock for `(level, resource_id)`.
    pub async fn acquire_read(&self, level: LockLevel, resource_id: Uuid) -> OwnedReadGuard<()> {
        let lock = self.get_or_create(level, resource_id).await;
        let guard = OwnedReaderWriterLock::from_arc(lock).read_owned().await;
        tracing::debug!(level = level.name(), %resource_id, "acquired read lock");
        guard
    }

    /// Acquire a single write lock for `(level, resource_id)`.
    pub async fn acquire_write(&self, level: LockLevel, resource_id: Uuid) -> OwnedWriteGuard<()> {
        let lock = self.get_or_create(level, resource_id).await;
        let guard = OwnedReaderWriterLock::from_arc(lock).write_owned().await;
        tracing::debug!(level = level.name(), %resource_id, "acquired write lock");
        guard
    }

    /// Acquire several locks in level-sorted order (ties broken by resource
    /// id) and release them in reverse order when the returned handle drops.
    /// This is the *only* sanctioned way to acquire more than one lock at a
    /// time; it is the system's deadlock-avoidance invariant.
    pub async fn acquire_hierarchical(
        &self,
        mut requests: Vec<(LockLevel, Uuid, LockMode)>,
    ) -> HierarchicalGuard {
        requests.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut held = Vec::with_capacity(requests.len());
        for (level, resource_id, mode) in requests {
            let lock = OwnedReaderWriterLock::from_arc(self.get_or_create(level, resource_id).await);
            let guard = match mode {
                LockMode::Read => HeldGuard::Read(lock.read_owned().await),
                LockMode::Write => HeldGuard::Write(lock.write_owned().await),
            };
            tracing::debug!(level = level.name(), %resource_id, mode = ?mode, "acquired hierarchical lock");
            held.push(guard);
        }
        HierarchicalGuard { held }
    }

    /// Best-effort hint: logs a warning if the number of distinct locks ever
    /// created exceeds `threshold`. Correctness never depends on this; it
    /// exists purely to flag unbounded lock-key growth in long-running
    /// processes.
    pub fn cleanup_unused_locks(&self) {
        let count = self.locks.len();
        if count > self.cleanup_threshold {
            tracing::warn!(count, threshold = self.cleanup_threshold, "lock count exceeded threshold");
        }
    }
}

/// Holds a set of locks acquired via [`LockManager::acquire_hierarchical`].
/// Dropping releases them in the reverse of acquisition order.
pub struct HierarchicalGuard {
    held: Vec<HeldGuard>,
}

impl Drop for HierarchicalGuard {
    fn drop(&mut self) {
        while self.held.pop().is_some() {
            // Popping drops the guard, releasing that lock; reverse order
            // falls out of popping from the back of the acquisition-ordered vec.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ═══ Single Lock Tests ═══

    #[tokio::test]
    async fn same_resource_key_returns_same_lock() {
        let mgr = LockManager::new();
        let id = Uuid::new_v4();
        let a = mgr.get_or_create(LockLevel::Library, id).await;
        let b = mgr.get_or_create(LockLevel::Library, id).await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn different_levels_are_independent_locks() {
        let mgr = LockManager::new();
        let id = Uuid::new_v4();
        let lib = mgr.get_or_create(LockLevel::Library, id).await;
        let idx = mgr.get_or_create(LockLevel::Index, id).await;
        assert!(!Arc::ptr_eq(&lib, &idx));
    }

    // ═══ Hierarchical Acquisition Tests ═══

    #[tokio::test]
    async fn hierarchical_acquire_sorts_by_level() {
        let mgr = LockManager::new();
        let lib_id = Uuid::new_v4();
        let requests = vec![
            (LockLevel::Index, lib_id, LockMode::Write),
            (LockLevel::Library, lib_id, LockMode::Read),
            (LockLevel::Chunk, lib_id, LockMode::Write),
        ];
        let _guard = mgr.acquire_hierarchical(requests).await;
        // Acquisition succeeding without hanging demonstrates the sorted
        // order did not self-deadlock against a concurrent single acquire.
    }

    #[tokio::test]
    async fn hierarchical_guard_releases_all_locks_on_drop() {
        let mgr = LockManager::new();
        let lib_id = Uuid::new_v4();
        {
            let _guard = mgr
                .acquire_hierarchical(vec![
                    (LockLevel::Library, lib_id, LockMode::Write),
                    (LockLevel::Index, lib_id, LockMode::Write),
                ])
                .await;
        }
        // Locks were released; a fresh write acquisition must not hang.
        let _again = mgr.acquire_write(LockLevel::Library, lib_id).await;
    }
}
