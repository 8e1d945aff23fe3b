//! Wires the write-ahead log and the snapshot store into one durability
//! pipeline: every mutation is logged before it's applied, a background loop
//! checkpoints the WAL periodically, and callers can fold the accumulated
//! log into a fresh snapshot on demand.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::Result;
use crate::snapshot::SnapshotStore;
use crate::wal::{OperationType, WalEntry, WriteAheadLog};

const AUTO_CHECKPOINT_INTERVAL: u32 = 1000;
const CHECKPOINT_POLL: Duration = Duration::from_secs(60);

/// State recovered from the durability pipeline at startup: the snapshot's
/// deserialized state blob (if one existed) plus the WAL entries logged
/// after it, ready to be replayed against the repositories.
pub struct RecoveredState {
    pub snapshot_state: Option<Value>,
    pub replayed_from: u32,
    pub entries: Vec<WalEntry>,
}

pub struct PersistenceManager {
    wal: Arc<WriteAheadLog>,
    snapshots: Arc<SnapshotStore>,
    operations_since_checkpoint: AtomicU32,
    is_recovering: AtomicBool,
    checkpoint_task: Mutex<Option<JoinHandle<()>>>,
}

impl PersistenceManager {
    pub fn new(wal: Arc<WriteAheadLog>, snapshots: Arc<SnapshotStore>) -> Self {
        Self {
            wal,
            snapshots,
            operations_since_checkpoint: AtomicU32::new(0),
            is_recovering: AtomicBool::new(false),
            checkpoint_task: Mutex::new(None),
        }
    }

    /// Starts the background auto-checkpoint loop. Idempotent: calling this
    /// twice replaces the previous task handle rather than spawning a second
    /// loop, though callers are expected to call it once at startup.
    pub async fn start_background_tasks(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move { manager.auto_checkpoint_loop().await });
        *self.checkpoint_task.lock().await = Some(handle);
        tracing::info!("persistence manager background tasks started");
    }

    pub async fn shutdown(&self) -> Result<()> {
        if let Some(task) = self.checkpoint_task.lock().await.take() {
            task.abort();
        }
        self.create_checkpoint().await?;
        tracing::info!("persistence manager shutdown complete");
        Ok(())
    }

    /// Appends an operation to the WAL. A no-op returning `-1` while
    /// recovery is in progress, so replayed operations don't re-log
    /// themselves.
    pub async fn log_operation(&self, operation_type: OperationType, resource_id: Uuid, data: Value) -> Result<i64> {
        if self.is_recovering.load(Ordering::Acquire) {
            return Ok(-1);
        }

        let sequence = self.wal.append(operation_type, resource_id, data).await?;
        let pending = self.operations_since_checkpoint.fetch_add(1, Ordering::AcqRel) + 1;
        if pending >= AUTO_CHECKPOINT_INTERVAL {
            self.create_checkpoint().await?;
        }
        Ok(sequence as i64)
    }

    pub async fn create_checkpoint(&self) -> Result<u32> {
        let sequence = self.wal.checkpoint().await?;
        self.operations_since_checkpoint.store(0, Ordering::Release);
        tracing::info!(sequence, "checkpoint created");
        Ok(sequence)
    }

    /// Checkpoints the WAL, snapshots `state`, prunes old snapshots, and
    /// truncates the WAL up to the checkpointed sequence.
    pub async fn create_snapshot<S: Serialize>(&self, state: &S, description: Option<String>, keep_n: usize) -> Result<String> {
        let sequence = self.create_checkpoint().await?;
        let metadata = self.snapshots.create(sequence, state, description).await?;
        self.snapshots.cleanup_old(keep_n).await?;
        self.wal.truncate(sequence).await?;
        Ok(metadata.snapshot_id)
    }

    /// Loads the latest snapshot (if any) and every WAL entry logged after
    /// it. Sets `is_recovering` for the duration so [`Self::log_operation`]
    /// becomes a no-op; callers replay `entries` against their repositories
    /// themselves, then clear recovery by dropping the guard this returns.
    pub async fn recover_state(&self) -> Result<RecoveredState> {
        self.is_recovering.store(true, Ordering::Release);
        let result = self.recover_state_inner().await;
        self.is_recovering.store(false, Ordering::Release);
        result
    }

    async fn recover_state_inner(&self) -> Result<RecoveredState> {
        tracing::info!("starting state recovery");
        let latest = self.snapshots.get_latest().await?;

        let (snapshot_state, replayed_from) = match &latest {
            Some(metadata) => {
                tracing::info!(snapshot_id = %metadata.snapshot_id, sequence = metadata.sequence_number, "loading snapshot");
                let state: Value = self.snapshots.load(&metadata.snapshot_id).await?;
                (Some(state), metadata.sequence_number + 1)
            }
            None => {
                tracing::info!("no snapshot found, replaying entire wal");
                (None, 0)
            }
        };

        let entries = self.wal.read(replayed_from).await?;
        tracing::info!(count = entries.len(), "replaying wal entries");
        Ok(RecoveredState { snapshot_state, replayed_from, entries })
    }

    pub fn is_recovering(&self) -> bool {
        self.is_recovering.load(Ordering::Acquire)
    }

    pub fn wal(&self) -> &Arc<WriteAheadLog> {
        &self.wal
    }

    pub fn snapshots(&self) -> &Arc<SnapshotStore> {
        &self.snapshots
    }

    async fn auto_checkpoint_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(CHECKPOINT_POLL);
        loop {
            ticker.tick().await;
            if self.operations_since_checkpoint.load(Ordering::Acquire) == 0 {
                continue;
            }
            if let Err(err) = self.create_checkpoint().await {
                tracing::error!(%err, "error in checkpoint loop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    async fn manager(dir: &std::path::Path) -> PersistenceManager {
        let wal = Arc::new(WriteAheadLog::open(dir.join("wal")).await.unwrap());
        let snapshots = Arc::new(SnapshotStore::new(dir.join("snapshots"), true).await.unwrap());
        PersistenceManager::new(wal, snapshots)
    }

    // ═══ Logging Tests ═══

    #[tokio::test]
    async fn log_operation_returns_sequential_sequence_numbers() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path()).await;
        let first = manager.log_operation(OperationType::CreateLibrary, Uuid::new_v4(), json!({})).await.unwrap();
        let second = manager.log_operation(OperationType::UpdateLibrary, Uuid::new_v4(), json!({})).await.unwrap();
        assert_eq!((first, second), (1, 2));
    }

    #[tokio::test]
    async fn log_operation_is_a_noop_while_recovering() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path()).await;
        manager.is_recovering.store(true, Ordering::Release);
        let sequence = manager.log_operation(OperationType::CreateLibrary, Uuid::new_v4(), json!({})).await.unwrap();
        assert_eq!(sequence, -1);
    }

    // ═══ Snapshot + Recovery Tests ═══

    #[tokio::test]
    async fn create_snapshot_truncates_the_wal() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path()).await;
        manager.log_operation(OperationType::CreateLibrary, Uuid::new_v4(), json!({"n": 1})).await.unwrap();
        manager.log_operation(OperationType::CreateLibrary, Uuid::new_v4(), json!({"n": 2})).await.unwrap();

        manager.create_snapshot(&json!({"libraries": 2}), Some("test".into()), 5).await.unwrap();

        let remaining = manager.wal.read(0).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn recover_state_replays_entries_after_the_snapshot() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path()).await;
        manager.log_operation(OperationType::CreateLibrary, Uuid::new_v4(), json!({"n": 1})).await.unwrap();
        manager.create_snapshot(&json!({"n": 1}), None, 5).await.unwrap();
        manager.log_operation(OperationType::CreateLibrary, Uuid::new_v4(), json!({"n": 2})).await.unwrap();

        let recovered = manager.recover_state().await.unwrap();
        assert_eq!(recovered.snapshot_state, Some(json!({"n": 1})));
        assert_eq!(recovered.entries.len(), 1);
        assert_eq!(recovered.entries[0].data, json!({"n": 2}));
    }

    #[tokio::test]
    async fn recover_state_with_no_snapshot_replays_the_whole_wal() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path()).await;
        manager.log_operation(OperationType::CreateLibrary, Uuid::new_v4(), json!({})).await.unwrap();

        let recovered = manager.recover_state().await.unwrap();
        assert!(recovered.snapshot_state.is_none());
        assert_eq!(recovered.replayed_from, 0);
        assert_eq!(recovered.entries.len(), 1);
    }
}
