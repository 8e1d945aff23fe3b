//! Compressed, checksummed point-in-time dumps of repository state.
//!
//! Layout: `{snapshot_id}.msgpack` (or `.msgpack.gz` when compression is on)
//! holds the MessagePack-encoded state; `{snapshot_id}.meta` is a JSON
//! sidecar carrying the SHA-256 of the snapshot bytes plus bookkeeping.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Result, StorageError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub snapshot_id: String,
    pub sequence_number: u32,
    pub timestamp: DateTime<Utc>,
    pub size_bytes: u64,
    pub checksum: String,
    pub description: Option<String>,
}

fn data_path(directory: &Path, snapshot_id: &str, compressed: bool) -> PathBuf {
    let suffix = if compressed { "msgpack.gz" } else { "msgpack" };
    directory.join(format!("{snapshot_id}.{suffix}"))
}

fn meta_path(directory: &Path, snapshot_id: &str) -> PathBuf {
    directory.join(format!("{snapshot_id}.meta"))
}

/// File-backed snapshot store. `use_compression` controls whether new
/// snapshots are gzipped; existing snapshots of either shape are read
/// transparently.
pub struct SnapshotStore {
    directory: PathBuf,
    use_compression: bool,
    write_lock: Mutex<()>,
    metadata_cache: Mutex<Option<Vec<SnapshotMetadata>>>,
}

impl SnapshotStore {
    pub async fn new(directory: impl Into<PathBuf>, use_compression: bool) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory).await?;
        Ok(Self { directory, use_compression, write_lock: Mutex::new(()), metadata_cache: Mutex::new(None) })
    }

    pub async fn create<S: Serialize>(&self, sequence_number: u32, state: &S, description: Option<String>) -> Result<SnapshotMetadata> {
        let _guard = self.write_lock.lock().await;
        let snapshot_id = format!("snapshot_{sequence_number}_{}", &Uuid::new_v4().simple().to_string()[..8]);
        let timestamp = Utc::now();

        let encoded = rmp_serde::to_vec_named(state)?;
        let bytes = if self.use_compression {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::new(6));
            encoder.write_all(&encoded)?;
            encoder.finish()?
        } else {
            encoded
        };
        let checksum = format!("{:x}", Sha256::digest(&bytes));

        let path = data_path(&self.directory, &snapshot_id, self.use_compression);
        fs::write(&path, &bytes).await?;

        let metadata = SnapshotMetadata {
            snapshot_id: snapshot_id.clone(),
            sequence_number,
            timestamp,
            size_bytes: bytes.len() as u64,
            checksum,
            description,
        };
        fs::write(meta_path(&self.directory, &snapshot_id), serde_json::to_vec_pretty(&metadata)?).await?;

        *self.metadata_cache.lock().await = None;
        tracing::info!(snapshot_id = %metadata.snapshot_id, sequence = sequence_number, size_bytes = metadata.size_bytes, "snapshot created");
        Ok(metadata)
    }

    pub async fn load<T: DeserializeOwned>(&self, snapshot_id: &str) -> Result<T> {
        let metadata = self.load_metadata(snapshot_id).await?;

        let compressed_path = data_path(&self.directory, snapshot_id, true);
        let (path, compressed) = if fs::try_exists(&compressed_path).await? {
            (compressed_path, true)
        } else {
            (data_path(&self.directory, snapshot_id, false), false)
        };
        let bytes = fs::read(&path).await.map_err(|_| StorageError::not_found("snapshot", snapshot_id))?;

        let actual_checksum = format!("{:x}", Sha256::digest(&bytes));
        if actual_checksum != metadata.checksum {
            return Err(StorageError::checksum_mismatch(format!("snapshot {snapshot_id} checksum mismatch")));
        }

        let decoded = if compressed {
            let mut decoder = GzDecoder::new(bytes.as_slice());
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            out
        } else {
            bytes
        };

        tracing::info!(%snapshot_id, "snapshot loaded");
        Ok(rmp_serde::from_slice(&decoded)?)
    }

    async fn load_metadata(&self, snapshot_id: &str) -> Result<SnapshotMetadata> {
        let path = meta_path(&self.directory, snapshot_id);
        let bytes = fs::read(&path).await.map_err(|_| StorageError::not_found("snapshot", snapshot_id))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn list(&self) -> Result<Vec<SnapshotMetadata>> {
        if let Some(cached) = self.metadata_cache.lock().await.clone() {
            return Ok(cached);
        }

        let mut snapshots = Vec::new();
        let mut read_dir = fs::read_dir(&self.directory).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("meta") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
            match self.load_metadata(stem).await {
                Ok(metadata) => snapshots.push(metadata),
                Err(err) => tracing::warn!(?path, %err, "failed to load snapshot metadata"),
            }
        }
        snapshots.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        *self.metadata_cache.lock().await = Some(snapshots.clone());
        Ok(snapshots)
    }

    pub async fn get_latest(&self) -> Result<Option<SnapshotMetadata>> {
        Ok(self.list().await?.into_iter().next())
    }

    pub async fn delete(&self, snapshot_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut deleted = false;
        for compressed in [true, false] {
            let path = data_path(&self.directory, snapshot_id, compressed);
            if fs::remove_file(&path).await.is_ok() {
                deleted = true;
                break;
            }
        }
        if fs::remove_file(meta_path(&self.directory, snapshot_id)).await.is_ok() {
            deleted = true;
        }
        if deleted {
            *self.metadata_cache.lock().await = None;
            tracing::info!(%snapshot_id, "snapshot deleted");
        }
        Ok(deleted)
    }

    /// Deletes every snapshot beyond the newest `keep_n`, returning how many
    /// were removed.
    pub async fn cleanup_old(&self, keep_n: usize) -> Result<usize> {
        let snapshots = self.list().await?;
        if snapshots.len() <= keep_n {
            return Ok(0);
        }
        let mut removed = 0;
        for snapshot in &snapshots[keep_n..] {
            if self.delete(&snapshot.snapshot_id).await? {
                removed += 1;
            }
        }
        tracing::info!(removed, "cleaned up old snapshots");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    // ═══ Round-Trip Tests ═══

    #[tokio::test]
    async fn create_then_load_roundtrips_compressed_state() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path(), true).await.unwrap();
        let state = json!({"libraries": ["a", "b"], "count": 2});
        let metadata = store.create(10, &state, Some("backup".into())).await.unwrap();

        let loaded: serde_json::Value = store.load(&metadata.snapshot_id).await.unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn create_then_load_roundtrips_uncompressed_state() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path(), false).await.unwrap();
        let state = json!({"x": 1});
        let metadata = store.create(1, &state, None).await.unwrap();
        let loaded: serde_json::Value = store.load(&metadata.snapshot_id).await.unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn load_rejects_tampered_bytes() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path(), false).await.unwrap();
        let metadata = store.create(1, &json!({"a": 1}), None).await.unwrap();
        let path = data_path(dir.path(), &metadata.snapshot_id, false);
        fs::write(&path, b"corrupted").await.unwrap();

        let err = store.load::<serde_json::Value>(&metadata.snapshot_id).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Checksum);
    }

    // ═══ Listing / Cleanup Tests ═══

    #[tokio::test]
    async fn list_returns_newest_first() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path(), false).await.unwrap();
        store.create(1, &json!({}), None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store.create(2, &json!({}), None).await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed[0].snapshot_id, second.snapshot_id);
    }

    #[tokio::test]
    async fn cleanup_old_keeps_only_the_newest_n() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path(), false).await.unwrap();
        for seq in 0..7 {
            store.create(seq, &json!({}), None).await.unwrap();
        }
        let removed = store.cleanup_old(5).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.list().await.unwrap().len(), 5);
    }
}
