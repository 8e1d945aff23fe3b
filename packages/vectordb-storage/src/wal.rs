//! Segmented append-only write-ahead log. The on-disk layout is bit-exact:
//! an 8-byte `VECWAL01` magic per segment file, then back-to-back entries of
//! a 32-byte little-endian header (`sequence: u32, timestamp_us: u64,
//! payload_len: u32, checksum_prefix: [u8; 16]`) followed by a JSON payload.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;

const MAGIC: &[u8; 8] = b"VECWAL01";
const HEADER_SIZE: usize = 4 + 8 + 4 + 16;
const DEFAULT_SEGMENT_SIZE: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    CreateLibrary,
    UpdateLibrary,
    DeleteLibrary,
    CreateChunk,
    UpdateChunk,
    DeleteChunk,
    CreateDocument,
    UpdateDocument,
    DeleteDocument,
    IndexUpdate,
}

impl OperationType {
    fn as_str(&self) -> &'static str {
        match self {
            OperationType::CreateLibrary => "CREATE_LIBRARY",
            OperationType::UpdateLibrary => "UPDATE_LIBRARY",
            OperationType::DeleteLibrary => "DELETE_LIBRARY",
            OperationType::CreateChunk => "CREATE_CHUNK",
            OperationType::UpdateChunk => "UPDATE_CHUNK",
            OperationType::DeleteChunk => "DELETE_CHUNK",
            OperationType::CreateDocument => "CREATE_DOCUMENT",
            OperationType::UpdateDocument => "UPDATE_DOCUMENT",
            OperationType::DeleteDocument => "DELETE_DOCUMENT",
            OperationType::IndexUpdate => "INDEX_UPDATE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub sequence: u32,
    pub timestamp: DateTime<Utc>,
    pub operation_type: OperationType,
    pub resource_id: Uuid,
    pub data: Value,
}

#[derive(Serialize, Deserialize)]
struct WirePayload {
    operation_type: OperationType,
    resource_id: Uuid,
    timestamp: DateTime<Utc>,
    data: Value,
}

#[derive(Serialize, Deserialize)]
struct CheckpointFile {
    sequence: u32,
    timestamp: DateTime<Utc>,
    segment: u32,
}

fn checksum_prefix(sequence: u32, operation_type: OperationType, resource_id: Uuid, data: &Value) -> [u8; 16] {
    let payload = format!("{sequence}:{}:{resource_id}:{data}", operation_type.as_str());
    let hex = format!("{:x}", Md5::digest(payload.as_bytes()));
    let mut prefix = [0u8; 16];
    prefix.copy_from_slice(&hex.as_bytes()[..16]);
    prefix
}

fn encode_entry(sequence: u32, timestamp: DateTime<Utc>, operation_type: OperationType, resource_id: Uuid, data: &Value) -> Result<Vec<u8>> {
    let payload_bytes = serde_json::to_vec(&WirePayload { operation_type, resource_id, timestamp, data: data.clone() })?;
    let checksum = checksum_prefix(sequence, operation_type, resource_id, data);

    let mut entry = Vec::with_capacity(HEADER_SIZE + payload_bytes.len());
    entry.extend_from_slice(&sequence.to_le_bytes());
    entry.extend_from_slice(&(timestamp.timestamp_micros() as u64).to_le_bytes());
    entry.extend_from_slice(&(payload_bytes.len() as u32).to_le_bytes());
    entry.extend_from_slice(&checksum);
    entry.extend_from_slice(&payload_bytes);
    Ok(entry)
}

/// Reads every well-formed entry from one segment file. Never errors:
/// invalid magic, a truncated tail entry, or a checksum mismatch all stop
/// the scan and log a warning rather than failing the caller — corruption
/// at the tail of a WAL segment is treated as end-of-log.
async fn read_segment(path: &Path) -> Vec<WalEntry> {
    let mut entries = Vec::new();
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(?path, %err, "failed to read wal segment");
            return entries;
        }
    };
    if bytes.len() < MAGIC.len() || &bytes[..MAGIC.len()] != MAGIC {
        tracing::warn!(?path, "invalid wal segment magic, skipping segment");
        return entries;
    }

    let mut offset = MAGIC.len();
    while offset + HEADER_SIZE <= bytes.len() {
        let header = &bytes[offset..offset + HEADER_SIZE];
        let sequence = u32::from_le_bytes(header[0..4].try_into().expect("4-byte slice"));
        let timestamp_us = u64::from_le_bytes(header[4..12].try_into().expect("8-byte slice"));
        let payload_len = u32::from_le_bytes(header[12..16].try_into().expect("4-byte slice")) as usize;
        let stored_checksum: [u8; 16] = header[16..32].try_into().expect("16-byte slice");

        let payload_start = offset + HEADER_SIZE;
        let payload_end = payload_start + payload_len;
        if payload_end > bytes.len() {
            tracing::warn!(?path, sequence, "truncated wal entry, stopping replay");
            break;
        }

        let payload = match serde_json::from_slice::<WirePayload>(&bytes[payload_start..payload_end]) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(?path, sequence, %err, "failed to decode wal entry, stopping replay");
                break;
            }
        };
        let expected = checksum_prefix(sequence, payload.operation_type, payload.resource_id, &payload.data);
        if expected != stored_checksum {
            tracing::warn!(?path, sequence, "checksum mismatch, dropping entry and remainder of segment");
            break;
        }

        let timestamp = DateTime::from_timestamp_micros(timestamp_us as i64).unwrap_or_else(Utc::now);
        entries.push(WalEntry { sequence, timestamp, operation_type: payload.operation_type, resource_id: payload.resource_id, data: payload.data });
        offset = payload_end;
    }
    entries
}

struct WalState {
    current_sequence: u32,
    current_segment: u32,
}

/// Segmented append-only log under `directory`. All appends, rotations and
/// checkpoints serialize through `state`'s mutex — one writer in flight at a
/// time, matching the single-mutex discipline the durability pipeline
/// assumes.
pub struct WriteAheadLog {
    directory: PathBuf,
    segment_size: u64,
    state: Mutex<WalState>,
}

impl WriteAheadLog {
    pub async fn open(directory: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_segment_size(directory, DEFAULT_SEGMENT_SIZE).await
    }

    pub async fn open_with_segment_size(directory: impl Into<PathBuf>, segment_size: u64) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory).await?;
        let (current_sequence, current_segment) = recover_sequence(&directory).await?;
        tracing::info!(?directory, current_sequence, current_segment, "wal opened");
        Ok(Self { directory, segment_size, state: Mutex::new(WalState { current_sequence, current_segment }) })
    }

    fn segment_path(&self, segment: u32) -> PathBuf {
        self.directory.join(format!("wal_{segment:08}.log"))
    }

    async fn list_segments(&self) -> Result<Vec<PathBuf>> {
        list_segments(&self.directory).await
    }

    async fn ensure_magic(path: &Path) -> Result<()> {
        let needs_magic = match fs::metadata(path).await {
            Ok(metadata) => metadata.len() == 0,
            Err(_) => true,
        };
        if needs_magic {
            let mut file = fs::OpenOptions::new().create(true).append(true).open(path).await?;
            file.write_all(MAGIC).await?;
            file.flush().await?;
        }
        Ok(())
    }

    pub async fn append(&self, operation_type: OperationType, resource_id: Uuid, data: Value) -> Result<u32> {
        let mut state = self.state.lock().await;
        let sequence = state.current_sequence + 1;
        let timestamp = Utc::now();
        let entry = encode_entry(sequence, timestamp, operation_type, resource_id, &data)?;

        let mut segment_path = self.segment_path(state.current_segment);
        Self::ensure_magic(&segment_path).await?;
        let current_size = fs::metadata(&segment_path).await?.len();
        if current_size + entry.len() as u64 > self.segment_size {
            state.current_segment += 1;
            segment_path = self.segment_path(state.current_segment);
            Self::ensure_magic(&segment_path).await?;
        }

        let mut file = fs::OpenOptions::new().append(true).open(&segment_path).await?;
        file.write_all(&entry).await?;
        file.flush().await?;

        state.current_sequence = sequence;
        tracing::debug!(sequence, segment = state.current_segment, operation = operation_type.as_str(), "wal entry appended");
        Ok(sequence)
    }

    pub async fn read(&self, from_sequence: u32) -> Result<Vec<WalEntry>> {
        let mut segments = self.list_segments().await?;
        segments.sort();
        let mut entries = Vec::new();
        for segment_path in segments {
            entries.extend(read_segment(&segment_path).await.into_iter().filter(|entry| entry.sequence >= from_sequence));
        }
        Ok(entries)
    }

    pub async fn checkpoint(&self) -> Result<u32> {
        let state = self.state.lock().await;
        let segment_path = self.segment_path(state.current_segment);
        if let Ok(file) = fs::OpenOptions::new().append(true).open(&segment_path).await {
            file.sync_all().await?;
        }
        let checkpoint = CheckpointFile { sequence: state.current_sequence, timestamp: Utc::now(), segment: state.current_segment };
        let checkpoint_path = self.directory.join(format!("checkpoint_{}", state.current_sequence));
        fs::write(&checkpoint_path, serde_json::to_vec(&checkpoint)?).await?;
        tracing::info!(sequence = state.current_sequence, "wal checkpoint created");
        Ok(state.current_sequence)
    }

    pub async fn truncate(&self, up_to_sequence: u32) -> Result<()> {
        let _state = self.state.lock().await;
        for segment_path in self.list_segments().await? {
            let entries = read_segment(&segment_path).await;
            if entries.is_empty() {
                continue;
            }
            if entries.iter().all(|entry| entry.sequence <= up_to_sequence) {
                fs::remove_file(&segment_path).await?;
                tracing::info!(?segment_path, "truncated whole wal segment");
                continue;
            }
            let remaining: Vec<WalEntry> = entries.into_iter().filter(|entry| entry.sequence > up_to_sequence).collect();
            self.rewrite_segment(&segment_path, &remaining).await?;
        }
        Ok(())
    }

    async fn rewrite_segment(&self, path: &Path, entries: &[WalEntry]) -> Result<()> {
        let tmp_path = path.with_extension("tmp");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        for entry in entries {
            bytes.extend_from_slice(&encode_entry(entry.sequence, entry.timestamp, entry.operation_type, entry.resource_id, &entry.data)?);
        }
        fs::write(&tmp_path, &bytes).await?;
        fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    pub async fn current_sequence(&self) -> u32 {
        self.state.lock().await.current_sequence
    }
}

async fn list_segments(directory: &Path) -> Result<Vec<PathBuf>> {
    let mut segments = Vec::new();
    let mut read_dir = fs::read_dir(directory).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if name.starts_with("wal_") && name.ends_with(".log") {
                segments.push(path);
            }
        }
    }
    segments.sort();
    Ok(segments)
}

async fn recover_sequence(directory: &Path) -> Result<(u32, u32)> {
    let mut sequence = 0u32;
    let mut segment = 0u32;

    let mut checkpoints: Vec<(u32, PathBuf)> = Vec::new();
    let mut read_dir = fs::read_dir(directory).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if let Some(rest) = name.strip_prefix("checkpoint_") {
                if let Ok(seq) = rest.parse::<u32>() {
                    checkpoints.push((seq, path));
                }
            }
        }
    }
    checkpoints.sort_by_key(|(seq, _)| *seq);
    if let Some((_, path)) = checkpoints.last() {
        let bytes = fs::read(path).await?;
        let checkpoint: CheckpointFile = serde_json::from_slice(&bytes)?;
        sequence = checkpoint.sequence;
        segment = checkpoint.segment;
    }

    let segments = list_segments(directory).await?;
    for segment_path in &segments {
        if let Some(max_seq) = read_segment(segment_path).await.iter().map(|entry| entry.sequence).max() {
            sequence = sequence.max(max_seq);
        }
        if let Some(num) = segment_path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix("wal_"))
            .and_then(|n| n.strip_suffix(".log"))
            .and_then(|n| n.parse::<u32>().ok())
        {
            segment = segment.max(num);
        }
    }

    Ok((sequence, segment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    // ═══ Round-Trip Tests ═══

    #[tokio::test]
    async fn append_then_read_preserves_order_and_payload() {
        let dir = tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path()).await.unwrap();
        let id = Uuid::new_v4();
        let seq1 = wal.append(OperationType::CreateLibrary, id, json!({"name": "R"})).await.unwrap();
        let seq2 = wal.append(OperationType::UpdateLibrary, id, json!({"name": "R'"})).await.unwrap();
        assert_eq!((seq1, seq2), (1, 2));

        let entries = wal.read(0).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sequence, 1);
        assert_eq!(entries[1].sequence, 2);
        assert_eq!(entries[1].data, json!({"name": "R'"}));
    }

    #[tokio::test]
    async fn reopening_recovers_current_sequence() {
        let dir = tempdir().unwrap();
        {
            let wal = WriteAheadLog::open(dir.path()).await.unwrap();
            wal.append(OperationType::CreateLibrary, Uuid::new_v4(), json!({})).await.unwrap();
            wal.append(OperationType::UpdateLibrary, Uuid::new_v4(), json!({})).await.unwrap();
        }
        let reopened = WriteAheadLog::open(dir.path()).await.unwrap();
        assert_eq!(reopened.current_sequence().await, 2);
        let next = reopened.append(OperationType::DeleteLibrary, Uuid::new_v4(), json!({})).await.unwrap();
        assert_eq!(next, 3);
    }

    // ═══ Truncation Tests ═══

    #[tokio::test]
    async fn truncate_is_idempotent_and_drops_old_entries() {
        let dir = tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path()).await.unwrap();
        for _ in 0..5 {
            wal.append(OperationType::CreateChunk, Uuid::new_v4(), json!({})).await.unwrap();
        }
        wal.truncate(3).await.unwrap();
        wal.truncate(3).await.unwrap();
        let remaining = wal.read(0).await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|entry| entry.sequence > 3));
    }

    // ═══ Segment Rotation Tests ═══

    #[tokio::test]
    async fn rotates_to_a_new_segment_when_size_exceeded() {
        let dir = tempdir().unwrap();
        let wal = WriteAheadLog::open_with_segment_size(dir.path(), 64).await.unwrap();
        for _ in 0..20 {
            wal.append(OperationType::CreateChunk, Uuid::new_v4(), json!({"k": "v"})).await.unwrap();
        }
        let segments = list_segments(dir.path()).await.unwrap();
        assert!(segments.len() > 1);
        let entries = wal.read(0).await.unwrap();
        assert_eq!(entries.len(), 20);
    }

    // ═══ Checkpoint Tests ═══

    #[tokio::test]
    async fn checkpoint_records_current_sequence() {
        let dir = tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path()).await.unwrap();
        wal.append(OperationType::CreateLibrary, Uuid::new_v4(), json!({})).await.unwrap();
        let checkpointed = wal.checkpoint().await.unwrap();
        assert_eq!(checkpointed, 1);
        assert!(dir.path().join("checkpoint_1").exists());
    }
}
