//! Chunk entity and its in-memory repository, including the metadata filter
//! operators used by [`ChunkRepository::search_by_metadata`].

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;
use vectordb_core::concurrency::ReaderWriterLock;

use crate::error::{Result, StorageError};

/// A single embedded unit of content within a library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub library_id: Uuid,
    pub document_id: Option<Uuid>,
    pub content: String,
    pub embedding: Vec<f32>,
    /// Position within its document; callers sort by this when ordering a
    /// document's chunks — the repository itself only preserves insertion
    /// order.
    pub chunk_index: u64,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chunk {
    pub fn new(library_id: Uuid, content: impl Into<String>, embedding: Vec<f32>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            library_id,
            document_id: None,
            content: content.into(),
            embedding,
            chunk_index: 0,
            metadata: Value::Null,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChunkUpdate {
    pub content: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub chunk_index: Option<u64>,
    pub metadata: Option<Value>,
}

struct ChunkStore {
    by_id: HashMap<Uuid, Chunk>,
    by_document: HashMap<Uuid, Vec<Uuid>>,
}

/// In-memory chunk store, keyed by id with a secondary `document_id -> [chunk_id]`
/// index maintained alongside it.
pub struct ChunkRepository {
    state: ReaderWriterLock<ChunkStore>,
}

impl Default for ChunkRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkRepository {
    pub fn new() -> Self {
        Self { state: ReaderWriterLock::new(ChunkStore { by_id: HashMap::new(), by_document: HashMap::new() }) }
    }

    pub async fn create(&self, chunk: Chunk) -> Result<Chunk> {
        let mut state = self.state.write().await;
        if state.by_id.contains_key(&chunk.id) {
            return Err(StorageError::conflict("duplicate_id", format!("chunk {} already exists", chunk.id)));
        }
        if let Some(document_id) = chunk.document_id {
            state.by_document.entry(document_id).or_default().push(chunk.id);
        }
        state.by_id.insert(chunk.id, chunk.clone());
        Ok(chunk)
    }

    /// Inserts every chunk or none: the first id collision aborts before any
    /// chunk is stored.
    pub async fn create_bulk(&self, chunks: Vec<Chunk>) -> Result<Vec<Chunk>> {
        let mut state = self.state.write().await;
        for chunk in &chunks {
            if state.by_id.contains_key(&chunk.id) {
                return Err(StorageError::conflict("duplicate_id", format!("chunk {} already exists", chunk.id)));
            }
        }
        for chunk in &chunks {
            if let Some(document_id) = chunk.document_id {
                state.by_document.entry(document_id).or_default().push(chunk.id);
            }
            state.by_id.insert(chunk.id, chunk.clone());
        }
        Ok(chunks)
    }

    pub async fn get(&self, id: Uuid) -> Result<Chunk> {
        let state = self.state.read().await;
        state.by_id.get(&id).cloned().ok_or_else(|| StorageError::not_found("chunk", id))
    }

    pub async fn update(&self, id: Uuid, changes: ChunkUpdate) -> Result<Chunk> {
        let mut state = self.state.write().await;
        let chunk = state.by_id.get_mut(&id).ok_or_else(|| StorageError::not_found("chunk", id))?;
        if let Some(content) = changes.content {
            chunk.content = content;
        }
        if let Some(embedding) = changes.embedding {
            chunk.embedding = embedding;
        }
        if let Some(chunk_index) = changes.chunk_index {
            chunk.chunk_index = chunk_index;
        }
        if let Some(metadata) = changes.metadata {
            chunk.metadata = metadata;
        }
        chunk.updated_at = Utc::now();
        Ok(chunk.clone())
    }

    pub async fn delete(&self, id: Uuid) -> Result<Option<Chunk>> {
        let mut state = self.state.write().await;
        let removed = state.by_id.remove(&id);
        if let Some(chunk) = &removed {
            if let Some(document_id) = chunk.document_id {
                if let Some(ids) = state.by_document.get_mut(&document_id) {
                    ids.retain(|existing| *existing != id);
                }
            }
        }
        Ok(removed)
    }

    /// Removes every chunk belonging to `document_id`, returning how many
    /// were removed.
    pub async fn delete_by_document(&self, document_id: Uuid) -> Result<usize> {
        let mut state = self.state.write().await;
        let ids = state.by_document.remove(&document_id).unwrap_or_default();
        for id in &ids {
            state.by_id.remove(id);
        }
        Ok(ids.len())
    }

    /// Chunks belonging to `document_id`, in insertion order.
    pub async fn get_by_document(&self, document_id: Uuid) -> Vec<Chunk> {
        let state = self.state.read().await;
        state
            .by_document
            .get(&document_id)
            .map(|ids| ids.iter().filter_map(|id| state.by_id.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    pub async fn list_by_library(&self, library_id: Uuid, limit: usize, offset: usize) -> Vec<Chunk> {
        let state = self.state.read().await;
        let mut chunks: Vec<Chunk> = state.by_id.values().filter(|c| c.library_id == library_id).cloned().collect();
        chunks.sort_by_key(|c| c.created_at);
        chunks.into_iter().skip(offset).take(limit).collect()
    }

    pub async fn count_by_library(&self, library_id: Uuid) -> usize {
        self.state.read().await.by_id.values().filter(|c| c.library_id == library_id).count()
    }

    /// Every chunk in `library_id` whose metadata matches all of `filters`.
    /// Each filter value is either a plain equality target, or a
    /// single-operator object using `$gt`/`$gte`/`$lt`/`$lte`/`$ne`/`$in`/`$nin`.
    pub async fn search_by_metadata(&self, library_id: Uuid, filters: &Map<String, Value>) -> Vec<Chunk> {
        let state = self.state.read().await;
        state
            .by_id
            .values()
            .filter(|c| c.library_id == library_id && matches_filters(&c.metadata, filters))
            .cloned()
            .collect()
    }

    /// Every chunk, in no particular order. Used to build a snapshot.
    pub async fn all(&self) -> Vec<Chunk> {
        self.state.read().await.by_id.values().cloned().collect()
    }

    /// Inserts or replaces a chunk by id, bypassing the collision check.
    /// Used only to replay a WAL entry during recovery.
    pub async fn put(&self, chunk: Chunk) {
        let mut state = self.state.write().await;
        if let Some(existing) = state.by_id.get(&chunk.id) {
            if existing.document_id != chunk.document_id {
                if let Some(old_document) = existing.document_id {
                    if let Some(ids) = state.by_document.get_mut(&old_document) {
                        ids.retain(|id| *id != chunk.id);
                    }
                }
            }
        }
        if let Some(document_id) = chunk.document_id {
            let ids = state.by_document.entry(document_id).or_default();
            if !ids.contains(&chunk.id) {
                ids.push(chunk.id);
            }
        }
        state.by_id.insert(chunk.id, chunk);
    }

    /// Replaces the repository's contents wholesale, rebuilding the
    /// `document_id -> [chunk_id]` index. Used to load a snapshot at
    /// recovery time.
    pub async fn restore(&self, chunks: Vec<Chunk>) {
        let mut state = self.state.write().await;
        state.by_id.clear();
        state.by_document.clear();
        for chunk in chunks {
            if let Some(document_id) = chunk.document_id {
                state.by_document.entry(document_id).or_default().push(chunk.id);
            }
            state.by_id.insert(chunk.id, chunk);
        }
    }
}

fn matches_filters(metadata: &Value, filters: &Map<String, Value>) -> bool {
    filters.iter().all(|(key, condition)| {
        let actual = metadata.get(key);
        match condition {
            Value::Object(ops) => ops.iter().all(|(op, expected)| apply_operator(op, actual, expected)),
            plain => actual == Some(plain),
        }
    })
}

fn apply_operator(op: &str, actual: Option<&Value>, expected: &Value) -> bool {
    match op {
        "$ne" => actual != Some(expected),
        "$in" => actual.map_or(false, |a| expected.as_array().is_some_and(|arr| arr.contains(a))),
        "$nin" => actual.map_or(true, |a| expected.as_array().is_none_or(|arr| !arr.contains(a))),
        "$gt" => compare_numbers(actual, expected) == Some(Ordering::Greater),
        "$gte" => matches!(compare_numbers(actual, expected), Some(Ordering::Greater) | Some(Ordering::Equal)),
        "$lt" => compare_numbers(actual, expected) == Some(Ordering::Less),
        "$lte" => matches!(compare_numbers(actual, expected), Some(Ordering::Less) | Some(Ordering::Equal)),
        _ => false,
    }
}

fn compare_numbers(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
    let a = actual?.as_f64()?;
    let b = expected.as_f64()?;
    a.partial_cmp(&b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(library_id: Uuid, metadata: Value) -> Chunk {
        let mut c = Chunk::new(library_id, "text", vec![0.0; 4]);
        c.metadata = metadata;
        c
    }

    // ═══ Secondary Index Tests ═══

    #[tokio::test]
    async fn delete_by_document_removes_all_its_chunks() {
        let repo = ChunkRepository::new();
        let library_id = Uuid::new_v4();
        let document_id = Uuid::new_v4();
        for _ in 0..3 {
            let mut c = Chunk::new(library_id, "x", vec![0.0; 4]);
            c.document_id = Some(document_id);
            repo.create(c).await.unwrap();
        }
        assert_eq!(repo.get_by_document(document_id).await.len(), 3);
        assert_eq!(repo.delete_by_document(document_id).await.unwrap(), 3);
        assert!(repo.get_by_document(document_id).await.is_empty());
    }

    #[tokio::test]
    async fn create_bulk_is_all_or_nothing_on_id_collision() {
        let repo = ChunkRepository::new();
        let library_id = Uuid::new_v4();
        let existing = Chunk::new(library_id, "a", vec![0.0; 4]);
        repo.create(existing.clone()).await.unwrap();

        let fresh = Chunk::new(library_id, "b", vec![0.0; 4]);
        let err = repo.create_bulk(vec![fresh.clone(), existing]).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Conflict);
        assert!(repo.get(fresh.id).await.is_err());
    }

    // ═══ Metadata Filter Tests ═══

    #[tokio::test]
    async fn equality_filter_matches_exact_value() {
        let repo = ChunkRepository::new();
        let library_id = Uuid::new_v4();
        for category in ["A", "A", "A", "B", "B"] {
            repo.create(chunk(library_id, json!({"category": category}))).await.unwrap();
        }
        let filters = json!({"category": "A"});
        let hits = repo.search_by_metadata(library_id, filters.as_object().unwrap()).await;
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn gte_operator_filters_numerically() {
        let repo = ChunkRepository::new();
        let library_id = Uuid::new_v4();
        for score in [10, 20, 30, 40] {
            repo.create(chunk(library_id, json!({"score": score}))).await.unwrap();
        }
        let filters = json!({"score": {"$gte": 20}});
        let hits = repo.search_by_metadata(library_id, filters.as_object().unwrap()).await;
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn in_operator_matches_membership() {
        let repo = ChunkRepository::new();
        let library_id = Uuid::new_v4();
        for tag in ["x", "y", "z"] {
            repo.create(chunk(library_id, json!({"tag": tag}))).await.unwrap();
        }
        let filters = json!({"tag": {"$in": ["x", "z"]}});
        let hits = repo.search_by_metadata(library_id, filters.as_object().unwrap()).await;
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn missing_field_never_matches_a_comparison_operator() {
        let repo = ChunkRepository::new();
        let library_id = Uuid::new_v4();
        repo.create(chunk(library_id, json!({}))).await.unwrap();
        let filters = json!({"score": {"$gte": 0}});
        let hits = repo.search_by_metadata(library_id, filters.as_object().unwrap()).await;
        assert!(hits.is_empty());
    }
}
