//! Library entity and its in-memory repository.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vectordb_core::concurrency::ReaderWriterLock;
use vectordb_core::index::IndexKind;

use crate::error::{Result, StorageError};

/// A named container for chunks of a fixed embedding dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Library {
    pub id: Uuid,
    pub name: String,
    pub dimension: usize,
    pub index_kind: IndexKind,
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub total_documents: u64,
    pub total_chunks: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Library {
    pub fn new(name: impl Into<String>, dimension: usize, index_kind: IndexKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            dimension,
            index_kind,
            description: None,
            metadata: serde_json::Value::Null,
            total_documents: 0,
            total_chunks: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Mutable fields of a library. `dimension` is intentionally absent — it is
/// immutable once the library (and its index) exists.
#[derive(Debug, Clone, Default)]
pub struct LibraryUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

struct LibraryStore {
    by_id: HashMap<Uuid, Library>,
    by_name: HashMap<String, Uuid>,
}

/// In-memory library store. Every accessor returns owned clones so callers
/// can never alias internal state.
pub struct LibraryRepository {
    state: ReaderWriterLock<LibraryStore>,
}

impl Default for LibraryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl LibraryRepository {
    pub fn new() -> Self {
        Self { state: ReaderWriterLock::new(LibraryStore { by_id: HashMap::new(), by_name: HashMap::new() }) }
    }

    pub async fn create(&self, library: Library) -> Result<Library> {
        let mut state = self.state.write().await;
        if state.by_name.contains_key(&library.name) {
            return Err(StorageError::conflict("duplicate_name", format!("library name '{}' already exists", library.name)));
        }
        state.by_name.insert(library.name.clone(), library.id);
        state.by_id.insert(library.id, library.clone());
        Ok(library)
    }

    pub async fn get(&self, id: Uuid) -> Result<Library> {
        let state = self.state.read().await;
        state.by_id.get(&id).cloned().ok_or_else(|| StorageError::not_found("library", id))
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Library> {
        let state = self.state.read().await;
        let id = state.by_name.get(name).ok_or_else(|| StorageError::not_found("library", name))?;
        state.by_id.get(id).cloned().ok_or_else(|| StorageError::not_found("library", name))
    }

    pub async fn update(&self, id: Uuid, changes: LibraryUpdate) -> Result<Library> {
        let mut state = self.state.write().await;
        if !state.by_id.contains_key(&id) {
            return Err(StorageError::not_found("library", id));
        }
        if let Some(new_name) = &changes.name {
            if let Some(existing) = state.by_name.get(new_name) {
                if *existing != id {
                    return Err(StorageError::conflict("duplicate_name", format!("library name '{new_name}' already exists")));
                }
            }
        }

        let old_name = state.by_id[&id].name.clone();
        if let Some(new_name) = &changes.name {
            if *new_name != old_name {
                state.by_name.remove(&old_name);
                state.by_name.insert(new_name.clone(), id);
            }
        }

        let library = state.by_id.get_mut(&id).expect("presence checked above");
        if let Some(name) = changes.name {
            library.name = name;
        }
        if let Some(description) = changes.description {
            library.description = Some(description);
        }
        if let Some(metadata) = changes.metadata {
            library.metadata = metadata;
        }
        library.updated_at = Utc::now();
        Ok(library.clone())
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.by_id.remove(&id) {
            Some(library) => {
                state.by_name.remove(&library.name);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Sets absolute counter values; `None` leaves that counter untouched.
    pub async fn update_stats(&self, id: Uuid, total_documents: Option<u64>, total_chunks: Option<u64>) -> Result<()> {
        let mut state = self.state.write().await;
        let library = state.by_id.get_mut(&id).ok_or_else(|| StorageError::not_found("library", id))?;
        if let Some(v) = total_documents {
            library.total_documents = v;
        }
        if let Some(v) = total_chunks {
            library.total_chunks = v;
        }
        library.updated_at = Utc::now();
        Ok(())
    }

    /// Applies relative adjustments to the counters; used by `ChunkService`
    /// and the document lifecycle instead of read-modify-write races against
    /// `update_stats`.
    pub async fn adjust_stats(&self, id: Uuid, document_delta: i64, chunk_delta: i64) -> Result<()> {
        let mut state = self.state.write().await;
        let library = state.by_id.get_mut(&id).ok_or_else(|| StorageError::not_found("library", id))?;
        library.total_documents = (library.total_documents as i64 + document_delta).max(0) as u64;
        library.total_chunks = (library.total_chunks as i64 + chunk_delta).max(0) as u64;
        library.updated_at = Utc::now();
        Ok(())
    }

    pub async fn list_by_index_kind(&self, kind: IndexKind) -> Vec<Library> {
        self.state.read().await.by_id.values().filter(|l| l.index_kind == kind).cloned().collect()
    }

    pub async fn list(&self, kind: Option<IndexKind>, limit: usize, offset: usize) -> Vec<Library> {
        let state = self.state.read().await;
        let mut libraries: Vec<Library> = state.by_id.values().filter(|l| kind.map_or(true, |k| l.index_kind == k)).cloned().collect();
        libraries.sort_by_key(|l| l.created_at);
        libraries.into_iter().skip(offset).take(limit).collect()
    }

    pub async fn count(&self) -> usize {
        self.state.read().await.by_id.len()
    }

    /// Every library, in no particular order. Used to build a snapshot.
    pub async fn all(&self) -> Vec<Library> {
        self.state.read().await.by_id.values().cloned().collect()
    }

    /// Inserts or replaces a library by id, bypassing the uniqueness check.
    /// Used only to replay a WAL entry during recovery.
    pub async fn put(&self, library: Library) {
        let mut state = self.state.write().await;
        if let Some(existing) = state.by_id.get(&library.id) {
            if existing.name != library.name {
                state.by_name.remove(&existing.name);
            }
        }
        state.by_name.insert(library.name.clone(), library.id);
        state.by_id.insert(library.id, library);
    }

    /// Replaces the repository's contents wholesale, rebuilding the
    /// secondary name index. Used to load a snapshot at recovery time.
    pub async fn restore(&self, libraries: Vec<Library>) {
        let mut state = self.state.write().await;
        state.by_id.clear();
        state.by_name.clear();
        for library in libraries {
            state.by_name.insert(library.name.clone(), library.id);
            state.by_id.insert(library.id, library);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lib(name: &str) -> Library {
        Library::new(name, 8, IndexKind::Lsh)
    }

    // ═══ Uniqueness Tests ═══

    #[tokio::test]
    async fn create_rejects_duplicate_name() {
        let repo = LibraryRepository::new();
        repo.create(lib("a")).await.unwrap();
        let err = repo.create(lib("a")).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn rename_to_own_current_name_is_not_a_conflict() {
        let repo = LibraryRepository::new();
        let created = repo.create(lib("a")).await.unwrap();
        let updated = repo.update(created.id, LibraryUpdate { name: Some("a".into()), ..Default::default() }).await.unwrap();
        assert_eq!(updated.name, "a");
    }

    #[tokio::test]
    async fn rename_to_another_librarys_name_is_a_conflict() {
        let repo = LibraryRepository::new();
        repo.create(lib("a")).await.unwrap();
        let b = repo.create(lib("b")).await.unwrap();
        let err = repo.update(b.id, LibraryUpdate { name: Some("a".into()), ..Default::default() }).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Conflict);
    }

    // ═══ Counter Tests ═══

    #[tokio::test]
    async fn adjust_stats_never_goes_negative() {
        let repo = LibraryRepository::new();
        let created = repo.create(lib("a")).await.unwrap();
        repo.adjust_stats(created.id, 0, -5).await.unwrap();
        let library = repo.get(created.id).await.unwrap();
        assert_eq!(library.total_chunks, 0);
    }

    #[tokio::test]
    async fn delete_frees_the_name_for_reuse() {
        let repo = LibraryRepository::new();
        let created = repo.create(lib("a")).await.unwrap();
        assert!(repo.delete(created.id).await.unwrap());
        repo.create(lib("a")).await.unwrap();
    }
}
