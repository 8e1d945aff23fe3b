//! Keeps chunk repository rows and their owning library's index in sync
//! under the hierarchical lock order `(LIBRARY read) -> (INDEX write) ->
//! (CHUNK write)`, escalating LIBRARY to write on deletes so counters can
//! be updated safely.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;
use vectordb_core::concurrency::{LockLevel, LockManager, LockMode};
use vectordb_storage::domain::chunk::ChunkUpdate;
use vectordb_storage::wal::OperationType;
use vectordb_storage::{Chunk, ChunkRepository, PersistenceManager};

use crate::error::{Result, ServiceError};
use crate::library_service::LibraryService;
use crate::search_service::SearchService;

pub struct ChunkService {
    repository: Arc<ChunkRepository>,
    libraries: Arc<LibraryService>,
    locks: Arc<LockManager>,
    persistence: Option<Arc<PersistenceManager>>,
    search: Option<Arc<SearchService>>,
}

impl ChunkService {
    pub fn new(repository: Arc<ChunkRepository>, libraries: Arc<LibraryService>, locks: Arc<LockManager>, persistence: Option<Arc<PersistenceManager>>, search: Option<Arc<SearchService>>) -> Self {
        Self { repository, libraries, locks, persistence, search }
    }

    async fn invalidate_cache(&self, library_id: Uuid) {
        if let Some(search) = &self.search {
            search.invalidate_library(library_id).await;
        }
    }

    async fn log(&self, operation_type: OperationType, resource_id: Uuid, data: Value) -> Result<()> {
        if let Some(persistence) = &self.persistence {
            persistence.log_operation(operation_type, resource_id, data).await?;
        }
        Ok(())
    }

    fn check_dimension(expected: usize, embedding: &[f32]) -> Result<()> {
        if embedding.len() != expected {
            return Err(ServiceError::validation("embedding", format!("expected length {expected}, got {}", embedding.len())));
        }
        Ok(())
    }

    /// `content` and `embedding` are validated against the owning library
    /// before anything is written. If the repository insert succeeds but
    /// the index add fails, the repository row is left in place and the
    /// WAL entry (if any) is not rolled back — recovery re-derives the
    /// index from the logged create rather than from a rolled-back write.
    pub async fn create_chunk(
        &self,
        library_id: Uuid,
        content: impl Into<String>,
        embedding: Vec<f32>,
        document_id: Option<Uuid>,
        chunk_index: Option<u64>,
        metadata: Option<Value>,
    ) -> Result<Chunk> {
        let content = content.into();
        if content.is_empty() || content.len() > 10_000 {
            return Err(ServiceError::validation("content", "must be non-empty and at most 10000 characters"));
        }
        let library = self.libraries.get_library(library_id).await?;
        Self::check_dimension(library.dimension, &embedding)?;

        let _guard = self
            .locks
            .acquire_hierarchical(vec![
                (LockLevel::Library, library_id, LockMode::Read),
                (LockLevel::Index, library_id, LockMode::Write),
                (LockLevel::Chunk, library_id, LockMode::Write),
            ])
            .await;

        let mut chunk = Chunk::new(library_id, content, embedding);
        chunk.document_id = document_id;
        chunk.chunk_index = chunk_index.unwrap_or(0);
        if let Some(metadata) = metadata {
            chunk.metadata = metadata;
        }

        self.log(OperationType::CreateChunk, chunk.id, serde_json::to_value(&chunk).map_err(|e| ServiceError::internal(e.to_string()))?).await?;
        let created = self.repository.create(chunk).await?;

        let index = self.libraries.index_for(library_id).await?;
        index.add(created.id, created.embedding.clone()).await.map_err(|err| ServiceError::index(format!("{:?}", library.index_kind), "add", err.to_string()))?;

        self.libraries.adjust_stats(library_id, 0, 1).await?;
        self.invalidate_cache(library_id).await;
        Ok(created)
    }

    /// Same lock discipline and no-rollback-on-index-failure policy as
    /// [`create_chunk`](Self::create_chunk), applied to the whole batch.
    pub async fn create_chunks_bulk(&self, library_id: Uuid, chunks: Vec<(String, Vec<f32>, Option<Uuid>, Option<u64>, Option<Value>)>) -> Result<Vec<Chunk>> {
        let library = self.libraries.get_library(library_id).await?;
        let mut built = Vec::with_capacity(chunks.len());
        for (content, embedding, document_id, chunk_index, metadata) in chunks {
            if content.is_empty() || content.len() > 10_000 {
                return Err(ServiceError::validation("content", "must be non-empty and at most 10000 characters"));
            }
            Self::check_dimension(library.dimension, &embedding)?;
            let mut chunk = Chunk::new(library_id, content, embedding);
            chunk.document_id = document_id;
            chunk.chunk_index = chunk_index.unwrap_or(0);
            if let Some(metadata) = metadata {
                chunk.metadata = metadata;
            }
            built.push(chunk);
        }

        let _guard = self
            .locks
            .acquire_hierarchical(vec![
                (LockLevel::Library, library_id, LockMode::Read),
                (LockLevel::Index, library_id, LockMode::Write),
                (LockLevel::Chunk, library_id, LockMode::Write),
            ])
            .await;

        for chunk in &built {
            self.log(OperationType::CreateChunk, chunk.id, serde_json::to_value(chunk).map_err(|e| ServiceError::internal(e.to_string()))?).await?;
        }
        let created = self.repository.create_bulk(built).await?;

        let index = self.libraries.index_for(library_id).await?;
        let vectors = created.iter().map(|c| (c.id, c.embedding.clone())).collect();
        index.add_batch(vectors).await.map_err(|err| ServiceError::index(format!("{:?}", library.index_kind), "add_batch", err.to_string()))?;

        self.libraries.adjust_stats(library_id, 0, created.len() as i64).await?;
        self.invalidate_cache(library_id).await;
        Ok(created)
    }

    pub async fn update_chunk(&self, id: Uuid, content: Option<String>, embedding: Option<Vec<f32>>, chunk_index: Option<u64>, metadata: Option<Value>) -> Result<Chunk> {
        let existing = self.repository.get(id).await?;
        let library = self.libraries.get_library(existing.library_id).await?;
        if let Some(embedding) = &embedding {
            Self::check_dimension(library.dimension, embedding)?;
        }

        let _guard = self
            .locks
            .acquire_hierarchical(vec![
                (LockLevel::Library, existing.library_id, LockMode::Read),
                (LockLevel::Index, existing.library_id, LockMode::Write),
                (LockLevel::Chunk, existing.library_id, LockMode::Write),
            ])
            .await;

        let embedding_changed = embedding.is_some();
        let changes = ChunkUpdate { content, embedding, chunk_index, metadata };
        self.log(OperationType::UpdateChunk, id, serde_json::to_value(&changes_to_json(&changes)).map_err(|e| ServiceError::internal(e.to_string()))?).await?;
        let updated = self.repository.update(id, changes).await?;

        if embedding_changed {
            let index = self.libraries.index_for(existing.library_id).await?;
            index.remove(id).await.map_err(|err| ServiceError::index(format!("{:?}", library.index_kind), "remove", err.to_string()))?;
            index.add(id, updated.embedding.clone()).await.map_err(|err| ServiceError::index(format!("{:?}", library.index_kind), "add", err.to_string()))?;
        }
        self.invalidate_cache(existing.library_id).await;
        Ok(updated)
    }

    pub async fn delete_chunk(&self, id: Uuid) -> Result<bool> {
        let existing = match self.repository.get(id).await {
            Ok(chunk) => chunk,
            Err(_) => return Ok(false),
        };

        let _guard = self
            .locks
            .acquire_hierarchical(vec![
                (LockLevel::Library, existing.library_id, LockMode::Write),
                (LockLevel::Index, existing.library_id, LockMode::Write),
                (LockLevel::Chunk, existing.library_id, LockMode::Write),
            ])
            .await;

        let index = self.libraries.index_for(existing.library_id).await?;
        index.remove(id).await.map_err(|err| ServiceError::index("unknown", "remove", err.to_string()))?;

        self.log(OperationType::DeleteChunk, id, Value::Null).await?;
        let removed = self.repository.delete(id).await?.is_some();
        if removed {
            self.libraries.adjust_stats(existing.library_id, 0, -1).await?;
            self.invalidate_cache(existing.library_id).await;
        }
        Ok(removed)
    }

    pub async fn delete_chunks_by_document(&self, library_id: Uuid, document_id: Uuid) -> Result<usize> {
        let _guard = self
            .locks
            .acquire_hierarchical(vec![
                (LockLevel::Library, library_id, LockMode::Write),
                (LockLevel::Index, library_id, LockMode::Write),
                (LockLevel::Chunk, library_id, LockMode::Write),
            ])
            .await;

        let chunks = self.repository.get_by_document(document_id).await;
        let index = self.libraries.index_for(library_id).await?;
        for chunk in &chunks {
            index.remove(chunk.id).await.map_err(|err| ServiceError::index("unknown", "remove", err.to_string()))?;
        }

        self.log(OperationType::DeleteChunk, document_id, Value::Null).await?;
        let removed = self.repository.delete_by_document(document_id).await?;
        if removed > 0 {
            self.libraries.adjust_stats(library_id, 0, -(removed as i64)).await?;
            self.invalidate_cache(library_id).await;
        }
        Ok(removed)
    }

    pub async fn list_chunks(&self, library_id: Uuid, limit: usize, offset: usize) -> Vec<Chunk> {
        self.repository.list_by_library(library_id, limit, offset).await
    }

    pub async fn get_chunks_by_document(&self, document_id: Uuid) -> Vec<Chunk> {
        let mut chunks = self.repository.get_by_document(document_id).await;
        chunks.sort_by_key(|c| c.chunk_index);
        chunks
    }
}

fn changes_to_json(changes: &ChunkUpdate) -> Value {
    serde_json::json!({
        "content": changes.content,
        "embedding": changes.embedding,
        "chunk_index": changes.chunk_index,
        "metadata": changes.metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use vectordb_core::index::IndexKind;

    async fn harness() -> (ChunkService, Arc<LibraryService>, Uuid) {
        let libraries = Arc::new(LibraryService::new(Arc::new(vectordb_storage::LibraryRepository::new()), None, Arc::new(Config::default())));
        let library = libraries.create_library("L", 4, IndexKind::Lsh, None, None).await.unwrap();
        let chunks = ChunkService::new(Arc::new(ChunkRepository::new()), libraries.clone(), Arc::new(LockManager::new()), None, None);
        (chunks, libraries, library.id)
    }

    // ═══ Create Tests ═══

    #[tokio::test]
    async fn create_chunk_adds_to_both_repository_and_index() {
        let (svc, libraries, library_id) = harness().await;
        let chunk = svc.create_chunk(library_id, "hello", vec![1.0, 0.0, 0.0, 0.0], None, None, None).await.unwrap();
        let index = libraries.index_for(library_id).await.unwrap();
        assert_eq!(index.size().await, 1);
        assert_eq!(svc.list_chunks(library_id, 10, 0).await.len(), 1);
        let library = libraries.get_library(library_id).await.unwrap();
        assert_eq!(library.total_chunks, 1);
        assert_eq!(chunk.library_id, library_id);
    }

    #[tokio::test]
    async fn create_chunk_rejects_dimension_mismatch() {
        let (svc, _libraries, library_id) = harness().await;
        let err = svc.create_chunk(library_id, "hello", vec![1.0, 0.0], None, None, None).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn create_chunk_rejects_empty_content() {
        let (svc, _libraries, library_id) = harness().await;
        let err = svc.create_chunk(library_id, "", vec![0.0; 4], None, None, None).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn create_chunk_honors_a_caller_supplied_chunk_index() {
        let (svc, _libraries, library_id) = harness().await;
        let document_id = Uuid::new_v4();
        let second = svc.create_chunk(library_id, "second", vec![1.0, 0.0, 0.0, 0.0], Some(document_id), Some(1), None).await.unwrap();
        let first = svc.create_chunk(library_id, "first", vec![0.0, 1.0, 0.0, 0.0], Some(document_id), Some(0), None).await.unwrap();

        let ordered = svc.get_chunks_by_document(document_id).await;
        assert_eq!(ordered.iter().map(|c| c.id).collect::<Vec<_>>(), vec![first.id, second.id]);
    }

    // ═══ Update Tests ═══

    #[tokio::test]
    async fn update_chunk_moves_the_vector_in_the_index() {
        let (svc, libraries, library_id) = harness().await;
        let chunk = svc.create_chunk(library_id, "hello", vec![1.0, 0.0, 0.0, 0.0], None, None, None).await.unwrap();
        svc.update_chunk(chunk.id, None, Some(vec![0.0, 1.0, 0.0, 0.0]), None, None).await.unwrap();
        let index = libraries.index_for(library_id).await.unwrap();
        let hits = index.search(&[0.0, 1.0, 0.0, 0.0], 1, None).await.unwrap();
        assert_eq!(hits[0].0, chunk.id);
    }

    #[tokio::test]
    async fn update_chunk_can_reassign_its_chunk_index() {
        let (svc, _libraries, library_id) = harness().await;
        let chunk = svc.create_chunk(library_id, "hello", vec![1.0, 0.0, 0.0, 0.0], None, Some(0), None).await.unwrap();
        let updated = svc.update_chunk(chunk.id, None, None, Some(5), None).await.unwrap();
        assert_eq!(updated.chunk_index, 5);
    }

    // ═══ Delete Tests ═══

    #[tokio::test]
    async fn delete_chunk_removes_from_index_and_decrements_counter() {
        let (svc, libraries, library_id) = harness().await;
        let chunk = svc.create_chunk(library_id, "hello", vec![1.0, 0.0, 0.0, 0.0], None, None, None).await.unwrap();
        assert!(svc.delete_chunk(chunk.id).await.unwrap());
        let index = libraries.index_for(library_id).await.unwrap();
        assert_eq!(index.size().await, 0);
        let library = libraries.get_library(library_id).await.unwrap();
        assert_eq!(library.total_chunks, 0);
    }

    #[tokio::test]
    async fn delete_chunks_by_document_removes_all_of_them() {
        let (svc, libraries, library_id) = harness().await;
        let document_id = Uuid::new_v4();
        for _ in 0..3 {
            svc.create_chunk(library_id, "hello", vec![1.0, 0.0, 0.0, 0.0], Some(document_id), None, None).await.unwrap();
        }
        let removed = svc.delete_chunks_by_document(library_id, document_id).await.unwrap();
        assert_eq!(removed, 3);
        let index = libraries.index_for(library_id).await.unwrap();
        assert_eq!(index.size().await, 0);
    }
}
