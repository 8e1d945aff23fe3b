//! Owns the process-wide `library_id -> index` mapping and coordinates it
//! with [`LibraryRepository`].

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;
use vectordb_core::index::{IndexConfig, IndexFactory, IndexKind, IndexOverrides, Metric, VectorIndex};
use vectordb_storage::domain::library::LibraryUpdate;
use vectordb_storage::wal::OperationType;
use vectordb_storage::{Library, LibraryRepository, PersistenceManager};

use crate::config::Config;
use crate::error::{Result, ServiceError};

/// Library lifecycle plus the index each one owns. Indexes are held in a
/// process-local map, not the repository — they are reconstructed from
/// chunk data on recovery rather than persisted directly (§9: "the source
/// only persists entity state, reconstructing indexes implicitly from
/// replayed chunk creates").
pub struct LibraryService {
    repository: Arc<LibraryRepository>,
    persistence: Option<Arc<PersistenceManager>>,
    config: Arc<Config>,
    indexes: DashMap<Uuid, Arc<dyn VectorIndex>>,
}

impl LibraryService {
    pub fn new(repository: Arc<LibraryRepository>, persistence: Option<Arc<PersistenceManager>>, config: Arc<Config>) -> Self {
        Self { repository, persistence, config, indexes: DashMap::new() }
    }

    fn overrides_for(&self, kind: IndexKind) -> IndexOverrides {
        match kind {
            IndexKind::Lsh => IndexOverrides { num_tables: Some(self.config.lsh_tables), key_size: Some(self.config.lsh_key_size), ..Default::default() },
            IndexKind::Hnsw => IndexOverrides { m: Some(self.config.hnsw_m), ef_construction: Some(self.config.hnsw_ef_construction), ..Default::default() },
            IndexKind::KdTree => IndexOverrides::default(),
        }
    }

    fn build_index(&self, kind: IndexKind, dimension: usize) -> Result<Arc<dyn VectorIndex>> {
        let overrides = self.overrides_for(kind);
        let index = IndexFactory::create_index(kind, IndexConfig::new(dimension, Metric::Euclidean), Some(overrides))
            .map_err(|err| ServiceError::index(format!("{kind:?}"), "create", err.to_string()))?;
        Ok(Arc::from(index))
    }

    async fn log(&self, operation_type: OperationType, resource_id: Uuid, data: Value) -> Result<()> {
        if let Some(persistence) = &self.persistence {
            persistence.log_operation(operation_type, resource_id, data).await?;
        }
        Ok(())
    }

    /// Index construction happens before anything is persisted, so an
    /// invalid configuration never produces a half-created library.
    pub async fn create_library(
        &self,
        name: impl Into<String>,
        dimension: usize,
        index_kind: IndexKind,
        description: Option<String>,
        metadata: Option<Value>,
    ) -> Result<Library> {
        let name = name.into();
        if !(1..=4096).contains(&dimension) {
            return Err(ServiceError::validation("dimension", format!("{dimension} must be within [1, 4096]")));
        }
        if name.trim().is_empty() {
            return Err(ServiceError::validation("name", "must not be empty"));
        }

        let index = self.build_index(index_kind, dimension)?;

        let mut library = Library::new(name, dimension, index_kind);
        library.description = description;
        if let Some(metadata) = metadata {
            library.metadata = metadata;
        }

        self.log(OperationType::CreateLibrary, library.id, serde_json::to_value(&library).map_err(|e| ServiceError::internal(e.to_string()))?).await?;
        let created = self.repository.create(library).await?;
        self.indexes.insert(created.id, index);
        tracing::info!(library_id = %created.id, name = %created.name, kind = ?index_kind, "library created");
        Ok(created)
    }

    /// Reconstructs an empty index in the process-local map if it's missing
    /// — the state after recovery, before chunks are re-applied.
    fn ensure_index(&self, library: &Library) -> Result<Arc<dyn VectorIndex>> {
        if let Some(index) = self.indexes.get(&library.id) {
            return Ok(index.clone());
        }
        let index = self.build_index(library.index_kind, library.dimension)?;
        self.indexes.insert(library.id, index.clone());
        tracing::warn!(library_id = %library.id, "lazily reconstructed empty index for library missing from process map");
        Ok(index)
    }

    pub async fn get_library(&self, id: Uuid) -> Result<Library> {
        let library = self.repository.get(id).await?;
        self.ensure_index(&library)?;
        Ok(library)
    }

    /// The index instance backing `library_id`, constructing an empty one
    /// first if necessary. Used by [`crate::chunk_service::ChunkService`]
    /// and [`crate::search_service::SearchService`].
    pub async fn index_for(&self, library_id: Uuid) -> Result<Arc<dyn VectorIndex>> {
        let library = self.repository.get(library_id).await?;
        self.ensure_index(&library)
    }

    pub async fn update_library(&self, id: Uuid, name: Option<String>, description: Option<String>, metadata: Option<Value>) -> Result<Library> {
        let changes = LibraryUpdate { name, description, metadata };
        let updated = self.repository.update(id, changes).await?;
        self.log(OperationType::UpdateLibrary, updated.id, serde_json::to_value(&updated).map_err(|e| ServiceError::internal(e.to_string()))?).await?;
        Ok(updated)
    }

    pub async fn delete_library(&self, id: Uuid) -> Result<bool> {
        if let Some((_, index)) = self.indexes.remove(&id) {
            index.clear().await;
        }
        self.log(OperationType::DeleteLibrary, id, Value::Null).await?;
        let deleted = self.repository.delete(id).await?;
        if deleted {
            tracing::info!(library_id = %id, "library deleted");
        }
        Ok(deleted)
    }

    /// Optional finalizer for backends with an explicit build/train step;
    /// a no-op for the three shipped backends.
    pub async fn build_index(&self, library_id: Uuid) -> Result<()> {
        let library = self.repository.get(library_id).await?;
        let index = self.ensure_index(&library)?;
        index.build().await.map_err(|err| ServiceError::index(format!("{:?}", library.index_kind), "build", err.to_string()))
    }

    pub async fn list_libraries(&self, kind: Option<IndexKind>, limit: usize, offset: usize) -> Vec<Library> {
        self.repository.list(kind, limit, offset).await
    }

    pub async fn adjust_stats(&self, library_id: Uuid, document_delta: i64, chunk_delta: i64) -> Result<()> {
        Ok(self.repository.adjust_stats(library_id, document_delta, chunk_delta).await?)
    }
}
