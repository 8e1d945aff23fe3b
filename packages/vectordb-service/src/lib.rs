//! The vector database's service layer: [`LibraryService`], [`ChunkService`]
//! and [`SearchService`] coordinate the repositories and indexes in
//! `vectordb-storage`/`vectordb-core` behind one process-wide [`VectorDb`]
//! handle.
//!
//! ## Modules
//!
//! - [`config`] — environment-driven process configuration.
//! - [`error`] — the caller-facing [`error::ServiceError`] taxonomy.
//! - [`telemetry`] — `tracing` subscriber setup.
//! - [`library_service`], [`chunk_service`], [`search_service`] — the three
//!   coordinators named in the system overview.

pub mod chunk_service;
pub mod config;
pub mod error;
pub mod library_service;
pub mod search_service;
pub mod telemetry;

use std::sync::Arc;

use uuid::Uuid;
use vectordb_core::concurrency::LockManager;
use vectordb_storage::domain::document::DocumentUpdate;
use vectordb_storage::wal::OperationType;
use vectordb_storage::{ChunkRepository, Document, DocumentRepository, LibraryRepository, PersistenceManager, RecoveryReport, RecoveryService, SnapshotStore, WriteAheadLog};

pub use chunk_service::ChunkService;
pub use config::Config;
pub use error::{ErrorKind, Result, ServiceError};
pub use library_service::LibraryService;
pub use search_service::{SearchResult, SearchService};

fn check_document_name(name: &str) -> Result<()> {
    if !(1..=255).contains(&name.len()) {
        return Err(ServiceError::validation("name", format!("must be between 1 and 255 characters, got {}", name.len())));
    }
    Ok(())
}

/// Process-wide handle: constructs the repositories, lock manager, and the
/// three services from one [`Config`], optionally wired to a durability
/// pipeline. This is the system's single top-level wiring struct — services
/// and the persistence layer are constructed once at process start rather
/// than through a singleton factory.
pub struct VectorDb {
    pub config: Config,
    pub locks: Arc<LockManager>,
    pub libraries: Arc<LibraryService>,
    pub chunks: Arc<ChunkService>,
    pub search: Arc<SearchService>,
    documents: Arc<DocumentRepository>,
    chunk_repository: Arc<ChunkRepository>,
    persistence: Option<Arc<PersistenceManager>>,
    recovery: Option<Arc<RecoveryService>>,
}

impl VectorDb {
    /// In-memory only: no WAL, no snapshots, nothing durable. Useful for
    /// tests and for `persistence_enabled = false`.
    pub fn in_memory(config: Config) -> Self {
        let library_repository = Arc::new(LibraryRepository::new());
        let chunk_repository = Arc::new(ChunkRepository::new());
        let documents = Arc::new(DocumentRepository::new());
        let locks = Arc::new(LockManager::new());

        let libraries = Arc::new(LibraryService::new(library_repository, None, Arc::new(config.clone())));
        let search = Arc::new(SearchService::new(chunk_repository.clone(), libraries.clone()));
        let chunks = Arc::new(ChunkService::new(chunk_repository.clone(), libraries.clone(), locks.clone(), None, Some(search.clone())));

        Self { config, locks, libraries, chunks, search, documents, chunk_repository, persistence: None, recovery: None }
    }

    /// Opens the WAL and snapshot store under `config`'s directories and
    /// wires them into every write path.
    pub async fn with_persistence(config: Config) -> Result<Self> {
        if !config.persistence_enabled {
            return Ok(Self::in_memory(config));
        }

        let wal = Arc::new(WriteAheadLog::open(config.wal_directory.clone()).await?);
        let snapshots = Arc::new(SnapshotStore::new(config.snapshot_directory.clone(), true).await?);
        let persistence = Arc::new(PersistenceManager::new(wal, snapshots));

        let library_repository = Arc::new(LibraryRepository::new());
        let chunk_repository = Arc::new(ChunkRepository::new());
        let documents = Arc::new(DocumentRepository::new());
        let locks = Arc::new(LockManager::new());

        let recovery = Arc::new(RecoveryService::new(persistence.clone(), library_repository.clone(), chunk_repository.clone(), documents.clone()));

        let libraries = Arc::new(LibraryService::new(library_repository, Some(persistence.clone()), Arc::new(config.clone())));
        let search = Arc::new(SearchService::new(chunk_repository.clone(), libraries.clone()));
        let chunks = Arc::new(ChunkService::new(chunk_repository.clone(), libraries.clone(), locks.clone(), Some(persistence.clone()), Some(search.clone())));

        Ok(Self { config, locks, libraries, chunks, search, documents, chunk_repository, persistence: Some(persistence), recovery: Some(recovery) })
    }

    /// Replays the durability pipeline, then rebuilds every library's index
    /// from the chunks that came back — indexes are never persisted
    /// directly, only implied by replayed chunk creates (see the design
    /// notes on recovery in this crate's storage layer).
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let recovery = self.recovery.as_ref().ok_or_else(|| ServiceError::internal("recovery requires a persistence-backed VectorDb"))?;
        let report = recovery.recover_system().await?;

        for library in self.libraries.list_libraries(None, usize::MAX, 0).await {
            let chunks = self.chunk_repository.list_by_library(library.id, usize::MAX, 0).await;
            if chunks.is_empty() {
                continue;
            }
            let index = self.libraries.index_for(library.id).await?;
            let vectors = chunks.into_iter().map(|c| (c.id, c.embedding)).collect();
            index.add_batch(vectors).await?;
        }

        Ok(report)
    }

    pub async fn shutdown(&self) -> Result<()> {
        if let Some(persistence) = &self.persistence {
            persistence.shutdown().await?;
        }
        Ok(())
    }

    async fn log_document(&self, operation_type: OperationType, resource_id: Uuid, data: serde_json::Value) -> Result<()> {
        if let Some(persistence) = &self.persistence {
            persistence.log_operation(operation_type, resource_id, data).await?;
        }
        Ok(())
    }

    pub async fn create_document(&self, library_id: Uuid, name: impl Into<String>, tags: Vec<String>, metadata: Option<serde_json::Value>) -> Result<Document> {
        self.libraries.get_library(library_id).await?;
        let name = name.into();
        check_document_name(&name)?;
        let mut document = Document::new(library_id, name);
        document.tags = tags;
        if let Some(metadata) = metadata {
            document.metadata = metadata;
        }
        self.log_document(OperationType::CreateDocument, document.id, serde_json::to_value(&document).map_err(|e| ServiceError::internal(e.to_string()))?).await?;
        let created = self.documents.create(document).await?;
        self.libraries.adjust_stats(library_id, 1, 0).await?;
        Ok(created)
    }

    pub async fn get_document(&self, id: Uuid) -> Result<Document> {
        Ok(self.documents.get(id).await?)
    }

    pub async fn update_document(&self, id: Uuid, name: Option<String>, tags: Option<Vec<String>>, metadata: Option<serde_json::Value>) -> Result<Document> {
        if let Some(name) = &name {
            check_document_name(name)?;
        }
        let changes = DocumentUpdate { name, tags, metadata };
        let updated = self.documents.update(id, changes).await?;
        self.log_document(OperationType::UpdateDocument, updated.id, serde_json::to_value(&updated).map_err(|e| ServiceError::internal(e.to_string()))?).await?;
        Ok(updated)
    }

    pub async fn delete_document(&self, id: Uuid) -> Result<bool> {
        let document = self.documents.get(id).await?;
        let removed_chunks = self.chunks.delete_chunks_by_document(document.library_id, id).await?;
        let deleted = self.documents.delete(id).await?;
        if deleted {
            self.log_document(OperationType::DeleteDocument, id, serde_json::Value::Null).await?;
            self.libraries.adjust_stats(document.library_id, -1, -(removed_chunks as i64)).await?;
        }
        Ok(deleted)
    }

    pub async fn list_documents(&self, library_id: Uuid, limit: usize, offset: usize) -> Vec<Document> {
        self.documents.list_by_library(library_id, limit, offset).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vectordb_core::index::IndexKind;

    // ═══ Wiring Tests ═══

    #[tokio::test]
    async fn in_memory_db_creates_libraries_chunks_and_searches_them() {
        let db = VectorDb::in_memory(Config::default());
        let library = db.libraries.create_library("L", 4, IndexKind::Lsh, None, None).await.unwrap();
        db.chunks.create_chunk(library.id, "hello", vec![1.0, 0.0, 0.0, 0.0], None, None, None).await.unwrap();

        let results = db.search.search(library.id, vec![1.0, 0.0, 0.0, 0.0], 1, None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "hello");
    }

    #[tokio::test]
    async fn document_lifecycle_tracks_library_counters() {
        let db = VectorDb::in_memory(Config::default());
        let library = db.libraries.create_library("L", 4, IndexKind::Lsh, None, None).await.unwrap();
        let document = db.create_document(library.id, "report.pdf", vec!["final".into()], None).await.unwrap();
        assert_eq!(db.libraries.get_library(library.id).await.unwrap().total_documents, 1);

        db.chunks.create_chunk(library.id, "chunk one", vec![1.0, 0.0, 0.0, 0.0], Some(document.id), None, None).await.unwrap();
        assert!(db.delete_document(document.id).await.unwrap());

        let library = db.libraries.get_library(library.id).await.unwrap();
        assert_eq!(library.total_documents, 0);
        assert_eq!(library.total_chunks, 0);
    }

    #[tokio::test]
    async fn create_document_rejects_an_empty_name() {
        let db = VectorDb::in_memory(Config::default());
        let library = db.libraries.create_library("L", 4, IndexKind::Lsh, None, None).await.unwrap();
        let err = db.create_document(library.id, "", Vec::new(), None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn create_document_rejects_a_name_over_255_characters() {
        let db = VectorDb::in_memory(Config::default());
        let library = db.libraries.create_library("L", 4, IndexKind::Lsh, None, None).await.unwrap();
        let err = db.create_document(library.id, "x".repeat(256), Vec::new(), None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn update_document_rejects_an_empty_name() {
        let db = VectorDb::in_memory(Config::default());
        let library = db.libraries.create_library("L", 4, IndexKind::Lsh, None, None).await.unwrap();
        let document = db.create_document(library.id, "report.pdf", Vec::new(), None).await.unwrap();
        let err = db.update_document(document.id, Some(String::new()), None, None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn recover_without_persistence_is_rejected() {
        let db = VectorDb::in_memory(Config::default());
        let err = db.recover().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }
}
