//! Document entity and its in-memory repository.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vectordb_core::concurrency::ReaderWriterLock;

use crate::error::{Result, StorageError};

/// A named grouping of chunks within a library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub library_id: Uuid,
    pub name: String,
    pub total_chunks: u64,
    /// Deduplicated, lowercased.
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(library_id: Uuid, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            library_id,
            name: name.into(),
            total_chunks: 0,
            tags: Vec::new(),
            metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }
}

fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut normalized = Vec::new();
    for tag in tags {
        let lower = tag.to_lowercase();
        if seen.insert(lower.clone()) {
            normalized.push(lower);
        }
    }
    normalized
}

#[derive(Debug, Clone, Default)]
pub struct DocumentUpdate {
    pub name: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
}

pub struct DocumentRepository {
    state: ReaderWriterLock<HashMap<Uuid, Document>>,
}

impl Default for DocumentRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentRepository {
    pub fn new() -> Self {
        Self { state: ReaderWriterLock::new(HashMap::new()) }
    }

    pub async fn create(&self, mut document: Document) -> Result<Document> {
        document.tags = normalize_tags(document.tags);
        let mut state = self.state.write().await;
        if state.contains_key(&document.id) {
            return Err(StorageError::conflict("duplicate_id", format!("document {} already exists", document.id)));
        }
        state.insert(document.id, document.clone());
        Ok(document)
    }

    pub async fn get(&self, id: Uuid) -> Result<Document> {
        let state = self.state.read().await;
        state.get(&id).cloned().ok_or_else(|| StorageError::not_found("document", id))
    }

    /// Whether `id` names an existing document, without cloning it.
    pub async fn exists(&self, id: Uuid) -> bool {
        self.state.read().await.contains_key(&id)
    }

    pub async fn update(&self, id: Uuid, changes: DocumentUpdate) -> Result<Document> {
        let mut state = self.state.write().await;
        let document = state.get_mut(&id).ok_or_else(|| StorageError::not_found("document", id))?;
        if let Some(name) = changes.name {
            document.name = name;
        }
        if let Some(tags) = changes.tags {
            document.tags = normalize_tags(tags);
        }
        if let Some(metadata) = changes.metadata {
            document.metadata = metadata;
        }
        document.updated_at = Utc::now();
        Ok(document.clone())
    }

    pub async fn update_chunk_count(&self, id: Uuid, total_chunks: u64) -> Result<()> {
        let mut state = self.state.write().await;
        let document = state.get_mut(&id).ok_or_else(|| StorageError::not_found("document", id))?;
        document.total_chunks = total_chunks;
        document.updated_at = Utc::now();
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.state.write().await.remove(&id).is_some())
    }

    pub async fn list_by_library(&self, library_id: Uuid, limit: usize, offset: usize) -> Vec<Document> {
        let state = self.state.read().await;
        let mut documents: Vec<Document> = state.values().filter(|d| d.library_id == library_id).cloned().collect();
        documents.sort_by_key(|d| d.created_at);
        documents.into_iter().skip(offset).take(limit).collect()
    }

    pub async fn count(&self) -> usize {
        self.state.read().await.len()
    }

    pub async fn count_by_library(&self, library_id: Uuid) -> usize {
        self.state.read().await.values().filter(|d| d.library_id == library_id).count()
    }

    /// Every document, in no particular order. Used to build a snapshot.
    pub async fn all(&self) -> Vec<Document> {
        self.state.read().await.values().cloned().collect()
    }

    /// Inserts or replaces a document by id, bypassing validation. Used
    /// only to replay a WAL entry during recovery.
    pub async fn put(&self, document: Document) {
        self.state.write().await.insert(document.id, document);
    }

    /// Replaces the repository's contents wholesale. Used to load a
    /// snapshot at recovery time.
    pub async fn restore(&self, documents: Vec<Document>) {
        let mut state = self.state.write().await;
        state.clear();
        for document in documents {
            state.insert(document.id, document);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ═══ Tag Normalization Tests ═══

    #[tokio::test]
    async fn create_dedupes_and_lowercases_tags() {
        let repo = DocumentRepository::new();
        let library_id = Uuid::new_v4();
        let mut document = Document::new(library_id, "report.pdf");
        document.tags = vec!["Report".into(), "report".into(), "FINAL".into()];
        let created = repo.create(document).await.unwrap();
        assert_eq!(created.tags, vec!["report".to_string(), "final".to_string()]);
    }

    #[tokio::test]
    async fn update_renormalizes_replaced_tags() {
        let repo = DocumentRepository::new();
        let library_id = Uuid::new_v4();
        let created = repo.create(Document::new(library_id, "a")).await.unwrap();
        let updated = repo
            .update(created.id, DocumentUpdate { tags: Some(vec!["A".into(), "a".into()]), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(updated.tags, vec!["a".to_string()]);
    }

    // ═══ Lifecycle Tests ═══

    #[tokio::test]
    async fn list_by_library_only_returns_matching_documents() {
        let repo = DocumentRepository::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        repo.create(Document::new(a, "x")).await.unwrap();
        repo.create(Document::new(b, "y")).await.unwrap();
        let docs = repo.list_by_library(a, 10, 0).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].library_id, a);
    }

    #[tokio::test]
    async fn delete_is_idempotent_false_on_missing() {
        let repo = DocumentRepository::new();
        assert!(!repo.delete(Uuid::new_v4()).await.unwrap());
    }
}
