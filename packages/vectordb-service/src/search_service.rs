//! Vector search over a library's index, reified against its chunk
//! repository, with an optional metadata pre-filter and a small result
//! cache.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::task::JoinSet;
use uuid::Uuid;
use vectordb_core::concurrency::ReaderWriterLock;
use vectordb_storage::ChunkRepository;

use crate::error::{Result, ServiceError};
use crate::library_service::LibraryService;

/// Candidates beyond `k` this many times over are pulled from a metadata
/// pre-filter before handing the id set to the index, giving the index room
/// to rank within the filtered set rather than just intersecting its raw
/// top-k with the filter.
const FILTER_CANDIDATE_MULTIPLIER: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub chunk_id: Uuid,
    pub content: String,
    pub distance: f32,
    pub score: f32,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    library_id: Uuid,
    k: usize,
    fingerprint: u64,
    filters: Option<String>,
}

fn fingerprint(query: &[f32]) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    query.len().hash(&mut hasher);
    for value in query {
        value.to_bits().hash(&mut hasher);
    }
    hasher.finish()
}

pub struct SearchService {
    chunks: Arc<ChunkRepository>,
    libraries: Arc<LibraryService>,
    /// Caching is correctness-optional; the source references a cache lock
    /// it never initializes, so this one is guarded explicitly and
    /// invalidated on every write that could change its answers.
    cache: ReaderWriterLock<HashMap<CacheKey, Vec<SearchResult>>>,
}

impl SearchService {
    pub fn new(chunks: Arc<ChunkRepository>, libraries: Arc<LibraryService>) -> Self {
        Self { chunks, libraries, cache: ReaderWriterLock::new(HashMap::new()) }
    }

    fn cache_key(library_id: Uuid, k: usize, query: &[f32], filters: &Option<Map<String, Value>>) -> CacheKey {
        CacheKey { library_id, k, fingerprint: fingerprint(query), filters: filters.as_ref().map(|f| Value::Object(f.clone()).to_string()) }
    }

    pub async fn search(&self, library_id: Uuid, query: Vec<f32>, k: usize, metadata_filters: Option<Map<String, Value>>) -> Result<Vec<SearchResult>> {
        let library = self.libraries.get_library(library_id).await?;
        if query.len() != library.dimension {
            return Err(ServiceError::validation("embedding", format!("expected length {}, got {}", library.dimension, query.len())));
        }

        let key = Self::cache_key(library_id, k, &query, &metadata_filters);
        if let Some(hit) = self.cache.read().await.get(&key) {
            return Ok(hit.clone());
        }

        let filter_ids = match &metadata_filters {
            Some(filters) => {
                let candidates = self.chunks.search_by_metadata(library_id, filters).await;
                Some(candidates.into_iter().take(k * FILTER_CANDIDATE_MULTIPLIER).map(|c| c.id).collect::<Vec<_>>())
            }
            None => None,
        };

        let index = self.libraries.index_for(library_id).await?;
        let hits = index
            .search(&query, k, filter_ids.as_deref())
            .await
            .map_err(|err| ServiceError::index(format!("{:?}", library.index_kind), "search", err.to_string()))?;

        let mut results = Vec::with_capacity(hits.len());
        for (chunk_id, distance) in hits {
            if let Ok(chunk) = self.chunks.get(chunk_id).await {
                results.push(SearchResult { chunk_id, content: chunk.content, distance, score: 1.0 / (1.0 + distance), metadata: chunk.metadata });
            }
        }

        self.cache.write().await.insert(key, results.clone());
        Ok(results)
    }

    /// Fans out independent per-library searches concurrently. A library
    /// that fails is logged and reported as an empty result list rather than
    /// aborting the whole call; libraries must all share a dimension or the
    /// call is rejected up front.
    pub async fn multi_library_search(
        self: &Arc<Self>,
        library_ids: Vec<Uuid>,
        query: Vec<f32>,
        k: usize,
        metadata_filters: Option<Map<String, Value>>,
    ) -> Result<HashMap<Uuid, Vec<SearchResult>>> {
        let mut expected_dimension = None;
        for library_id in &library_ids {
            let library = self.libraries.get_library(*library_id).await?;
            match expected_dimension {
                None => expected_dimension = Some(library.dimension),
                Some(dimension) if dimension != library.dimension => {
                    return Err(ServiceError::validation("library_ids", "all libraries in a multi-library search must share a dimension"));
                }
                _ => {}
            }
        }

        let mut tasks = JoinSet::new();
        for library_id in library_ids {
            let service = Arc::clone(self);
            let query = query.clone();
            let filters = metadata_filters.clone();
            tasks.spawn(async move {
                let results = service.search(library_id, query, k, filters).await.unwrap_or_else(|err| {
                    tracing::warn!(%library_id, %err, "multi_library_search: per-library search failed");
                    Vec::new()
                });
                (library_id, results)
            });
        }

        let mut results = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            if let Ok((library_id, hits)) = joined {
                results.insert(library_id, hits);
            }
        }
        Ok(results)
    }

    /// Drops every cached entry for `library_id`. Called by `ChunkService`
    /// after any write that could change that library's search results.
    pub async fn invalidate_library(&self, library_id: Uuid) {
        self.cache.write().await.retain(|key, _| key.library_id != library_id);
    }

    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
    }
}
