//! Storage collaborators of the retrieval engine.
//!
//! Two traits split the persistence the engine needs:
//!
//! | Trait | Holds | Used for |
//! |-------|-------|----------|
//! | [`VectorStore`] | chunk vectors + the metadata needed to filter them | similarity search |
//! | [`ContentStore`] | index entries (metadata + chunks) and knowledge bases | hydrating hits, aggregates |
//!
//! Both return [`anyhow::Result`]; the engine re-wraps failures into
//! [`RagError::Storage`](crate::error::RagError::Storage). Removing an
//! absent id is a no-op in every implementation.
//!
//! Writes to the two stores are not one transaction. A crash between them
//! can leave a vector whose content entry is gone (or the reverse); search
//! skips hits it cannot hydrate.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{Chunk, ContentMetadata, IndexEntry, KnowledgeBase, SearchFilters};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// A chunk matched by a vector search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorHit {
    pub index_id: String,
    pub chunk_id: String,
    pub content: String,
    /// Cosine similarity to the query vector.
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Store the embedded `chunks` of one index entry. Chunks without an
    /// embedding are skipped. Replaces anything stored under `index_id`.
    async fn store(&self, index_id: &str, chunks: &[Chunk], metadata: &ContentMetadata)
        -> Result<()>;

    /// Up to `top_k` chunks with similarity `>= threshold` whose entry
    /// matches `filters`, best first.
    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        threshold: f32,
        filters: &SearchFilters,
    ) -> Result<Vec<VectorHit>>;

    async fn remove(&self, index_id: &str) -> Result<()>;
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Insert or replace an entry. Chunk embeddings are not persisted here.
    async fn save_entry(&self, entry: &IndexEntry) -> Result<()>;

    async fn get_metadata(&self, index_id: &str) -> Result<Option<ContentMetadata>>;

    /// Chunks of an entry ordered by chunk number; empty when absent.
    async fn get_chunks(&self, index_id: &str) -> Result<Vec<Chunk>>;

    async fn delete_entry(&self, index_id: &str) -> Result<()>;

    /// Every entry of a project, oldest first.
    async fn list_entries(&self, project_id: &str) -> Result<Vec<IndexEntry>>;

    /// Insert or replace the knowledge base of `kb.project_id`.
    async fn save_knowledge_base(&self, kb: &KnowledgeBase) -> Result<()>;

    async fn get_knowledge_base(&self, project_id: &str) -> Result<Option<KnowledgeBase>>;
}

/// Sort hits best first, drop those under `threshold`, keep `top_k`.
pub(crate) fn rank_hits(mut hits: Vec<VectorHit>, top_k: usize, threshold: f32) -> Vec<VectorHit> {
    hits.retain(|h| h.score >= threshold);
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(top_k);
    hits
}

/// Copy of `chunk` as the content store keeps it.
pub(crate) fn without_embedding(chunk: &Chunk) -> Chunk {
    Chunk {
        embedding: None,
        ..chunk.clone()
    }
}
