//! In-memory [`VectorStore`] and [`ContentStore`] for tests and
//! single-process use.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Vector search is
//! brute-force cosine similarity over all stored vectors.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{rank_hits, without_embedding, ContentStore, VectorHit, VectorStore};
use crate::embedding::cosine_similarity;
use crate::models::{Chunk, ContentMetadata, IndexEntry, KnowledgeBase, SearchFilters};

struct StoredVector {
    index_id: String,
    chunk_id: String,
    content: String,
    vector: Vec<f32>,
}

struct StoredEntry {
    entry: IndexEntry,
    /// Insertion sequence, for stable listing order.
    seq: u64,
}

#[derive(Default)]
pub struct InMemoryStore {
    vectors: RwLock<Vec<StoredVector>>,
    vector_metadata: RwLock<HashMap<String, ContentMetadata>>,
    entries: RwLock<HashMap<String, StoredEntry>>,
    knowledge_bases: RwLock<HashMap<String, KnowledgeBase>>,
    next_seq: RwLock<u64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored chunk vectors.
    pub fn vector_count(&self) -> usize {
        self.vectors.read().map(|v| v.len()).unwrap_or(0)
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn store(
        &self,
        index_id: &str,
        chunks: &[Chunk],
        metadata: &ContentMetadata,
    ) -> Result<()> {
        let mut vectors = self.vectors.write().map_err(poisoned)?;
        vectors.retain(|sv| sv.index_id != index_id);
        for chunk in chunks {
            if let Some(vector) = &chunk.embedding {
                vectors.push(StoredVector {
                    index_id: index_id.to_string(),
                    chunk_id: chunk.id.clone(),
                    content: chunk.text.clone(),
                    vector: vector.clone(),
                });
            }
        }
        self.vector_metadata
            .write()
            .map_err(poisoned)?
            .insert(index_id.to_string(), metadata.clone());
        Ok(())
    }

    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        threshold: f32,
        filters: &SearchFilters,
    ) -> Result<Vec<VectorHit>> {
        let vectors = self.vectors.read().map_err(poisoned)?;
        let metadata = self.vector_metadata.read().map_err(poisoned)?;

        let hits: Vec<VectorHit> = vectors
            .iter()
            .filter(|sv| {
                metadata
                    .get(&sv.index_id)
                    .map(|m| filters.matches(m))
                    .unwrap_or(false)
            })
            .map(|sv| VectorHit {
                index_id: sv.index_id.clone(),
                chunk_id: sv.chunk_id.clone(),
                content: sv.content.clone(),
                score: cosine_similarity(embedding, &sv.vector),
            })
            .collect();

        Ok(rank_hits(hits, top_k, threshold))
    }

    async fn remove(&self, index_id: &str) -> Result<()> {
        self.vectors
            .write()
            .map_err(poisoned)?
            .retain(|sv| sv.index_id != index_id);
        self.vector_metadata
            .write()
            .map_err(poisoned)?
            .remove(index_id);
        Ok(())
    }
}

#[async_trait]
impl ContentStore for InMemoryStore {
    async fn save_entry(&self, entry: &IndexEntry) -> Result<()> {
        let seq = {
            let mut next = self.next_seq.write().map_err(poisoned)?;
            *next += 1;
            *next
        };
        let stored = IndexEntry {
            chunks: entry.chunks.iter().map(without_embedding).collect(),
            ..entry.clone()
        };
        self.entries
            .write()
            .map_err(poisoned)?
            .insert(entry.index_id.clone(), StoredEntry { entry: stored, seq });
        Ok(())
    }

    async fn get_metadata(&self, index_id: &str) -> Result<Option<ContentMetadata>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(index_id).map(|s| s.entry.metadata.clone()))
    }

    async fn get_chunks(&self, index_id: &str) -> Result<Vec<Chunk>> {
        let entries = self.entries.read().map_err(poisoned)?;
        let mut chunks = entries
            .get(index_id)
            .map(|s| s.entry.chunks.clone())
            .unwrap_or_default();
        chunks.sort_by_key(|c| c.metadata.chunk_number);
        Ok(chunks)
    }

    async fn delete_entry(&self, index_id: &str) -> Result<()> {
        self.entries.write().map_err(poisoned)?.remove(index_id);
        Ok(())
    }

    async fn list_entries(&self, project_id: &str) -> Result<Vec<IndexEntry>> {
        let entries = self.entries.read().map_err(poisoned)?;
        let mut matching: Vec<&StoredEntry> = entries
            .values()
            .filter(|s| s.entry.metadata.project_id == project_id)
            .collect();
        matching.sort_by_key(|s| s.seq);
        Ok(matching.into_iter().map(|s| s.entry.clone()).collect())
    }

    async fn save_knowledge_base(&self, kb: &KnowledgeBase) -> Result<()> {
        self.knowledge_bases
            .write()
            .map_err(poisoned)?
            .insert(kb.project_id.clone(), kb.clone());
        Ok(())
    }

    async fn get_knowledge_base(&self, project_id: &str) -> Result<Option<KnowledgeBase>> {
        let kbs = self.knowledge_bases.read().map_err(poisoned)?;
        Ok(kbs.get(project_id).cloned())
    }
}
