//! Retrieval coordinator: indexing, semantic search, context assembly, and
//! knowledge bases.
//!
//! # Indexing
//!
//! `index_content` chunks the text, embeds every chunk through the
//! [`EmbeddingService`], writes the entry to the [`ContentStore`], then the
//! vectors to the [`VectorStore`]. If the vector write fails the content
//! entry is deleted again, so a failed index call leaves nothing
//! searchable. The two writes are not one transaction: a crash between
//! them can still orphan one side, and search skips hits it cannot
//! hydrate.
//!
//! # Search
//!
//! The vector store ranks chunks; results are grouped per index entry,
//! scored by their best chunk, hydrated from the content store, optionally
//! reranked, and optionally annotated with query suggestions.
//!
//! # Context
//!
//! `get_relevant_context` runs a search with a fixed policy
//! (top 20, threshold 0.6, chunks included, reranked) and admits whole
//! chunks in result order, then chunk order, until the next chunk would
//! exceed the token budget. Nothing is admitted after that point.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::chunk::{annotate_with_segments, TextChunker, TranscriptSegment};
use crate::embedding::EmbeddingService;
use crate::error::{RagError, RagResult};
use crate::models::{
    Chunk, ContentMetadata, ContentType, IndexEntry, KnowledgeBase, KnowledgeBaseMetadata,
    KnowledgeBaseStatistics, RagContext, SearchFilters, SearchOptions, SearchResult,
    SemanticSearchResponse, SourceReference,
};
use crate::sources::{SourceContent, SourceRepository};
use crate::store::{ContentStore, VectorHit, VectorStore};
use crate::tokens::estimate_tokens;

/// Search policy used when assembling a context.
pub const CONTEXT_TOP_K: usize = 20;
pub const CONTEXT_THRESHOLD: f32 = 0.6;

/// Most suggestion terms returned by a search.
const MAX_SUGGESTIONS: usize = 3;

/// Post-search reordering of results.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, results: Vec<SearchResult>) -> RagResult<Vec<SearchResult>>;
}

/// Orders results by descending similarity. Stable, so ties keep the
/// store's order.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScoreReranker;

#[async_trait]
impl Reranker for ScoreReranker {
    async fn rerank(&self, _query: &str, mut results: Vec<SearchResult>) -> RagResult<Vec<SearchResult>> {
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(results)
    }
}

pub struct RagEngine {
    embeddings: Arc<EmbeddingService>,
    vectors: Arc<dyn VectorStore>,
    content: Arc<dyn ContentStore>,
    sources: Option<Arc<dyn SourceRepository>>,
    chunker: TextChunker,
    reranker: Arc<dyn Reranker>,
}

fn storage_err(err: anyhow::Error) -> RagError {
    RagError::Storage(format!("{err:#}"))
}

impl RagEngine {
    pub fn new(
        embeddings: Arc<EmbeddingService>,
        vectors: Arc<dyn VectorStore>,
        content: Arc<dyn ContentStore>,
        chunker: TextChunker,
    ) -> Self {
        Self {
            embeddings,
            vectors,
            content,
            sources: None,
            chunker,
            reranker: Arc::new(ScoreReranker),
        }
    }

    pub fn with_sources(mut self, sources: Arc<dyn SourceRepository>) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = reranker;
        self
    }

    pub fn embeddings(&self) -> &Arc<EmbeddingService> {
        &self.embeddings
    }

    // ============ Indexing ============

    /// Chunk, embed, and store `text` under a fresh index id.
    #[instrument(skip(self, text, metadata), fields(project = %metadata.project_id, content = %metadata.id))]
    pub async fn index_content(&self, text: &str, metadata: ContentMetadata) -> RagResult<String> {
        if text.trim().is_empty() {
            return Err(RagError::InvalidInput(format!(
                "content '{}' is empty",
                metadata.id
            )));
        }
        let chunks = self.chunker.chunk(text);
        self.index_chunks(chunks, metadata).await
    }

    /// Like [`index_content`](Self::index_content), with chunk timings and
    /// speakers taken from the transcript's segments.
    #[instrument(skip_all, fields(project = %metadata.project_id, content = %metadata.id))]
    pub async fn index_transcript(
        &self,
        text: &str,
        segments: &[TranscriptSegment],
        metadata: ContentMetadata,
    ) -> RagResult<String> {
        if text.trim().is_empty() {
            return Err(RagError::InvalidInput(format!(
                "transcript '{}' is empty",
                metadata.id
            )));
        }
        let mut chunks = self.chunker.chunk(text);
        annotate_with_segments(&mut chunks, segments);
        self.index_chunks(chunks, metadata).await
    }

    async fn index_chunks(&self, mut chunks: Vec<Chunk>, metadata: ContentMetadata) -> RagResult<String> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embeddings.embed_batch(&texts).await?;
        for (chunk, vector) in chunks.iter_mut().zip(vectors) {
            chunk.embedding = Some(vector);
        }

        let entry = IndexEntry {
            index_id: uuid::Uuid::new_v4().to_string(),
            metadata,
            chunks,
        };

        self.content.save_entry(&entry).await.map_err(storage_err)?;

        if let Err(e) = self
            .vectors
            .store(&entry.index_id, &entry.chunks, &entry.metadata)
            .await
        {
            warn!(index_id = %entry.index_id, error = %e, "vector store write failed, rolling back content entry");
            if let Err(rollback) = self.content.delete_entry(&entry.index_id).await {
                warn!(index_id = %entry.index_id, error = %rollback, "rollback failed, content entry orphaned");
            }
            return Err(storage_err(e));
        }

        info!(index_id = %entry.index_id, chunks = entry.chunks.len(), "indexed content");
        Ok(entry.index_id)
    }

    /// Remove an entry from both stores. Absent ids are a no-op.
    #[instrument(skip(self))]
    pub async fn remove_index(&self, index_id: &str) -> RagResult<()> {
        self.vectors.remove(index_id).await.map_err(storage_err)?;
        self.content.delete_entry(index_id).await.map_err(storage_err)?;
        debug!("removed index entry");
        Ok(())
    }

    // ============ Search ============

    #[instrument(skip(self, filters, options), fields(top_k = options.top_k))]
    pub async fn semantic_search(
        &self,
        query: &str,
        filters: &SearchFilters,
        options: &SearchOptions,
    ) -> RagResult<SemanticSearchResponse> {
        if query.trim().is_empty() {
            return Err(RagError::InvalidInput("search query is empty".into()));
        }
        let started = Instant::now();

        let query_vector = self.embeddings.embed(query).await?;
        let hits = self
            .vectors
            .search(&query_vector, options.top_k, options.threshold, filters)
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        for (index_id, group) in group_hits(hits) {
            let Some(metadata) = self.content.get_metadata(&index_id).await.map_err(storage_err)? else {
                debug!(%index_id, "vector hit without content entry, skipping");
                continue;
            };
            let best = &group[0];
            let chunks = if options.include_chunks {
                let matched: HashSet<&str> = group.iter().map(|h| h.chunk_id.as_str()).collect();
                self.content
                    .get_chunks(&index_id)
                    .await
                    .map_err(storage_err)?
                    .into_iter()
                    .filter(|c| matched.contains(c.id.as_str()))
                    .collect()
            } else {
                Vec::new()
            };
            results.push(SearchResult {
                content: best.content.clone(),
                score: best.score,
                index_id,
                metadata,
                chunks,
            });
        }

        if options.reranking {
            results = self.reranker.rerank(query, results).await?;
        }

        let suggestions = if options.suggestions {
            generate_suggestions(query, &results)
        } else {
            Vec::new()
        };

        let search_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        debug!(results = results.len(), search_time_ms, "semantic search done");
        Ok(SemanticSearchResponse {
            total_results: results.len(),
            results,
            search_time_ms,
            suggestions,
        })
    }

    /// Assemble a token-bounded context for `query`. An empty corpus (or no
    /// hit above the threshold) yields an empty context, not an error.
    #[instrument(skip(self))]
    pub async fn get_relevant_context(
        &self,
        query: &str,
        project_id: Option<&str>,
        max_tokens: usize,
    ) -> RagResult<RagContext> {
        let filters = project_id
            .map(SearchFilters::for_project)
            .unwrap_or_default();
        let options = SearchOptions {
            top_k: CONTEXT_TOP_K,
            threshold: CONTEXT_THRESHOLD,
            include_chunks: true,
            reranking: true,
            suggestions: false,
        };
        let response = self.semantic_search(query, &filters, &options).await?;
        if response.results.is_empty() {
            return Ok(RagContext::empty(query));
        }

        let mut relevant_chunks = Vec::new();
        let mut total_tokens = 0;
        'admit: for result in &response.results {
            for chunk in &result.chunks {
                let tokens = estimate_tokens(&chunk.text);
                if total_tokens + tokens > max_tokens {
                    break 'admit;
                }
                total_tokens += tokens;
                relevant_chunks.push(chunk.clone());
            }
        }

        let confidence = response.results.iter().map(|r| r.score).sum::<f32>()
            / response.results.len() as f32;

        debug!(
            chunks = relevant_chunks.len(),
            total_tokens, confidence, "assembled context"
        );
        Ok(RagContext {
            query: query.to_string(),
            relevant_chunks,
            total_tokens,
            sources: response.results.iter().map(SourceReference::from_result).collect(),
            confidence: confidence.clamp(0.0, 1.0),
            retrieval_method: "semantic".to_string(),
        })
    }

    // ============ Knowledge bases ============

    /// Re-index everything the source repository holds for `project_id`
    /// and persist a fresh aggregate (version 1).
    ///
    /// The previous entries are removed only after every source indexed.
    /// On failure the new entries are rolled back and the stored knowledge
    /// base is left untouched.
    #[instrument(skip(self))]
    pub async fn build_knowledge_base(
        &self,
        project_id: &str,
        include_transcriptions: bool,
        include_documents: bool,
    ) -> RagResult<KnowledgeBase> {
        let items = self
            .list_sources(project_id, include_transcriptions, include_documents)
            .await?;
        let previous = self.content.list_entries(project_id).await.map_err(storage_err)?;

        let created = self.index_sources(project_id, items).await?;
        let indexed = created.len();

        for entry in &previous {
            self.remove_index(&entry.index_id).await?;
        }

        let now = Utc::now();
        let mut kb = self.aggregate(project_id).await?;
        kb.created_at = now;
        kb.last_updated = now;
        kb.version = 1;
        self.content.save_knowledge_base(&kb).await.map_err(storage_err)?;

        info!(indexed, total_chunks = kb.total_chunks, "built knowledge base");
        Ok(kb)
    }

    /// Re-index only the content items named in `changed_ids` (content
    /// ids, see [`ContentMetadata::id`]). Items that no longer exist in the
    /// source repository are dropped from the knowledge base. Stale entries
    /// are removed only once the replacements indexed.
    #[instrument(skip(self, changed_ids), fields(changed = changed_ids.len()))]
    pub async fn update_knowledge_base(
        &self,
        project_id: &str,
        changed_ids: &[String],
    ) -> RagResult<KnowledgeBase> {
        let existing = self
            .content
            .get_knowledge_base(project_id)
            .await
            .map_err(storage_err)?
            .ok_or_else(|| {
                RagError::InvalidInput(format!(
                    "no knowledge base for project '{project_id}'; build it first"
                ))
            })?;
        let changed: HashSet<&str> = changed_ids.iter().map(String::as_str).collect();

        let items: Vec<SourceContent> = self
            .list_sources(project_id, true, true)
            .await?
            .into_iter()
            .filter(|item| changed.contains(item.metadata.id.as_str()))
            .collect();
        let stale: Vec<IndexEntry> = self
            .content
            .list_entries(project_id)
            .await
            .map_err(storage_err)?
            .into_iter()
            .filter(|entry| changed.contains(entry.metadata.id.as_str()))
            .collect();

        self.index_sources(project_id, items).await?;
        for entry in &stale {
            self.remove_index(&entry.index_id).await?;
        }

        let mut kb = self.aggregate(project_id).await?;
        kb.id = existing.id;
        kb.created_at = existing.created_at;
        kb.last_updated = Utc::now();
        kb.version = existing.version + 1;
        self.content.save_knowledge_base(&kb).await.map_err(storage_err)?;

        info!(version = kb.version, "updated knowledge base");
        Ok(kb)
    }

    pub async fn get_knowledge_base(&self, project_id: &str) -> RagResult<Option<KnowledgeBase>> {
        self.content
            .get_knowledge_base(project_id)
            .await
            .map_err(storage_err)
    }

    async fn list_sources(
        &self,
        project_id: &str,
        include_transcriptions: bool,
        include_documents: bool,
    ) -> RagResult<Vec<SourceContent>> {
        let sources = self
            .sources
            .as_ref()
            .ok_or_else(|| RagError::Config("no source repository configured".into()))?;

        let mut items = Vec::new();
        if include_transcriptions {
            items.extend(
                sources
                    .list_transcriptions(project_id)
                    .await
                    .map_err(storage_err)?,
            );
        }
        if include_documents {
            items.extend(sources.list_documents(project_id).await.map_err(storage_err)?);
        }
        Ok(items)
    }

    /// Index every non-empty item and return the new index ids. If any item
    /// fails, the entries created so far are removed again before the error
    /// is returned, leaving the project's existing entries as they were.
    async fn index_sources(&self, project_id: &str, items: Vec<SourceContent>) -> RagResult<Vec<String>> {
        let mut created = Vec::new();
        for item in items {
            if item.text.trim().is_empty() {
                warn!(content = %item.metadata.id, "skipping empty source");
                continue;
            }
            let mut metadata = item.metadata;
            metadata.project_id = project_id.to_string();
            let content_id = metadata.id.clone();

            match self.index_content(&item.text, metadata).await {
                Ok(index_id) => created.push(index_id),
                Err(err) => {
                    warn!(content = %content_id, error = %err, rolled_back = created.len(), "indexing failed, rolling back");
                    for index_id in &created {
                        if let Err(cleanup) = self.remove_index(index_id).await {
                            warn!(%index_id, error = %cleanup, "rollback left an entry behind");
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(created)
    }

    /// Aggregate of the project's current entries. Timestamps and version
    /// are left for the caller to set.
    async fn aggregate(&self, project_id: &str) -> RagResult<KnowledgeBase> {
        let entries = self.content.list_entries(project_id).await.map_err(storage_err)?;

        let mut metadata = KnowledgeBaseMetadata::default();
        let mut total_chunks = 0;
        let mut total_tokens = 0;
        let mut total_characters = 0;
        for entry in &entries {
            let meta = &entry.metadata;
            metadata.content_types.insert(meta.content_type);
            metadata.languages.insert(meta.language.clone());
            metadata.tags.extend(meta.tags.iter().cloned());
            match meta.content_type {
                ContentType::Transcription => metadata.statistics.transcription_count += 1,
                ContentType::Document => metadata.statistics.document_count += 1,
            }

            total_chunks += entry.chunks.len();
            total_characters += entry
                .chunks
                .iter()
                .map(|c| c.text.chars().count())
                .sum::<usize>();
            total_tokens += estimate_tokens(&reassemble(&entry.chunks));
        }

        metadata.statistics = KnowledgeBaseStatistics {
            average_chunk_size: if total_chunks == 0 {
                0.0
            } else {
                total_characters as f64 / total_chunks as f64
            },
            total_characters,
            ..metadata.statistics
        };

        let now = Utc::now();
        Ok(KnowledgeBase {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            total_documents: entries.len(),
            total_chunks,
            total_tokens,
            metadata,
            index_ids: entries.iter().map(|e| e.index_id.clone()).collect(),
            created_at: now,
            last_updated: now,
            version: 1,
        })
    }
}

/// Group chunk hits by entry, keeping the store's ranking: groups appear in
/// order of their best hit, and each group's first hit is its best.
fn group_hits(hits: Vec<VectorHit>) -> Vec<(String, Vec<VectorHit>)> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<VectorHit>> = HashMap::new();
    for hit in hits {
        if !groups.contains_key(&hit.index_id) {
            order.push(hit.index_id.clone());
        }
        groups.entry(hit.index_id.clone()).or_default().push(hit);
    }
    order
        .into_iter()
        .filter_map(|id| groups.remove(&id).map(|g| (id, g)))
        .collect()
}

/// Rebuild the source text from its overlapping chunks.
fn reassemble(chunks: &[Chunk]) -> String {
    let mut text = String::new();
    let mut covered: usize = 0;
    for chunk in chunks {
        let skip = covered.saturating_sub(chunk.start_index);
        text.extend(chunk.text.chars().skip(skip));
        covered = covered.max(chunk.end_index);
    }
    text
}

/// Up to three frequent content words from the results that the query does
/// not already contain. Ties break alphabetically.
pub fn generate_suggestions(query: &str, results: &[SearchResult]) -> Vec<String> {
    let query_terms: HashSet<String> = words(query).collect();

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for result in results {
        for word in words(&result.content) {
            if word.chars().count() > 2 && !query_terms.contains(&word) {
                *counts.entry(word).or_default() += 1;
            }
        }
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|(word, _)| word)
        .collect()
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}
