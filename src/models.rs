//! Core data models used throughout the retrieval pipeline.
//!
//! These types represent the indexed content, its chunks, and the
//! query-scoped bundles (search responses, RAG contexts, answers) that flow
//! from the vector store to the language model.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of content an index entry was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Transcription,
    Document,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transcription => "transcription",
            Self::Document => "document",
        }
    }
}

/// Where an indexed unit came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub title: Option<String>,
    /// File path, URL, or recording identifier of the original.
    pub origin: Option<String>,
    pub author: Option<String>,
    /// Recording duration, for transcriptions.
    pub duration_secs: Option<f64>,
}

/// Metadata for one indexed unit (a transcription or a document).
///
/// Created at index time and never mutated in place: re-indexing deletes
/// the entry and recreates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentMetadata {
    pub id: String,
    pub content_type: ContentType,
    pub project_id: String,
    pub recording_id: Option<String>,
    pub document_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub language: String,
    pub tags: BTreeSet<String>,
    pub source_info: SourceInfo,
}

impl ContentMetadata {
    pub fn new(content_type: ContentType, project_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content_type,
            project_id: project_id.into(),
            recording_id: None,
            document_id: None,
            timestamp: Utc::now(),
            language: "ja".to_string(),
            tags: BTreeSet::new(),
            source_info: SourceInfo::default(),
        }
    }

    /// Display title, falling back to `"Untitled"`.
    pub fn title(&self) -> String {
        self.source_info
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "Untitled".to_string())
    }
}

/// Position of a chunk within its parent text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// 1-based position, `1 <= chunk_number <= total_chunks`.
    pub chunk_number: usize,
    pub total_chunks: usize,
    /// Audio offsets, for chunks cut from a timed transcript.
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub speaker: Option<String>,
}

/// A bounded, overlapping slice of source text.
///
/// `start_index`/`end_index` are character offsets into the original text
/// (`end_index` exclusive).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub start_index: usize,
    pub end_index: usize,
    pub embedding: Option<Vec<f32>>,
    pub metadata: ChunkMetadata,
}

/// Persisted association `index_id -> (metadata, chunks)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub index_id: String,
    pub metadata: ContentMetadata,
    pub chunks: Vec<Chunk>,
}

/// Inclusive timestamp window used by search filters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

/// Restricts which index entries a vector search may return.
/// Empty collections mean "no restriction".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub project_id: Option<String>,
    pub content_types: Vec<ContentType>,
    pub languages: Vec<String>,
    /// Matches when the entry carries any of these tags.
    pub tags: Vec<String>,
    pub date_range: Option<DateRange>,
}

impl SearchFilters {
    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, meta: &ContentMetadata) -> bool {
        if let Some(project) = &self.project_id {
            if &meta.project_id != project {
                return false;
            }
        }
        if !self.content_types.is_empty() && !self.content_types.contains(&meta.content_type) {
            return false;
        }
        if !self.languages.is_empty() && !self.languages.contains(&meta.language) {
            return false;
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| meta.tags.contains(t)) {
            return false;
        }
        if let Some(range) = &self.date_range {
            if !range.contains(meta.timestamp) {
                return false;
            }
        }
        true
    }
}

/// Per-call knobs for [`RagEngine::semantic_search`](crate::rag::RagEngine::semantic_search).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub top_k: usize,
    /// Minimum cosine similarity for a hit to be returned.
    pub threshold: f32,
    pub include_chunks: bool,
    pub reranking: bool,
    pub suggestions: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            threshold: 0.5,
            include_chunks: false,
            reranking: false,
            suggestions: false,
        }
    }
}

/// One index entry matched by a semantic search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub index_id: String,
    /// Text of the best-matching chunk.
    pub content: String,
    /// Best cosine similarity among the entry's matching chunks.
    pub score: f32,
    pub metadata: ContentMetadata,
    /// Matching chunks in chunk order; empty unless `include_chunks` was set.
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SemanticSearchResponse {
    pub results: Vec<SearchResult>,
    pub total_results: usize,
    /// Wall-clock search time in milliseconds.
    pub search_time_ms: f64,
    pub suggestions: Vec<String>,
}

/// Citation attached to a context or answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceReference {
    pub index_id: String,
    pub title: String,
    pub content_type: ContentType,
    pub project_id: String,
    pub recording_id: Option<String>,
    pub document_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub score: f32,
}

impl SourceReference {
    pub fn from_result(result: &SearchResult) -> Self {
        let meta = &result.metadata;
        Self {
            index_id: result.index_id.clone(),
            title: meta.title(),
            content_type: meta.content_type,
            project_id: meta.project_id.clone(),
            recording_id: meta.recording_id.clone(),
            document_id: meta.document_id.clone(),
            timestamp: meta.timestamp,
            score: result.score,
        }
    }
}

/// Token-bounded, query-scoped bundle of retrieved chunks.
///
/// Invariant: `total_tokens <= max_tokens` requested when it was built.
#[derive(Debug, Clone, Serialize)]
pub struct RagContext {
    pub query: String,
    pub relevant_chunks: Vec<Chunk>,
    pub total_tokens: usize,
    pub sources: Vec<SourceReference>,
    /// Mean similarity across the search results used, in `[0, 1]`.
    pub confidence: f32,
    pub retrieval_method: String,
}

impl RagContext {
    pub fn empty(query: &str) -> Self {
        Self {
            query: query.to_string(),
            relevant_chunks: Vec::new(),
            total_tokens: 0,
            sources: Vec::new(),
            confidence: 0.0,
            retrieval_method: "semantic".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// A grounded answer produced from a [`RagContext`].
#[derive(Debug, Clone, Serialize)]
pub struct RagResponse {
    pub answer: String,
    pub sources: Vec<SourceReference>,
    pub confidence: f32,
    pub context: RagContext,
    pub token_usage: TokenUsage,
    pub cost: f64,
    pub model: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseStatistics {
    /// `total_chunk_characters / total_chunks`, or `0` without chunks.
    pub average_chunk_size: f64,
    pub total_characters: usize,
    pub transcription_count: usize,
    pub document_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseMetadata {
    pub content_types: BTreeSet<ContentType>,
    pub languages: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    pub statistics: KnowledgeBaseStatistics,
}

/// Durable, project-scoped aggregate of everything indexed for a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub id: String,
    pub project_id: String,
    pub total_documents: usize,
    pub total_chunks: usize,
    pub total_tokens: usize,
    pub metadata: KnowledgeBaseMetadata,
    /// Index ids of every entry contributing to the aggregate.
    pub index_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub version: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> ContentMetadata {
        let mut m = ContentMetadata::new(ContentType::Transcription, "proj-1");
        m.language = "en".to_string();
        m.tags.insert("meeting".to_string());
        m
    }

    #[test]
    fn test_title_falls_back_to_untitled() {
        let mut m = meta();
        assert_eq!(m.title(), "Untitled");
        m.source_info.title = Some("   ".to_string());
        assert_eq!(m.title(), "Untitled");
        m.source_info.title = Some("Weekly sync".to_string());
        assert_eq!(m.title(), "Weekly sync");
    }

    #[test]
    fn test_empty_filters_match_everything() {
        assert!(SearchFilters::default().matches(&meta()));
    }

    #[test]
    fn test_filters_project_and_type() {
        let m = meta();
        assert!(SearchFilters::for_project("proj-1").matches(&m));
        assert!(!SearchFilters::for_project("proj-2").matches(&m));

        let filters = SearchFilters {
            content_types: vec![ContentType::Document],
            ..Default::default()
        };
        assert!(!filters.matches(&m));
    }

    #[test]
    fn test_filters_tags_any_and_language() {
        let m = meta();
        let filters = SearchFilters {
            tags: vec!["other".to_string(), "meeting".to_string()],
            languages: vec!["en".to_string()],
            ..Default::default()
        };
        assert!(filters.matches(&m));

        let filters = SearchFilters {
            languages: vec!["ja".to_string()],
            ..Default::default()
        };
        assert!(!filters.matches(&m));
    }

    #[test]
    fn test_filters_date_range() {
        let m = meta();
        let range = DateRange {
            start: m.timestamp - chrono::Duration::hours(1),
            end: m.timestamp + chrono::Duration::hours(1),
        };
        let filters = SearchFilters {
            date_range: Some(range),
            ..Default::default()
        };
        assert!(filters.matches(&m));

        let filters = SearchFilters {
            date_range: Some(DateRange {
                start: m.timestamp + chrono::Duration::hours(1),
                end: m.timestamp + chrono::Duration::hours(2),
            }),
            ..Default::default()
        };
        assert!(!filters.matches(&m));
    }
}
