//! Command implementations behind the `memo` binary.
//!
//! Each `run_*` function loads what it needs from the [`Config`], does one
//! thing, and prints plain text.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use sqlx::SqlitePool;

use crate::answer::AnswerSynthesizer;
use crate::chunk::TextChunker;
use crate::config::Config;
use crate::credentials::EnvCredentialStore;
use crate::db;
use crate::embedding::create_service;
use crate::llm::OpenAiChatModel;
use crate::migrate;
use crate::models::{ContentMetadata, ContentType, SearchFilters, SearchOptions};
use crate::rag::RagEngine;
use crate::sources::FsSourceRepository;
use crate::store::SqliteStore;

async fn open_pool(config: &Config) -> Result<SqlitePool> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;
    Ok(pool)
}

/// Engine over the configured SQLite database, embedding provider, and
/// source folders.
pub async fn open_engine(config: &Config) -> Result<RagEngine> {
    if !config.embedding.is_enabled() {
        bail!("This command requires embeddings. Set [embedding] provider in config.");
    }
    let pool = open_pool(config).await?;
    let store = Arc::new(SqliteStore::new(pool));
    let embeddings = create_service(&config.embedding, Arc::new(EnvCredentialStore))?;
    let chunker = TextChunker::new(config.chunking.max_size, config.chunking.overlap)?;

    Ok(RagEngine::new(Arc::new(embeddings), store.clone(), store, chunker)
        .with_sources(Arc::new(FsSourceRepository::new(&config.sources.root))))
}

pub async fn run_init(config: &Config) -> Result<()> {
    let pool = open_pool(config).await?;
    pool.close().await;
    println!("Database initialized at {}.", config.db.path.display());
    Ok(())
}

pub async fn run_index(
    config: &Config,
    path: &Path,
    project: &str,
    content_type: &str,
    tags: Vec<String>,
) -> Result<()> {
    let content_type = match content_type {
        "document" => ContentType::Document,
        "transcription" => ContentType::Transcription,
        other => bail!("Unknown content type: {other}. Use document or transcription."),
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let mut metadata = ContentMetadata::new(content_type, project);
    metadata.tags = tags.into_iter().collect();
    metadata.source_info.title = path.file_stem().map(|s| s.to_string_lossy().to_string());
    metadata.source_info.origin = Some(format!("file://{}", path.display()));

    let engine = open_engine(config).await?;
    let index_id = engine.index_content(&text, metadata).await?;
    println!("Indexed {} as {}.", path.display(), index_id);
    Ok(())
}

pub async fn run_remove(config: &Config, index_id: &str) -> Result<()> {
    let engine = open_engine(config).await?;
    engine.remove_index(index_id).await?;
    println!("Removed {index_id}.");
    Ok(())
}

pub async fn run_search(
    config: &Config,
    query: &str,
    project: Option<String>,
    limit: Option<usize>,
    suggest: bool,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let engine = open_engine(config).await?;
    let filters = SearchFilters {
        project_id: project,
        ..Default::default()
    };
    let options = SearchOptions {
        top_k: limit.unwrap_or(config.retrieval.top_k),
        threshold: config.retrieval.threshold,
        include_chunks: false,
        reranking: true,
        suggestions: suggest,
    };
    let response = engine.semantic_search(query, &filters, &options).await?;

    if response.results.is_empty() {
        println!("No results.");
    }
    for (i, result) in response.results.iter().enumerate() {
        println!(
            "{}. [{:.2}] {}",
            i + 1,
            result.score,
            result.metadata.title()
        );
        println!("    project: {}", result.metadata.project_id);
        println!("    type: {}", result.metadata.content_type.as_str());
        println!("    snippet: {}", snippet(&result.content, 160));
        println!("    id: {}", result.index_id);
        println!();
    }
    if !response.suggestions.is_empty() {
        println!("Related: {}", response.suggestions.join(", "));
    }
    println!(
        "{} result(s) in {:.1} ms",
        response.total_results, response.search_time_ms
    );
    Ok(())
}

pub async fn run_context(
    config: &Config,
    query: &str,
    project: Option<&str>,
    max_tokens: Option<usize>,
) -> Result<()> {
    let engine = open_engine(config).await?;
    let max_tokens = max_tokens.unwrap_or(config.retrieval.max_context_tokens);
    let context = engine.get_relevant_context(query, project, max_tokens).await?;

    if context.relevant_chunks.is_empty() {
        println!("No relevant context.");
        return Ok(());
    }
    for chunk in &context.relevant_chunks {
        println!(
            "--- chunk {}/{} ---",
            chunk.metadata.chunk_number, chunk.metadata.total_chunks
        );
        println!("{}", chunk.text);
    }
    println!();
    println!("tokens:     {} / {}", context.total_tokens, max_tokens);
    println!("confidence: {:.2}", context.confidence);
    println!("sources:");
    for source in &context.sources {
        println!("  [{:.2}] {} ({})", source.score, source.title, source.index_id);
    }
    Ok(())
}

pub async fn run_ask(
    config: &Config,
    question: &str,
    project: Option<&str>,
    max_tokens: Option<usize>,
) -> Result<()> {
    if config.llm.provider != "openai" {
        bail!("ask requires a language model. Set [llm] provider = \"openai\" in config.");
    }
    let engine = open_engine(config).await?;
    let llm = OpenAiChatModel::new(
        config.llm.url.as_deref(),
        Duration::from_secs(config.llm.timeout_secs),
        Arc::new(EnvCredentialStore),
    )?;
    let synthesizer = AnswerSynthesizer::new(Arc::new(llm), config.llm.model.clone());

    let max_tokens = max_tokens.unwrap_or(config.retrieval.max_context_tokens);
    let response = synthesizer
        .ask(&engine, question, project, max_tokens)
        .await?;

    println!("{}", response.answer);
    println!();
    println!("confidence: {:.2}", response.confidence);
    println!(
        "tokens:     {} prompt + {} completion",
        response.token_usage.prompt_tokens, response.token_usage.completion_tokens
    );
    println!("cost:       ${:.4}", response.cost);
    for source in &response.sources {
        println!("  [{:.2}] {}", source.score, source.title);
    }
    Ok(())
}

pub async fn run_kb_build(
    config: &Config,
    project: &str,
    transcriptions: bool,
    documents: bool,
) -> Result<()> {
    let engine = open_engine(config).await?;
    let kb = engine
        .build_knowledge_base(project, transcriptions, documents)
        .await?;
    println!(
        "Built knowledge base for {}: {} entries, {} chunks, ~{} tokens.",
        project, kb.total_documents, kb.total_chunks, kb.total_tokens
    );
    Ok(())
}

pub async fn run_kb_update(config: &Config, project: &str, changed: &[String]) -> Result<()> {
    let engine = open_engine(config).await?;
    let kb = engine.update_knowledge_base(project, changed).await?;
    println!(
        "Updated knowledge base for {} to version {}: {} entries, {} chunks.",
        project, kb.version, kb.total_documents, kb.total_chunks
    );
    Ok(())
}

pub async fn run_stats(config: &Config, project: &str) -> Result<()> {
    let pool = open_pool(config).await?;
    let store = SqliteStore::new(pool);
    let Some(kb) = crate::store::ContentStore::get_knowledge_base(&store, project).await? else {
        println!("No knowledge base for {project}. Run `memo kb build {project}` first.");
        return Ok(());
    };

    let stats = &kb.metadata.statistics;
    println!("--- Knowledge base ---");
    println!("project:        {}", kb.project_id);
    println!("version:        {}", kb.version);
    println!("created_at:     {}", kb.created_at);
    println!("last_updated:   {}", kb.last_updated);
    println!("entries:        {}", kb.total_documents);
    println!("  transcripts:  {}", stats.transcription_count);
    println!("  documents:    {}", stats.document_count);
    println!("chunks:         {}", kb.total_chunks);
    println!("tokens (est.):  {}", kb.total_tokens);
    println!("characters:     {}", stats.total_characters);
    println!("avg chunk size: {:.1}", stats.average_chunk_size);
    if !kb.metadata.tags.is_empty() {
        let tags: Vec<&str> = kb.metadata.tags.iter().map(String::as_str).collect();
        println!("tags:           {}", tags.join(", "));
    }
    Ok(())
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{cut}…")
}
