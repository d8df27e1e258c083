//! Embedding service: preprocessing, caching, and backend dispatch.
//!
//! [`EmbeddingService`] is the single entry point the retrieval engine uses
//! to turn text into vectors. For every text it:
//!
//! 1. applies [`preprocess`](preprocess::preprocess) (the same
//!    normalization feeds the cache key and the backend),
//! 2. probes the [`EmbeddingCache`] under `(model id, preprocessed text)`,
//! 3. on a miss, dispatches to the local or remote backend according to
//!    [`EmbeddingModel::is_local`],
//! 4. stores the new vector in the cache with the configured TTL.
//!
//! Remote backends receive the misses of a batch as one request per
//! `batch_size` texts. Local backends are called once per text with at
//! most `max_parallel` calls in flight; the output order always matches
//! the input order.
//!
//! Also provides vector utilities shared by the stores:
//! - [`cosine_similarity`]
//! - [`vec_to_blob`] / [`blob_to_vec`]: little-endian `f32` BLOB encoding
//!
//! # Provider selection
//!
//! ```rust
//! # use std::sync::Arc;
//! # use memo_rag::config::EmbeddingConfig;
//! # use memo_rag::credentials::EnvCredentialStore;
//! # use memo_rag::embedding::create_service;
//! let config = EmbeddingConfig {
//!     provider: "hashed".to_string(),
//!     dims: Some(128),
//!     ..Default::default()
//! };
//! let service = create_service(&config, Arc::new(EnvCredentialStore)).unwrap();
//! assert_eq!(service.model().dims, 128);
//! assert!(service.model().is_local);
//! ```

pub mod backend;
pub mod cache;
pub mod preprocess;
pub mod stats;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::config::EmbeddingConfig;
use crate::credentials::CredentialStore;
use crate::error::{RagError, RagResult};

pub use backend::EmbeddingBackend;
pub use cache::{CacheStats, EmbeddingCache};
pub use preprocess::PreprocessingOptions;
pub use stats::ProcessingStats;

/// Metadata of the model vectors are produced with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbeddingModel {
    /// Model identifier sent to the backend and mixed into cache keys.
    pub id: String,
    pub dims: usize,
    /// Runs in-process (bounded parallel single calls) rather than behind
    /// an HTTP API (batched calls).
    pub is_local: bool,
    pub provider: String,
}

impl EmbeddingModel {
    pub fn local(id: impl Into<String>, dims: usize, provider: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            dims,
            is_local: true,
            provider: provider.into(),
        }
    }

    pub fn remote(id: impl Into<String>, dims: usize, provider: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            dims,
            is_local: false,
            provider: provider.into(),
        }
    }

    pub fn hashed(dims: usize) -> Self {
        Self::local(format!("hashed-{dims}"), dims, "hashed")
    }
}

pub struct EmbeddingService {
    model: EmbeddingModel,
    local: Option<Arc<dyn EmbeddingBackend>>,
    remote: Option<Arc<dyn EmbeddingBackend>>,
    cache: Arc<EmbeddingCache>,
    preprocess: PreprocessingOptions,
    ttl: Duration,
    batch_size: usize,
    max_parallel: usize,
    stats: Mutex<ProcessingStats>,
}

impl EmbeddingService {
    /// A service for `model` sharing `cache`, with no backends attached yet.
    pub fn new(model: EmbeddingModel, cache: Arc<EmbeddingCache>) -> Self {
        Self {
            model,
            local: None,
            remote: None,
            cache,
            preprocess: PreprocessingOptions::default(),
            ttl: Duration::from_secs(3600),
            batch_size: 64,
            max_parallel: 4,
            stats: Mutex::new(ProcessingStats::default()),
        }
    }

    pub fn with_local_backend(mut self, backend: Arc<dyn EmbeddingBackend>) -> Self {
        self.local = Some(backend);
        self
    }

    pub fn with_remote_backend(mut self, backend: Arc<dyn EmbeddingBackend>) -> Self {
        self.remote = Some(backend);
        self
    }

    pub fn with_preprocessing(mut self, options: PreprocessingOptions) -> Self {
        self.preprocess = options;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn model(&self) -> &EmbeddingModel {
        &self.model
    }

    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    pub fn stats(&self) -> ProcessingStats {
        self.stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Embed a single text.
    pub async fn embed(&self, text: &str) -> RagResult<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::backend("empty embedding response"))
    }

    /// Embed `texts`, serving what it can from the cache.
    #[instrument(skip_all, fields(model = %self.model.id, count = texts.len()))]
    pub async fn embed_batch(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let started = Instant::now();
        let prepared: Vec<String> = texts
            .iter()
            .map(|t| preprocess::preprocess(t, &self.preprocess))
            .collect();

        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; prepared.len()];
        // (position, slot in `unique`) per miss; equal texts share a slot.
        let mut misses = Vec::new();
        let mut unique: Vec<String> = Vec::new();
        let mut slots: HashMap<&str, usize> = HashMap::new();
        for (i, text) in prepared.iter().enumerate() {
            if let Some(v) = self.cache.get(text, &self.model.id).await {
                vectors[i] = Some(v);
                continue;
            }
            let slot = *slots.entry(text.as_str()).or_insert_with(|| {
                unique.push(text.clone());
                unique.len() - 1
            });
            misses.push((i, slot));
        }
        let cache_hits: Vec<bool> = vectors.iter().map(Option::is_some).collect();

        let mut backend_calls = 0u64;
        if !misses.is_empty() {
            let (fresh, calls) = self.call_backend(&unique).await?;
            backend_calls = calls;

            for (text, vector) in unique.iter().zip(&fresh) {
                if self.model.dims > 0 && vector.len() != self.model.dims {
                    return Err(RagError::backend(format!(
                        "model {} returned {} dimensions, expected {}",
                        self.model.id,
                        vector.len(),
                        self.model.dims
                    )));
                }
                self.cache
                    .set(text, &self.model.id, vector.clone(), self.ttl)
                    .await;
            }
            for &(i, slot) in &misses {
                vectors[i] = fresh.get(slot).cloned();
            }
        }

        let per_text_ms = started.elapsed().as_secs_f64() * 1000.0 / prepared.len() as f64;
        if let Ok(mut stats) = self.stats.lock() {
            stats.backend_calls += backend_calls;
            for hit in &cache_hits {
                stats.record(per_text_ms, *hit);
            }
        }
        debug!(
            hits = prepared.len() - misses.len(),
            misses = misses.len(),
            backend_calls,
            "embedded batch"
        );

        vectors
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| RagError::backend("missing embedding for batch item"))
    }

    fn backend(&self) -> RagResult<&Arc<dyn EmbeddingBackend>> {
        let slot = if self.model.is_local {
            &self.local
        } else {
            &self.remote
        };
        slot.as_ref().ok_or_else(|| {
            RagError::UnsupportedModel(format!(
                "{} ({} backend for provider '{}' is not configured)",
                self.model.id,
                if self.model.is_local { "local" } else { "remote" },
                self.model.provider
            ))
        })
    }

    /// Returns the vectors for `texts` in order, plus the number of backend
    /// calls made.
    async fn call_backend(&self, texts: &[String]) -> RagResult<(Vec<Vec<f32>>, u64)> {
        let backend = self.backend()?;
        let model = &self.model;

        if model.is_local {
            let vectors: Vec<Vec<f32>> = stream::iter(texts.iter())
                .map(|text| async move {
                    backend
                        .embed(model, std::slice::from_ref(text))
                        .await?
                        .into_iter()
                        .next()
                        .ok_or_else(|| RagError::backend("local backend returned no embedding"))
                })
                .buffered(self.max_parallel)
                .try_collect()
                .await?;
            Ok((vectors, texts.len() as u64))
        } else {
            let mut vectors = Vec::with_capacity(texts.len());
            let mut calls = 0;
            for batch in texts.chunks(self.batch_size) {
                let embedded = backend.embed(model, batch).await?;
                calls += 1;
                if embedded.len() != batch.len() {
                    return Err(RagError::backend(format!(
                        "backend returned {} embeddings for {} inputs",
                        embedded.len(),
                        batch.len()
                    )));
                }
                vectors.extend(embedded);
            }
            Ok((vectors, calls))
        }
    }
}

/// Build the service described by `[embedding]`.
///
/// | `provider` | backend | locality |
/// |------------|---------|----------|
/// | `hashed` | [`backend::HashedBackend`] | local |
/// | `local` | [`backend::FastEmbedBackend`] (feature `local-embeddings`) | local |
/// | `openai` | [`backend::OpenAiBackend`] | remote |
/// | `ollama` | [`backend::OllamaBackend`] | remote |
pub fn create_service(
    config: &EmbeddingConfig,
    credentials: Arc<dyn CredentialStore>,
) -> RagResult<EmbeddingService> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let cache = Arc::new(EmbeddingCache::new(config.cache_max_entries));

    let service = match config.provider.as_str() {
        "disabled" => {
            return Err(RagError::Config(
                "embedding provider is disabled; set [embedding] provider".into(),
            ))
        }
        "hashed" => {
            let dims = config.dims.unwrap_or(256);
            let model = match &config.model {
                Some(id) => EmbeddingModel::local(id.clone(), dims, "hashed"),
                None => EmbeddingModel::hashed(dims),
            };
            EmbeddingService::new(model, cache)
                .with_local_backend(Arc::new(backend::HashedBackend))
        }
        "local" => local_service(config, cache)?,
        "openai" => {
            let model = EmbeddingModel::remote(required_model(config)?, config.dims.unwrap_or(0), "openai");
            let backend = backend::OpenAiBackend::new(config.url.as_deref(), timeout, credentials)?;
            EmbeddingService::new(model, cache).with_remote_backend(Arc::new(backend))
        }
        "ollama" => {
            let model = EmbeddingModel::remote(required_model(config)?, config.dims.unwrap_or(0), "ollama");
            let backend = backend::OllamaBackend::new(config.url.as_deref(), timeout)?;
            EmbeddingService::new(model, cache).with_remote_backend(Arc::new(backend))
        }
        other => return Err(RagError::UnsupportedModel(format!("provider '{other}'"))),
    };

    Ok(service
        .with_preprocessing(config.preprocess.clone())
        .with_ttl(Duration::from_secs(config.cache_ttl_secs))
        .with_batch_size(config.batch_size)
        .with_max_parallel(config.max_parallel))
}

fn required_model(config: &EmbeddingConfig) -> RagResult<String> {
    config.model.clone().ok_or_else(|| {
        RagError::Config(format!(
            "embedding.model required for provider '{}'",
            config.provider
        ))
    })
}

#[cfg(feature = "local-embeddings")]
fn local_service(config: &EmbeddingConfig, cache: Arc<EmbeddingCache>) -> RagResult<EmbeddingService> {
    let id = config
        .model
        .clone()
        .unwrap_or_else(|| "multilingual-e5-small".to_string());
    let dims = config
        .dims
        .or_else(|| backend::local_model_dims(&id))
        .ok_or_else(|| RagError::UnsupportedModel(format!("local model '{id}'")))?;
    let backend = backend::FastEmbedBackend::new(&id, config.batch_size)?;
    Ok(EmbeddingService::new(EmbeddingModel::local(id, dims, "fastembed"), cache)
        .with_local_backend(Arc::new(backend)))
}

#[cfg(not(feature = "local-embeddings"))]
fn local_service(_config: &EmbeddingConfig, _cache: Arc<EmbeddingCache>) -> RagResult<EmbeddingService> {
    Err(RagError::UnsupportedModel(
        "local embeddings require --features local-embeddings".into(),
    ))
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use memo_rag::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty vectors, vectors of
/// different lengths, or a zero vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls and returns `[len, 1.0]` per text.
    struct CountingBackend {
        calls: AtomicUsize,
    }

    impl CountingBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl EmbeddingBackend for CountingBackend {
        fn name(&self) -> &str {
            "counting"
        }

        async fn embed(&self, _model: &EmbeddingModel, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| vec![t.chars().count() as f32, 1.0])
                .collect())
        }
    }

    fn service(model: EmbeddingModel, backend: Arc<CountingBackend>) -> EmbeddingService {
        let cache = Arc::new(EmbeddingCache::new(100));
        if model.is_local {
            EmbeddingService::new(model, cache).with_local_backend(backend)
        } else {
            EmbeddingService::new(model, cache).with_remote_backend(backend)
        }
    }

    #[tokio::test]
    async fn test_second_call_served_from_cache() {
        let backend = CountingBackend::new();
        let svc = service(EmbeddingModel::remote("M", 2, "test"), backend.clone());

        let first = svc.embed("hello").await.unwrap();
        let second = svc.embed("hello").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        let cache_stats = svc.cache().stats().await;
        assert_eq!(cache_stats.lookups, 2);
        assert_eq!(cache_stats.hits, 1);
        let stats = svc.stats();
        assert_eq!(stats.total_processed, 2);
        assert!((stats.cache_hit_rate - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_preprocessing_shared_by_key_and_backend() {
        let backend = CountingBackend::new();
        let svc = service(EmbeddingModel::remote("M", 2, "test"), backend.clone());

        let a = svc.embed("  hello   world ").await.unwrap();
        let b = svc.embed("hello world").await.unwrap();
        assert_eq!(a, vec![11.0, 1.0]);
        assert_eq!(a, b);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remote_batch_is_one_call_per_batch() {
        let backend = CountingBackend::new();
        let svc = service(EmbeddingModel::remote("M", 2, "test"), backend.clone()).with_batch_size(3);
        let texts: Vec<String> = (1..=7).map(|n| "x".repeat(n)).collect();

        let vectors = svc.embed_batch(&texts).await.unwrap();

        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        let lens: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
        assert_eq!(lens, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    }

    #[tokio::test]
    async fn test_local_batch_preserves_order() {
        let backend = CountingBackend::new();
        let svc = service(EmbeddingModel::local("L", 2, "test"), backend.clone()).with_max_parallel(2);
        let texts: Vec<String> = (1..=5).map(|n| "y".repeat(n)).collect();

        let vectors = svc.embed_batch(&texts).await.unwrap();

        assert_eq!(backend.calls.load(Ordering::SeqCst), 5);
        let lens: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
        assert_eq!(lens, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[tokio::test]
    async fn test_only_misses_reach_backend() {
        let backend = CountingBackend::new();
        let svc = service(EmbeddingModel::remote("M", 2, "test"), backend.clone());
        svc.embed("aa").await.unwrap();

        let vectors = svc
            .embed_batch(&["aa".to_string(), "bbb".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![2.0, 1.0], vec![3.0, 1.0]]);
        assert_eq!(svc.stats().backend_calls, 2);
    }

    #[tokio::test]
    async fn test_duplicate_misses_embedded_once() {
        let backend = CountingBackend::new();
        let svc = service(EmbeddingModel::local("L", 2, "test"), backend.clone());
        let texts = vec!["aa".to_string(), " aa ".to_string(), "bbb".to_string(), "aa".to_string()];

        let vectors = svc.embed_batch(&texts).await.unwrap();

        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert_eq!(svc.stats().backend_calls, 2);
        assert_eq!(
            vectors,
            vec![vec![2.0, 1.0], vec![2.0, 1.0], vec![3.0, 1.0], vec![2.0, 1.0]]
        );
    }

    #[tokio::test]
    async fn test_missing_backend_is_unsupported() {
        let svc = EmbeddingService::new(
            EmbeddingModel::remote("M", 2, "test"),
            Arc::new(EmbeddingCache::new(10)),
        )
        .with_local_backend(CountingBackend::new());
        assert!(matches!(
            svc.embed("hello").await,
            Err(RagError::UnsupportedModel(_))
        ));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_backend_error() {
        let backend = CountingBackend::new();
        let svc = service(EmbeddingModel::remote("M", 3, "test"), backend);
        assert!(matches!(
            svc.embed("hello").await,
            Err(RagError::Backend { .. })
        ));
    }

    #[test]
    fn test_create_service_providers() {
        let creds: Arc<dyn CredentialStore> = Arc::new(crate::credentials::StaticCredentialStore::new());

        let disabled = EmbeddingConfig::default();
        assert!(matches!(
            create_service(&disabled, creds.clone()),
            Err(RagError::Config(_))
        ));

        let unknown = EmbeddingConfig {
            provider: "carrier-pigeon".into(),
            ..Default::default()
        };
        assert!(matches!(
            create_service(&unknown, creds.clone()),
            Err(RagError::UnsupportedModel(_))
        ));

        let openai = EmbeddingConfig {
            provider: "openai".into(),
            model: Some("text-embedding-3-small".into()),
            dims: Some(1536),
            ..Default::default()
        };
        let svc = create_service(&openai, creds).unwrap();
        assert!(!svc.model().is_local);
        assert_eq!(svc.model().dims, 1536);
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
