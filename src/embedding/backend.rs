//! Embedding backends.
//!
//! - **[`HashedBackend`]**: deterministic feature hashing, no model, no
//!   network. Used offline and in tests.
//! - **[`FastEmbedBackend`]**: in-process ONNX models via fastembed
//!   (feature `local-embeddings`).
//! - **[`OpenAiBackend`]**: `POST /v1/embeddings`, one call per batch,
//!   bearer credential from the [`CredentialStore`].
//! - **[`OllamaBackend`]**: `POST /api/embed` on an Ollama server.
//!
//! Backends never retry. Transport failures and non-2xx responses come back
//! as [`RagError::Backend`] carrying the HTTP status so callers can decide.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::EmbeddingModel;
use crate::credentials::{require_credential, CredentialStore};
use crate::error::{RagError, RagResult};
use crate::tokens::is_japanese;

#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Embed `texts` with `model`. The result has one vector per input, in
    /// input order.
    async fn embed(&self, model: &EmbeddingModel, texts: &[String]) -> RagResult<Vec<Vec<f32>>>;
}

// ============ Hashed ============

/// Bag-of-tokens feature hashing into `model.dims` buckets, L2-normalized.
///
/// Latin text is split into lowercase alphanumeric words; Japanese runs are
/// split into single characters since they carry no word separators.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashedBackend;

impl HashedBackend {
    pub fn embed_one(text: &str, dims: usize) -> Vec<f32> {
        let dims = dims.max(1);
        let mut vector = vec![0.0f32; dims];

        for token in hash_tokens(text) {
            vector[bucket(&token, dims)] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingBackend for HashedBackend {
    fn name(&self) -> &str {
        "hashed"
    }

    async fn embed(&self, model: &EmbeddingModel, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| Self::embed_one(text, model.dims))
            .collect())
    }
}

fn hash_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        if word.chars().any(is_japanese) {
            tokens.extend(word.chars().map(|c| c.to_string()));
        } else {
            tokens.push(word.to_lowercase());
        }
    }
    tokens
}

fn bucket(token: &str, dims: usize) -> usize {
    let digest = Sha256::digest(token.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_le_bytes(head) % dims as u64) as usize
}

// ============ OpenAI ============

pub const OPENAI_PROVIDER_ID: &str = "openai";
const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";

/// OpenAI-compatible embeddings endpoint.
pub struct OpenAiBackend {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialStore>,
}

impl OpenAiBackend {
    pub fn new(
        base_url: Option<&str>,
        timeout: Duration,
        credentials: Arc<dyn CredentialStore>,
    ) -> RagResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or(OPENAI_DEFAULT_URL)
                .trim_end_matches('/')
                .to_string(),
            credentials,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiBackend {
    fn name(&self) -> &str {
        OPENAI_PROVIDER_ID
    }

    async fn embed(&self, model: &EmbeddingModel, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let api_key = require_credential(self.credentials.as_ref(), OPENAI_PROVIDER_ID).await?;

        let body = serde_json::json!({
            "model": model.id,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await?;

        let json = read_json(response, "OpenAI").await?;
        parse_openai_response(&json, texts.len())
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value, expected: usize) -> RagResult<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RagError::backend("invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| RagError::backend("invalid OpenAI response: missing embedding"))?;
        indexed.push((index, json_to_vec(embedding)?));
    }
    indexed.sort_by_key(|(index, _)| *index);

    let vectors: Vec<Vec<f32>> = indexed.into_iter().map(|(_, v)| v).collect();
    check_count(vectors, expected)
}

// ============ Ollama ============

const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

pub struct OllamaBackend {
    client: reqwest::Client,
    url: String,
}

impl OllamaBackend {
    pub fn new(url: Option<&str>, timeout: Duration) -> RagResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url
                .unwrap_or(OLLAMA_DEFAULT_URL)
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn embed(&self, model: &EmbeddingModel, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": model.id,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::Backend {
                message: format!("Ollama connection error (is Ollama running at {}?): {e}", self.url),
                status: e.status().map(|s| s.as_u16()),
            })?;

        let json = read_json(response, "Ollama").await?;
        let embeddings = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| RagError::backend("invalid Ollama response: missing embeddings array"))?;

        let vectors = embeddings
            .iter()
            .map(json_to_vec)
            .collect::<RagResult<Vec<_>>>()?;
        check_count(vectors, texts.len())
    }
}

// ============ fastembed ============

/// In-process embedding via fastembed. The model is downloaded and loaded
/// on first use, then kept for the lifetime of the backend.
#[cfg(feature = "local-embeddings")]
pub struct FastEmbedBackend {
    model: fastembed::EmbeddingModel,
    batch_size: usize,
    loaded: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings")]
impl FastEmbedBackend {
    pub fn new(model_name: &str, batch_size: usize) -> RagResult<Self> {
        Ok(Self {
            model: fastembed_model(model_name)?,
            batch_size,
            loaded: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl EmbeddingBackend for FastEmbedBackend {
    fn name(&self) -> &str {
        "fastembed"
    }

    async fn embed(&self, _model: &EmbeddingModel, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let loaded = Arc::clone(&self.loaded);
        let model = self.model.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = loaded
                .lock()
                .map_err(|_| RagError::backend("local embedding model lock poisoned"))?;
            if guard.is_none() {
                let options = fastembed::InitOptions::new(model).with_show_download_progress(false);
                let instance = fastembed::TextEmbedding::try_new(options).map_err(|e| {
                    RagError::backend(format!("failed to initialize local embedding model: {e}"))
                })?;
                *guard = Some(instance);
            }
            let instance = guard
                .as_mut()
                .ok_or_else(|| RagError::backend("local embedding model not loaded"))?;
            instance
                .embed(texts, Some(batch_size))
                .map_err(|e| RagError::backend(format!("local embedding failed: {e}")))
        })
        .await
        .map_err(|e| RagError::backend(format!("local embedding task failed: {e}")))?
    }
}

#[cfg(feature = "local-embeddings")]
fn fastembed_model(name: &str) -> RagResult<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => Err(RagError::UnsupportedModel(format!(
            "local model '{other}'; supported: all-minilm-l6-v2, bge-small-en-v1.5, \
             bge-base-en-v1.5, multilingual-e5-small, multilingual-e5-base, multilingual-e5-large"
        ))),
    }
}

/// Default dimensionality of the local models fastembed can load.
pub fn local_model_dims(name: &str) -> Option<usize> {
    match name {
        "all-minilm-l6-v2" | "bge-small-en-v1.5" | "multilingual-e5-small" => Some(384),
        "bge-base-en-v1.5" | "multilingual-e5-base" => Some(768),
        "multilingual-e5-large" => Some(1024),
        _ => None,
    }
}

// ============ shared HTTP helpers ============

/// JSON body of a successful response; any non-2xx status becomes
/// [`RagError::Backend`] carrying that status and the response body.
pub(crate) async fn read_json(response: reqwest::Response, api: &str) -> RagResult<serde_json::Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RagError::Backend {
            message: format!("{api} API error {status}: {body}"),
            status: Some(status.as_u16()),
        });
    }
    Ok(response.json().await?)
}

fn json_to_vec(value: &serde_json::Value) -> RagResult<Vec<f32>> {
    let values = value
        .as_array()
        .ok_or_else(|| RagError::backend("invalid response: embedding is not an array"))?;
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| RagError::backend("invalid response: non-numeric embedding value"))
        })
        .collect()
}

fn check_count(vectors: Vec<Vec<f32>>, expected: usize) -> RagResult<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        return Err(RagError::backend(format!(
            "backend returned {} embeddings for {} inputs",
            vectors.len(),
            expected
        )));
    }
    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentialStore;
    use crate::embedding::cosine_similarity;

    fn hashed_model() -> EmbeddingModel {
        EmbeddingModel::hashed(64)
    }

    #[tokio::test]
    async fn test_hashed_is_deterministic_and_normalized() {
        let texts = vec!["quarterly budget review".to_string()];
        let a = HashedBackend.embed(&hashed_model(), &texts).await.unwrap();
        let b = HashedBackend.embed(&hashed_model(), &texts).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
        let norm: f32 = a[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hashed_similarity_tracks_shared_words() {
        let a = HashedBackend::embed_one("budget review meeting", 256);
        let b = HashedBackend::embed_one("budget review", 256);
        let c = HashedBackend::embed_one("holiday photos", 256);
        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }

    #[test]
    fn test_hashed_splits_japanese_by_character() {
        assert_eq!(hash_tokens("会議 Notes"), vec!["会", "議", "notes"]);
        assert!(HashedBackend::embed_one("", 8).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_parse_openai_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vectors = parse_openai_response(&json, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_openai_count_mismatch() {
        let json = serde_json::json!({"data": [{"index": 0, "embedding": [1.0]}]});
        assert!(matches!(
            parse_openai_response(&json, 2),
            Err(RagError::Backend { .. })
        ));
    }

    #[tokio::test]
    async fn test_openai_without_credential() {
        let backend = OpenAiBackend::new(
            Some("http://127.0.0.1:9"),
            Duration::from_secs(1),
            Arc::new(StaticCredentialStore::new()),
        )
        .unwrap();
        let model = EmbeddingModel::remote("text-embedding-3-small", 1536, "openai");
        let err = backend
            .embed(&model, &["hello".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::NoCredential(p) if p == "openai"));
    }

    #[test]
    fn test_local_model_dims() {
        assert_eq!(local_model_dims("multilingual-e5-base"), Some(768));
        assert_eq!(local_model_dims("nope"), None);
    }

    #[tokio::test]
    async fn test_openai_error_status_is_backend_error() {
        let url = http_fixture::respond_once(500, "upstream exploded").await;
        let backend = OpenAiBackend::new(
            Some(&url),
            Duration::from_secs(5),
            Arc::new(StaticCredentialStore::with("openai", "sk-test")),
        )
        .unwrap();
        let model = EmbeddingModel::remote("text-embedding-3-small", 2, "openai");

        let err = backend
            .embed(&model, &["hello".to_string()])
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        match err {
            RagError::Backend { message, status } => {
                assert_eq!(status, Some(500));
                assert!(message.contains("upstream exploded"));
            }
            other => panic!("expected backend error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ollama_client_error_is_not_retryable() {
        let url = http_fixture::respond_once(404, "model not found").await;
        let backend = OllamaBackend::new(Some(&url), Duration::from_secs(5)).unwrap();
        let model = EmbeddingModel::remote("nomic-embed-text", 2, "ollama");

        let err = backend
            .embed(&model, &["hello".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Backend { status: Some(404), .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_ollama_success_parses_embeddings() {
        let url = http_fixture::respond_once(200, r#"{"embeddings":[[0.5,1.0]]}"#).await;
        let backend = OllamaBackend::new(Some(&url), Duration::from_secs(5)).unwrap();
        let model = EmbeddingModel::remote("nomic-embed-text", 2, "ollama");

        let vectors = backend.embed(&model, &["hello".to_string()]).await.unwrap();
        assert_eq!(vectors, vec![vec![0.5, 1.0]]);
    }
}

/// One-shot HTTP server for exercising the API clients.
#[cfg(test)]
pub(crate) mod http_fixture {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve a single request with `status` and `body`, then close. Returns
    /// the base URL.
    pub(crate) async fn respond_once(status: u16, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            while !request_complete(&request) {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status} Status\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}")
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(head_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..head_end]
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        request.len() >= head_end + 4 + length
    }
}
