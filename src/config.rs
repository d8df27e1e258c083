//! TOML configuration.
//!
//! Every section is optional and falls back to its `Default`. Values that
//! would make a component unusable (a chunk overlap that cannot make
//! progress, an enabled embedding provider without a model) are rejected by
//! [`Config::validate`], which [`load_config`] always runs.
//!
//! ```toml
//! [db]
//! path = "./data/memo.sqlite"
//!
//! [chunking]
//! max_size = 1000
//! overlap = 200
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [embedding.preprocess]
//! lowercase = true
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::embedding::preprocess::PreprocessingOptions;
use crate::error::{RagError, RagResult};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/memo.sqlite"),
        }
    }
}

/// Chunk window in characters.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_max_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `disabled`, `hashed`, `local`, `openai`, or `ollama`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Texts per remote API call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL override for the remote API.
    #[serde(default)]
    pub url: Option<String>,
    /// In-flight single-text calls for local models.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
    #[serde(default)]
    pub preprocess: PreprocessingOptions,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
            url: None,
            max_parallel: default_max_parallel(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_max_entries: default_cache_max_entries(),
            preprocess: PreprocessingOptions::default(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_parallel() -> usize {
    4
}
fn default_cache_ttl_secs() -> u64 {
    3600
}
fn default_cache_max_entries() -> usize {
    crate::embedding::cache::DEFAULT_MAX_ENTRIES
}

/// Defaults for ad-hoc searches and context builds from the CLI.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            threshold: default_threshold(),
            max_context_tokens: default_max_context_tokens(),
        }
    }
}

fn default_top_k() -> usize {
    20
}
fn default_threshold() -> f32 {
    0.6
}
fn default_max_context_tokens() -> usize {
    4000
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `disabled` or `openai` (any OpenAI-compatible chat endpoint).
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_llm_model(),
            url: None,
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    /// Admission limit per engine instance.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Hard cap on cached results per engine.
    #[serde(default = "default_analytics_cache_max_entries")]
    pub cache_max_entries: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_max_entries: default_analytics_cache_max_entries(),
        }
    }
}

fn default_max_concurrent() -> usize {
    3
}
fn default_analytics_cache_max_entries() -> usize {
    crate::analytics::cache::DEFAULT_MAX_RESULTS
}

/// Root of the per-project `transcriptions/` and `documents/` folders read
/// by knowledge-base builds.
#[derive(Debug, Deserialize, Clone)]
pub struct SourcesConfig {
    pub root: PathBuf,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./projects"),
        }
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> RagResult<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| RagError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RagResult<()> {
        if self.chunking.max_size == 0 {
            return Err(RagError::Config("chunking.max_size must be > 0".into()));
        }
        if self.chunking.overlap >= self.chunking.max_size {
            return Err(RagError::Config(format!(
                "chunking.overlap ({}) must be smaller than chunking.max_size ({})",
                self.chunking.overlap, self.chunking.max_size
            )));
        }

        if !(0.0..=1.0).contains(&self.retrieval.threshold) {
            return Err(RagError::Config(
                "retrieval.threshold must be in [0.0, 1.0]".into(),
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(RagError::Config("retrieval.top_k must be >= 1".into()));
        }

        let embedding = &self.embedding;
        match embedding.provider.as_str() {
            "disabled" | "hashed" | "local" => {}
            "openai" | "ollama" => {
                if embedding.model.is_none() {
                    return Err(RagError::Config(format!(
                        "embedding.model must be specified when provider is '{}'",
                        embedding.provider
                    )));
                }
                if embedding.dims.unwrap_or(0) == 0 {
                    return Err(RagError::Config(format!(
                        "embedding.dims must be > 0 when provider is '{}'",
                        embedding.provider
                    )));
                }
            }
            other => {
                return Err(RagError::Config(format!(
                    "unknown embedding provider '{other}'; expected disabled, hashed, local, openai, or ollama"
                )))
            }
        }
        if embedding.batch_size == 0 {
            return Err(RagError::Config("embedding.batch_size must be >= 1".into()));
        }

        match self.llm.provider.as_str() {
            "disabled" | "openai" => {}
            other => {
                return Err(RagError::Config(format!(
                    "unknown llm provider '{other}'; expected disabled or openai"
                )))
            }
        }

        if self.analytics.max_concurrent == 0 {
            return Err(RagError::Config(
                "analytics.max_concurrent must be >= 1".into(),
            ));
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> RagResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        RagError::Config(format!("failed to read config file {}: {e}", path.display()))
    })?;
    Config::from_toml_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.chunking.max_size, 1000);
        assert_eq!(config.chunking.overlap, 200);
        assert_eq!(config.embedding.provider, "disabled");
        assert_eq!(config.embedding.cache_ttl_secs, 3600);
        assert_eq!(config.embedding.cache_max_entries, 10_000);
        assert!(config.embedding.preprocess.normalize_whitespace);
        assert_eq!(config.retrieval.top_k, 20);
        assert_eq!(config.analytics.max_concurrent, 3);
        assert_eq!(config.analytics.cache_max_entries, 1_000);
    }

    #[test]
    fn test_overlap_rejected_at_load() {
        let err = Config::from_toml_str("[chunking]\nmax_size = 100\noverlap = 100\n").unwrap_err();
        assert!(matches!(err, RagError::Config(msg) if msg.contains("overlap")));
    }

    #[test]
    fn test_remote_provider_requires_model_and_dims() {
        let err = Config::from_toml_str("[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(matches!(err, RagError::Config(_)));

        let ok = Config::from_toml_str(
            "[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\ndims = 1536\n",
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = Config::from_toml_str("[embedding]\nprovider = \"magic\"\n").unwrap_err();
        assert!(matches!(err, RagError::Config(msg) if msg.contains("magic")));
    }

    #[test]
    fn test_preprocess_section() {
        let config = Config::from_toml_str(
            "[embedding]\nprovider = \"hashed\"\n[embedding.preprocess]\nlowercase = true\nmax_length = 50\n",
        )
        .unwrap();
        assert!(config.embedding.preprocess.lowercase);
        assert!(config.embedding.preprocess.normalize_whitespace);
        assert_eq!(config.embedding.preprocess.max_length, 50);
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_config(Path::new("/nonexistent/memo.toml")).unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }

    #[test]
    fn test_example_config_parses() {
        let config = Config::from_toml_str(include_str!("../config/memo.example.toml")).unwrap();
        assert_eq!(config.embedding.provider, "local");
        assert_eq!(config.chunking.overlap, 200);
        assert_eq!(config.analytics.max_concurrent, 3);
    }
}
