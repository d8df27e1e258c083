//! Error taxonomy for the retrieval and analytics pipelines.
//!
//! Collaborator traits (stores, repositories, HTTP clients) report failures
//! as [`anyhow::Error`]; the engines re-wrap them into [`RagError`] or
//! [`AnalyticsError`] before they reach the caller, so the calling layer
//! only ever has to match on these two enums.

use thiserror::Error;

/// Errors raised by chunking, embedding, retrieval, and answer synthesis.
#[derive(Error, Debug)]
pub enum RagError {
    /// Invalid configuration (bad chunk overlap, missing model, ...).
    /// Never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// A remote backend was selected but no credential is stored for it.
    #[error("no credential configured for provider '{0}'")]
    NoCredential(String),

    /// The requested model/backend combination is not implemented.
    #[error("unsupported embedding model: {0}")]
    UnsupportedModel(String),

    /// Transport or non-2xx failure from an embedding or language-model API.
    #[error("backend error: {message}")]
    Backend {
        message: String,
        /// HTTP status, when the failure came from a response.
        status: Option<u16>,
    },

    /// Vector store or content persistence failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Caller-supplied input rejected before any expensive work.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl RagError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            status: None,
        }
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    /// True for failures that may succeed if the caller tries again
    /// (rate limits, 5xx, dropped connections). The engine itself never
    /// retries; this is a hint for the calling layer.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Backend { status: None, .. } => true,
            Self::Backend {
                status: Some(code), ..
            } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for RagError {
    fn from(err: reqwest::Error) -> Self {
        Self::Backend {
            message: err.to_string(),
            status: err.status().map(|s| s.as_u16()),
        }
    }
}

/// Errors raised by the analytics framework. Each variant names the engine
/// (and operation, where one was running) so the caller can render an
/// actionable message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalyticsError {
    #[error("{engine}: concurrency limit of {limit} in-flight operations exceeded")]
    ConcurrencyLimitExceeded { engine: String, limit: usize },

    #[error("{engine}: invalid input: {reason}")]
    InvalidInput { engine: String, reason: String },

    #[error("{engine}: operation '{operation}' failed: {reason}")]
    ExecutionFailed {
        engine: String,
        operation: String,
        reason: String,
    },
}

impl AnalyticsError {
    pub fn engine(&self) -> &str {
        match self {
            Self::ConcurrencyLimitExceeded { engine, .. }
            | Self::InvalidInput { engine, .. }
            | Self::ExecutionFailed { engine, .. } => engine,
        }
    }
}

pub type RagResult<T> = std::result::Result<T, RagError>;
