//! # memo-rag
//!
//! Retrieval-augmented generation over a user's recordings and notes, plus a
//! harness for analytics engines.
//!
//! Transcripts and documents are split into overlapping chunks, embedded
//! (in-process or through a remote API, with a TTL cache in front), and
//! stored in a vector store next to their metadata. Queries are answered by
//! semantic search, assembled into a token-bounded context, and optionally
//! passed to a language model for a grounded answer.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Sources    │──▶│  RagEngine   │──▶│ Vector store │
//! │ transcripts │   │ chunk+embed  │   │ Content store│
//! │ documents   │   └──────┬───────┘   └──────────────┘
//! └─────────────┘          │ context
//!                          ▼
//!                  ┌──────────────────┐
//!                  │ AnswerSynthesizer│──▶ LanguageModel
//!                  └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! memo init
//! memo index notes/standup.txt --project alpha
//! memo search "release date" --project alpha
//! memo ask "When do we ship?" --project alpha
//! memo kb build alpha
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`chunk`] | Fixed-window text chunking |
//! | [`tokens`] | Token estimation |
//! | [`embedding`] | Embedding service, cache, backends |
//! | [`store`] | Vector and content stores |
//! | [`sources`] | Project source repositories |
//! | [`rag`] | Indexing, search, context, knowledge bases |
//! | [`answer`] | Grounded answer synthesis |
//! | [`llm`] | Language-model capability |
//! | [`analytics`] | Analytics engine framework and engines |
//! | [`config`] | TOML configuration |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod analytics;
pub mod answer;
pub mod chunk;
pub mod commands;
pub mod config;
pub mod credentials;
pub mod db;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod rag;
pub mod sources;
pub mod store;
pub mod tokens;

pub use error::{AnalyticsError, RagError, RagResult};
