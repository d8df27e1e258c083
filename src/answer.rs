//! Grounded answer synthesis over a retrieved [`RagContext`].

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::error::RagResult;
use crate::llm::{ChatMessage, LanguageModel};
use crate::models::{RagContext, RagResponse, TokenUsage};
use crate::rag::RagEngine;
use crate::tokens::estimate_tokens;

pub const SYSTEM_PROMPT: &str = "You answer precisely based on the given context.";
pub const ANSWER_TEMPERATURE: f32 = 0.3;
pub const ANSWER_MAX_TOKENS: u32 = 1000;

/// Context size above which the answer counts as well supported.
const RICH_CONTEXT_TOKENS: usize = 1000;

pub struct AnswerSynthesizer {
    llm: Arc<dyn LanguageModel>,
    model: String,
}

impl AnswerSynthesizer {
    pub fn new(llm: Arc<dyn LanguageModel>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Answer `question` from `context` only.
    ///
    /// Confidence blends retrieval confidence with whether the context was
    /// large: `0.8 * context.confidence + (0.2 | 0.1)`. It is a heuristic,
    /// not a calibrated probability.
    #[instrument(skip(self, context), fields(model = %self.model, chunks = context.relevant_chunks.len()))]
    pub async fn answer(&self, question: &str, context: RagContext) -> RagResult<RagResponse> {
        let prompt = build_prompt(question, &context);
        let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(&prompt)];

        let reply = self
            .llm
            .chat(&messages, &self.model, ANSWER_MAX_TOKENS, ANSWER_TEMPERATURE)
            .await?;

        let prompt_tokens = estimate_tokens(&prompt);
        let completion_tokens = estimate_tokens(&reply.content);
        let context_bonus = if context.total_tokens > RICH_CONTEXT_TOKENS {
            0.2
        } else {
            0.1
        };
        let confidence = context.confidence * 0.8 + context_bonus;

        debug!(prompt_tokens, completion_tokens, cost = reply.cost, "answer generated");
        Ok(RagResponse {
            answer: reply.content,
            sources: context.sources.clone(),
            confidence,
            token_usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            cost: reply.cost,
            model: self.model.clone(),
            context,
        })
    }

    /// Retrieve a context for `question` with `engine`, then answer it.
    pub async fn ask(
        &self,
        engine: &RagEngine,
        question: &str,
        project_id: Option<&str>,
        max_tokens: usize,
    ) -> RagResult<RagResponse> {
        let context = engine
            .get_relevant_context(question, project_id, max_tokens)
            .await?;
        self.answer(question, context).await
    }
}

/// Render the user prompt. Deterministic for a given question and context.
pub fn build_prompt(question: &str, context: &RagContext) -> String {
    let excerpts = context
        .relevant_chunks
        .iter()
        .map(|c| {
            format!(
                "【{}/{}】{}",
                c.metadata.chunk_number, c.metadata.total_chunks, c.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Answer the question using the following excerpts.\n\
         ==================\n\
         {excerpts}\n\
         \n\
         Question:\n\
         ==================\n\
         {question}\n\
         \n\
         Instructions:\n\
         1. Answer only from the information in the excerpts above.\n\
         2. If the excerpts do not contain the answer, say that it cannot be determined from the provided information.\n\
         3. Do not use outside knowledge."
    )
}
