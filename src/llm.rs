//! Language-model capability used by answer synthesis.
//!
//! [`OpenAiChatModel`] talks to any OpenAI-compatible
//! `POST /v1/chat/completions` endpoint. Cost is derived from the `usage`
//! block of the response and the per-1k-token prices it was configured
//! with (zero by default, e.g. for self-hosted endpoints).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::credentials::{require_credential, CredentialStore};
use crate::embedding::backend::read_json;
use crate::error::{RagError, RagResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub content: String,
    /// Provider-reported cost of the call, in USD.
    pub cost: f64,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        model: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> RagResult<ChatResponse>;
}

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";
const PROVIDER_ID: &str = "openai";

pub struct OpenAiChatModel {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialStore>,
    prompt_price_per_1k: f64,
    completion_price_per_1k: f64,
}

impl OpenAiChatModel {
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
            prompt_price_per_1k: 0.0,
            completion_price_per_1k: 0.0,
        })
    }

    pub fn with_pricing(mut self, prompt_per_1k: f64, completion_per_1k: f64) -> Self {
        self.prompt_price_per_1k = prompt_per_1k;
        self.completion_price_per_1k = completion_per_1k;
        self
    }

    fn parse_response(&self, json: &serde_json::Value) -> RagResult<ChatResponse> {
        let content = json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| RagError::backend("invalid chat response: missing choices[0].message.content"))?
            .to_string();

        let usage = |field: &str| {
            json.pointer(&format!("/usage/{field}"))
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as f64
        };
        let cost = usage("prompt_tokens") / 1000.0 * self.prompt_price_per_1k
            + usage("completion_tokens") / 1000.0 * self.completion_price_per_1k;

        Ok(ChatResponse { content, cost })
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        model: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> RagResult<ChatResponse> {
        let api_key = require_credential(self.credentials.as_ref(), PROVIDER_ID).await?;

        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": temperature,
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await?;

        let json = read_json(response, "chat").await?;
        self.parse_response(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentialStore;
    use crate::embedding::backend::http_fixture;

    fn model() -> OpenAiChatModel {
        OpenAiChatModel::new(
            Some("http://127.0.0.1:9/"),
            Duration::from_secs(1),
            Arc::new(StaticCredentialStore::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_response_with_pricing() {
        let m = model().with_pricing(0.5, 1.5);
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "42"}}],
            "usage": {"prompt_tokens": 2000, "completion_tokens": 1000}
        });
        let resp = m.parse_response(&json).unwrap();
        assert_eq!(resp.content, "42");
        assert!((resp.cost - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_parse_response_missing_content() {
        let json = serde_json::json!({"choices": []});
        assert!(matches!(
            model().parse_response(&json),
            Err(RagError::Backend { .. })
        ));
    }

    #[test]
    fn test_messages_serialize_with_lowercase_roles() {
        let json = serde_json::to_value(ChatMessage::system("be precise")).unwrap();
        assert_eq!(json["role"], "system");
    }

    #[tokio::test]
    async fn test_chat_without_credential() {
        let err = model()
            .chat(&[ChatMessage::user("hi")], "gpt-4o-mini", 10, 0.3)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::NoCredential(_)));
    }

    #[tokio::test]
    async fn test_rate_limited_chat_is_retryable_backend_error() {
        let url = http_fixture::respond_once(429, "slow down").await;
        let model = OpenAiChatModel::new(
            Some(&url),
            Duration::from_secs(5),
            Arc::new(StaticCredentialStore::with("openai", "sk-test")),
        )
        .unwrap();

        let err = model
            .chat(&[ChatMessage::user("hi")], "gpt-4o-mini", 10, 0.3)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Backend { status: Some(429), .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_chat_success_returns_content() {
        let url = http_fixture::respond_once(
            200,
            r#"{"choices":[{"message":{"role":"assistant","content":"friday"}}]}"#,
        )
        .await;
        let model = OpenAiChatModel::new(
            Some(&url),
            Duration::from_secs(5),
            Arc::new(StaticCredentialStore::with("openai", "sk-test")),
        )
        .unwrap();

        let resp = model
            .chat(&[ChatMessage::user("when?")], "gpt-4o-mini", 10, 0.3)
            .await
            .unwrap();
        assert_eq!(resp.content, "friday");
    }
}
