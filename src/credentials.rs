//! Credential store interface.
//!
//! Remote embedding and language-model backends look their API key up by
//! provider id (`"openai"`, ...). A missing key surfaces as
//! [`RagError::NoCredential`](crate::error::RagError::NoCredential) at call
//! time, never as a panic.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{RagError, RagResult};

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns the secret for `provider_id`, if one is stored.
    async fn get_credential(&self, provider_id: &str) -> Option<String>;
}

/// Fetch a credential or fail with `NoCredential`.
pub async fn require_credential(
    store: &dyn CredentialStore,
    provider_id: &str,
) -> RagResult<String> {
    match store.get_credential(provider_id).await {
        Some(secret) if !secret.trim().is_empty() => Ok(secret),
        _ => Err(RagError::NoCredential(provider_id.to_string())),
    }
}

/// Reads `<PROVIDER>_API_KEY` from the process environment
/// (`openai` -> `OPENAI_API_KEY`).
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentialStore;

impl EnvCredentialStore {
    pub fn var_name(provider_id: &str) -> String {
        format!("{}_API_KEY", provider_id.to_ascii_uppercase().replace('-', "_"))
    }
}

#[async_trait]
impl CredentialStore for EnvCredentialStore {
    async fn get_credential(&self, provider_id: &str) -> Option<String> {
        std::env::var(Self::var_name(provider_id)).ok()
    }
}

/// In-memory credential map, for tests and for shells that load secrets
/// from their own keychain at startup.
#[derive(Debug, Default)]
pub struct StaticCredentialStore {
    secrets: RwLock<HashMap<String, String>>,
}

impl StaticCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(provider_id: &str, secret: &str) -> Self {
        let store = Self::new();
        store.set(provider_id, secret);
        store
    }

    pub fn set(&self, provider_id: &str, secret: &str) {
        if let Ok(mut secrets) = self.secrets.write() {
            secrets.insert(provider_id.to_string(), secret.to_string());
        }
    }
}

#[async_trait]
impl CredentialStore for StaticCredentialStore {
    async fn get_credential(&self, provider_id: &str) -> Option<String> {
        self.secrets
            .read()
            .ok()
            .and_then(|secrets| secrets.get(provider_id).cloned())
    }
}
