//! Bounded, expiring embedding cache keyed by `(model, text)`.
//!
//! The map sits behind a single async mutex, so every `get`/`set` is atomic
//! and readers never observe a torn entry. Concurrent `set`s on the same key
//! are last-write-wins.
//!
//! Expiry is enforced twice: `get` drops an individually expired entry on
//! lookup, and `set` sweeps all expired entries before evicting the oldest
//! ones whenever the hard cap is exceeded.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

/// Default hard cap on cached vectors.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedEmbedding {
    pub embedding: Vec<f32>,
    pub timestamp: DateTime<Utc>,
    pub expiration_date: DateTime<Utc>,
    pub model: String,
}

impl CachedEmbedding {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date <= now
    }
}

/// Lookup counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub lookups: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, CachedEmbedding>,
    stats: CacheStats,
}

pub struct EmbeddingCache {
    inner: Mutex<Inner>,
    max_entries: usize,
}

impl EmbeddingCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_entries: max_entries.max(1),
        }
    }

    /// Cache key: SHA-256 over the model id and the (already preprocessed)
    /// text.
    pub fn key(text: &str, model: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub async fn get(&self, text: &str, model: &str) -> Option<Vec<f32>> {
        let key = Self::key(text, model);
        let now = Utc::now();
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner.stats.lookups += 1;

        let expired = match inner.entries.get(&key) {
            Some(entry) if !entry.is_expired(now) => {
                let embedding = entry.embedding.clone();
                inner.stats.hits += 1;
                return Some(embedding);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            inner.entries.remove(&key);
            inner.stats.evictions += 1;
        }
        inner.stats.misses += 1;
        None
    }

    pub async fn set(&self, text: &str, model: &str, embedding: Vec<f32>, ttl: Duration) {
        let key = Self::key(text, model);
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        let expiration_date = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner.entries.insert(
            key,
            CachedEmbedding {
                embedding,
                timestamp: now,
                expiration_date,
                model: model.to_string(),
            },
        );

        if inner.entries.len() > self.max_entries {
            let evicted = evict(&mut inner.entries, self.max_entries, now);
            inner.stats.evictions += evicted as u64;
            debug!(evicted, remaining = inner.entries.len(), "embedding cache over capacity");
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        self.inner.lock().await.entries.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.lock().await.stats
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

/// Drop expired entries, then the oldest by insertion time until the map is
/// at or under `cap`. Returns how many entries were removed.
fn evict(entries: &mut HashMap<String, CachedEmbedding>, cap: usize, now: DateTime<Utc>) -> usize {
    let before = entries.len();
    entries.retain(|_, e| !e.is_expired(now));

    if entries.len() > cap {
        let mut by_age: Vec<(String, DateTime<Utc>)> = entries
            .iter()
            .map(|(k, e)| (k.clone(), e.timestamp))
            .collect();
        by_age.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        let excess = entries.len() - cap;
        for (key, _) in by_age.into_iter().take(excess) {
            entries.remove(&key);
        }
    }

    before - entries.len()
}
