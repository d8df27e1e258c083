//! TTL cache for analytics results.
//!
//! Keys are derived from the engine, the operation, and hashes of the
//! serialized input and configuration, so two calls with equal inputs share
//! an entry regardless of how the caller built them.
//!
//! `put` sweeps expired entries and then drops the oldest ones while the
//! map is over its cap, so the cache stays bounded under varied inputs.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Default hard cap on cached results.
pub const DEFAULT_MAX_RESULTS: usize = 1_000;

struct CacheEntry<T> {
    value: T,
    created_at: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub struct ResultCache<T> {
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
    stats: Mutex<ResultCacheStats>,
    ttl: Duration,
    max_entries: usize,
}

impl<T: Clone> ResultCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_MAX_RESULTS)
    }

    pub fn with_capacity(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            stats: Mutex::new(ResultCacheStats::default()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cache key for one call. Fails only if input or config cannot be
    /// serialized.
    pub fn key<I: Serialize, C: Serialize>(
        engine: &str,
        operation: &str,
        input: &I,
        config: &C,
    ) -> serde_json::Result<String> {
        let input_hash = digest(&serde_json::to_vec(input)?);
        let config_hash = digest(&serde_json::to_vec(config)?);

        let mut hasher = Sha256::new();
        for part in [engine, operation, input_hash.as_str(), config_hash.as_str()] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Unexpired value under `key`. Expired entries are dropped on read.
    pub fn get(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.lock().ok()?;
        let mut stats = self.stats.lock().ok()?;

        if let Some(entry) = entries.get(key) {
            if entry.created_at.elapsed() < self.ttl {
                stats.hits += 1;
                return Some(entry.value.clone());
            }
            entries.remove(key);
            stats.evictions += 1;
        }
        stats.misses += 1;
        None
    }

    pub fn put(&self, key: String, value: T) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, e| e.created_at.elapsed() < ttl);
        let mut evicted = before - entries.len();

        entries.insert(
            key.clone(),
            CacheEntry {
                value,
                created_at: Instant::now(),
            },
        );

        if entries.len() > self.max_entries {
            let mut by_age: Vec<(String, Instant)> = entries
                .iter()
                .filter(|(k, _)| **k != key)
                .map(|(k, e)| (k.clone(), e.created_at))
                .collect();
            by_age.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            let excess = entries.len() - self.max_entries;
            for (k, _) in by_age.into_iter().take(excess) {
                entries.remove(&k);
                evicted += 1;
            }
        }

        if evicted > 0 {
            debug!(evicted, remaining = entries.len(), "result cache swept");
            if let Ok(mut stats) = self.stats.lock() {
                stats.evictions += evicted as u64;
            }
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> ResultCacheStats {
        self.stats.lock().map(|s| *s).unwrap_or_default()
    }
}

fn digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_depends_on_every_part() {
        let base = ResultCache::<u32>::key("anomaly", "detect", &vec![1, 2], &0.5).unwrap();
        assert_eq!(
            base,
            ResultCache::<u32>::key("anomaly", "detect", &vec![1, 2], &0.5).unwrap()
        );
        assert_ne!(base, ResultCache::<u32>::key("clustering", "detect", &vec![1, 2], &0.5).unwrap());
        assert_ne!(base, ResultCache::<u32>::key("anomaly", "scan", &vec![1, 2], &0.5).unwrap());
        assert_ne!(base, ResultCache::<u32>::key("anomaly", "detect", &vec![2, 1], &0.5).unwrap());
        assert_ne!(base, ResultCache::<u32>::key("anomaly", "detect", &vec![1, 2], &0.6).unwrap());
    }

    #[test]
    fn test_get_after_put() {
        let cache = ResultCache::new(Duration::from_secs(60));
        assert_eq!(cache.get("k"), None);
        cache.put("k".into(), 7);
        assert_eq!(cache.get("k"), Some(7));
        assert_eq!(
            cache.stats(),
            ResultCacheStats {
                hits: 1,
                misses: 1,
                evictions: 0
            }
        );
    }

    #[test]
    fn test_expired_entries_are_evicted() {
        let cache = ResultCache::new(Duration::from_millis(20));
        cache.put("k".into(), "v".to_string());
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_put_sweeps_expired_entries() {
        let cache = ResultCache::new(Duration::from_millis(5));
        for i in 0..500 {
            cache.put(format!("k{i}"), i);
        }
        std::thread::sleep(Duration::from_millis(30));
        cache.put("fresh".into(), 0);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 500);
    }

    #[test]
    fn test_cap_drops_oldest_first() {
        let cache = ResultCache::with_capacity(Duration::from_secs(60), 2);
        cache.put("a".into(), 1);
        std::thread::sleep(Duration::from_millis(2));
        cache.put("b".into(), 2);
        std::thread::sleep(Duration::from_millis(2));
        cache.put("c".into(), 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.get("c"), Some(3));
    }
}
