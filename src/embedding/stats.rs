//! Running counters for the embedding service.

use std::collections::VecDeque;

use serde::Serialize;

/// Number of recent latencies kept for inspection.
pub const LATENCY_WINDOW: usize = 100;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessingStats {
    /// Texts embedded (cache hits included).
    pub total_processed: u64,
    pub average_latency_ms: f64,
    /// Fraction of texts served from the cache.
    pub cache_hit_rate: f64,
    pub backend_calls: u64,
    pub recent_latencies: VecDeque<f64>,
}

impl ProcessingStats {
    /// Fold one embedded text into the running means. O(1) amortized.
    pub fn record(&mut self, latency_ms: f64, cache_hit: bool) {
        self.total_processed += 1;
        let n = self.total_processed as f64;
        self.average_latency_ms += (latency_ms - self.average_latency_ms) / n;
        let hit = if cache_hit { 1.0 } else { 0.0 };
        self.cache_hit_rate += (hit - self.cache_hit_rate) / n;

        if self.recent_latencies.len() == LATENCY_WINDOW {
            self.recent_latencies.pop_front();
        }
        self.recent_latencies.push_back(latency_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_means() {
        let mut stats = ProcessingStats::default();
        stats.record(10.0, false);
        stats.record(20.0, true);
        stats.record(30.0, true);
        assert_eq!(stats.total_processed, 3);
        assert!((stats.average_latency_ms - 20.0).abs() < 1e-9);
        assert!((stats.cache_hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let mut stats = ProcessingStats::default();
        for i in 0..250 {
            stats.record(i as f64, false);
        }
        assert_eq!(stats.recent_latencies.len(), LATENCY_WINDOW);
        assert_eq!(stats.recent_latencies.front(), Some(&150.0));
        assert_eq!(stats.recent_latencies.back(), Some(&249.0));
    }
}
