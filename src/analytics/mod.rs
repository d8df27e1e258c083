//! Analytics engine framework.
//!
//! [`AnalyticsFramework`] wraps one [`AnalyticsEngine`] and runs every call
//! through the same steps:
//!
//! 1. **Admission**: at most `max_concurrent` calls run at once per
//!    framework instance. An extra call fails immediately with
//!    [`AnalyticsError::ConcurrencyLimitExceeded`] instead of queuing.
//! 2. **Cache probe**: a result cached for the same engine, operation,
//!    input, and configuration within the TTL is returned as is, with
//!    `metadata.cached` set.
//! 3. **Validate**: [`AnalyticsEngine::validate_input`]; failures become
//!    [`AnalyticsError::InvalidInput`].
//! 4. **Analyze**: [`AnalyticsEngine::perform_analysis`]; failures become
//!    [`AnalyticsError::ExecutionFailed`].
//! 5. **Score**: quality metrics reduced to one confidence value.
//! 6. **Warn**: advisory warnings. They never fail the call.
//! 7. **Cache and return.**
//!
//! The admission slot is an owned semaphore permit, released on every exit
//! path, including when the caller drops the future.
//!
//! Every call emits one telemetry event: a `tracing` event under the
//! `memo_rag::telemetry` target and, when configured, a record in a
//! [`TelemetrySink`].

pub mod cache;
pub mod engines;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::AnalyticsConfig;
use crate::error::AnalyticsError;

pub use cache::{ResultCache, ResultCacheStats};

pub const DEFAULT_MAX_CONCURRENT: usize = 3;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityMetrics {
    pub completeness: f64,
    pub accuracy: f64,
    pub reliability: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub significance: Option<f64>,
}

impl QualityMetrics {
    /// `0.3 * completeness + 0.3 * accuracy + 0.4 * reliability`.
    pub fn confidence(&self) -> f64 {
        0.3 * self.completeness + 0.3 * self.accuracy + 0.4 * self.reliability
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningLevel {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsWarning {
    pub level: WarningLevel,
    pub message: String,
    pub recommendation: String,
}

impl AnalyticsWarning {
    pub fn new(level: WarningLevel, message: impl Into<String>, recommendation: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            recommendation: recommendation.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultMetadata {
    pub engine: String,
    pub operation: String,
    pub execution_time_ms: f64,
    pub estimated_time_ms: f64,
    /// True when served from the result cache.
    pub cached: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsResult<T> {
    pub data: T,
    pub confidence: f64,
    pub quality: QualityMetrics,
    pub warnings: Vec<AnalyticsWarning>,
    pub metadata: ResultMetadata,
    /// Key the result is cached under.
    pub cache_key: Option<String>,
}

/// One analytics engine: typed input, configuration, and output plus the
/// policies the framework calls between admission and caching.
#[async_trait]
pub trait AnalyticsEngine: Send + Sync {
    type Input: Serialize + Send + Sync;
    type Config: Serialize + Send + Sync;
    type Output: Serialize + Clone + Send + Sync + 'static;

    fn name(&self) -> &str;

    /// Reject input before any analysis runs. The error is a human-readable
    /// reason naming the violated constraint.
    fn validate_input(&self, input: &Self::Input, config: &Self::Config) -> Result<(), String>;

    async fn perform_analysis(
        &self,
        input: &Self::Input,
        config: &Self::Config,
    ) -> anyhow::Result<Self::Output>;

    fn calculate_quality_metrics(&self, input: &Self::Input, output: &Self::Output) -> QualityMetrics;

    fn identify_warnings(
        &self,
        input: &Self::Input,
        config: &Self::Config,
        quality: &QualityMetrics,
    ) -> Vec<AnalyticsWarning>;

    fn estimate_execution_time(&self, input: &Self::Input, config: &Self::Config) -> Duration;
}

// ============ Telemetry ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryOutcome {
    Success,
    Cached,
    Rejected,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryEvent {
    pub engine: String,
    pub operation: String,
    pub outcome: TelemetryOutcome,
    pub duration_ms: f64,
    pub error: Option<String>,
}

pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: &TelemetryEvent);
}

/// Keeps every event in memory.
#[derive(Default)]
pub struct MemoryTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl MemoryTelemetry {
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl TelemetrySink for MemoryTelemetry {
    fn record(&self, event: &TelemetryEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

// ============ Framework ============

pub struct AnalyticsFramework<E: AnalyticsEngine> {
    engine: E,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    cache: ResultCache<AnalyticsResult<E::Output>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl<E: AnalyticsEngine> AnalyticsFramework<E> {
    pub fn new(engine: E) -> Self {
        Self::with_limits(engine, DEFAULT_MAX_CONCURRENT, DEFAULT_CACHE_TTL)
    }

    pub fn with_limits(engine: E, max_concurrent: usize, cache_ttl: Duration) -> Self {
        Self::with_cache(engine, max_concurrent, ResultCache::new(cache_ttl))
    }

    pub fn from_config(engine: E, config: &AnalyticsConfig) -> Self {
        Self::with_cache(
            engine,
            config.max_concurrent,
            ResultCache::with_capacity(
                Duration::from_secs(config.cache_ttl_secs),
                config.cache_max_entries,
            ),
        )
    }

    fn with_cache(
        engine: E,
        max_concurrent: usize,
        cache: ResultCache<AnalyticsResult<E::Output>>,
    ) -> Self {
        Self {
            engine,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            cache,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn cache(&self) -> &ResultCache<AnalyticsResult<E::Output>> {
        &self.cache
    }

    /// Calls currently admitted.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    /// Run `operation` on `input` with `config`.
    pub async fn execute(
        &self,
        input: &E::Input,
        config: &E::Config,
        operation: &str,
    ) -> Result<AnalyticsResult<E::Output>, AnalyticsError> {
        let started = Instant::now();
        let engine = self.engine.name().to_string();

        let _permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                let err = AnalyticsError::ConcurrencyLimitExceeded {
                    engine: engine.clone(),
                    limit: self.max_concurrent,
                };
                self.emit(operation, TelemetryOutcome::Rejected, started, Some(&err));
                return Err(err);
            }
        };

        let key = ResultCache::<AnalyticsResult<E::Output>>::key(&engine, operation, input, config)
            .map_err(|e| {
                let err = AnalyticsError::ExecutionFailed {
                    engine: engine.clone(),
                    operation: operation.to_string(),
                    reason: format!("cannot serialize request: {e}"),
                };
                self.emit(operation, TelemetryOutcome::Failed, started, Some(&err));
                err
            })?;

        if let Some(mut hit) = self.cache.get(&key) {
            hit.metadata.cached = true;
            self.emit(operation, TelemetryOutcome::Cached, started, None);
            return Ok(hit);
        }

        if let Err(reason) = self.engine.validate_input(input, config) {
            let err = AnalyticsError::InvalidInput {
                engine: engine.clone(),
                reason,
            };
            self.emit(operation, TelemetryOutcome::Failed, started, Some(&err));
            return Err(err);
        }

        let estimated = self.engine.estimate_execution_time(input, config);
        let data = match self.engine.perform_analysis(input, config).await {
            Ok(data) => data,
            Err(e) => {
                let err = AnalyticsError::ExecutionFailed {
                    engine: engine.clone(),
                    operation: operation.to_string(),
                    reason: format!("{e:#}"),
                };
                self.emit(operation, TelemetryOutcome::Failed, started, Some(&err));
                return Err(err);
            }
        };

        let quality = self.engine.calculate_quality_metrics(input, &data);
        let warnings = self.engine.identify_warnings(input, config, &quality);

        let result = AnalyticsResult {
            data,
            confidence: quality.confidence(),
            quality,
            warnings,
            metadata: ResultMetadata {
                engine,
                operation: operation.to_string(),
                execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                estimated_time_ms: estimated.as_secs_f64() * 1000.0,
                cached: false,
                timestamp: Utc::now(),
            },
            cache_key: Some(key.clone()),
        };
        self.cache.put(key, result.clone());
        self.emit(operation, TelemetryOutcome::Success, started, None);
        Ok(result)
    }

    fn emit(
        &self,
        operation: &str,
        outcome: TelemetryOutcome,
        started: Instant,
        error: Option<&AnalyticsError>,
    ) {
        let event = TelemetryEvent {
            engine: self.engine.name().to_string(),
            operation: operation.to_string(),
            outcome,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            error: error.map(|e| e.to_string()),
        };

        match &event.error {
            Some(error) => warn!(
                target: "memo_rag::telemetry",
                engine = %event.engine,
                operation = %event.operation,
                outcome = ?event.outcome,
                duration_ms = event.duration_ms,
                %error,
                "analytics call failed"
            ),
            None => info!(
                target: "memo_rag::telemetry",
                engine = %event.engine,
                operation = %event.operation,
                outcome = ?event.outcome,
                duration_ms = event.duration_ms,
                "analytics call completed"
            ),
        }

        if let Some(sink) = &self.telemetry {
            sink.record(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::Deserialize;
    use tokio::sync::Notify;

    use super::*;

    /// Engine whose analysis blocks until released, counting invocations.
    #[derive(Default)]
    struct GateEngine {
        calls: AtomicUsize,
        gate: Notify,
        blocking: bool,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Numbers(Vec<f64>);

    #[async_trait]
    impl AnalyticsEngine for GateEngine {
        type Input = Numbers;
        type Config = u32;
        type Output = f64;

        fn name(&self) -> &str {
            "gate"
        }

        fn validate_input(&self, input: &Numbers, _config: &u32) -> Result<(), String> {
            if input.0.is_empty() {
                return Err("at least one number is required".into());
            }
            Ok(())
        }

        async fn perform_analysis(&self, input: &Numbers, config: &u32) -> anyhow::Result<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.blocking {
                self.gate.notified().await;
            }
            if *config == 0 {
                anyhow::bail!("divisor is zero");
            }
            Ok(input.0.iter().sum::<f64>() / *config as f64)
        }

        fn calculate_quality_metrics(&self, _input: &Numbers, _output: &f64) -> QualityMetrics {
            QualityMetrics {
                completeness: 1.0,
                accuracy: 0.5,
                reliability: 0.5,
                significance: None,
            }
        }

        fn identify_warnings(&self, input: &Numbers, _config: &u32, _quality: &QualityMetrics) -> Vec<AnalyticsWarning> {
            if input.0.len() < 3 {
                vec![AnalyticsWarning::new(WarningLevel::Info, "few numbers", "add more")]
            } else {
                Vec::new()
            }
        }

        fn estimate_execution_time(&self, input: &Numbers, _config: &u32) -> Duration {
            Duration::from_millis(input.0.len() as u64)
        }
    }

    #[tokio::test]
    async fn test_successful_call_scores_and_warns() {
        let telemetry = Arc::new(MemoryTelemetry::default());
        let framework = AnalyticsFramework::new(GateEngine::default()).with_telemetry(telemetry.clone());

        let result = framework.execute(&Numbers(vec![2.0, 4.0]), &2, "mean").await.unwrap();
        assert_eq!(result.data, 3.0);
        assert!((result.confidence - 0.65).abs() < 1e-9);
        assert_eq!(result.warnings.len(), 1);
        assert!(!result.metadata.cached);
        assert!((result.metadata.estimated_time_ms - 2.0).abs() < 1e-6);

        let events = telemetry.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome, TelemetryOutcome::Success);
        assert_eq!(framework.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_second_identical_call_is_cached() {
        let framework = AnalyticsFramework::new(GateEngine::default());

        let first = framework.execute(&Numbers(vec![1.0, 2.0]), &1, "sum").await.unwrap();
        let second = framework.execute(&Numbers(vec![1.0, 2.0]), &1, "sum").await.unwrap();

        assert_eq!(framework.engine().calls.load(Ordering::SeqCst), 1);
        assert!(second.metadata.cached);
        assert!(first.cache_key.is_some());
        assert_eq!(first.cache_key, second.cache_key);
        assert_eq!(
            serde_json::to_vec(&first.data).unwrap(),
            serde_json::to_vec(&second.data).unwrap()
        );

        framework.execute(&Numbers(vec![1.0, 2.0]), &2, "sum").await.unwrap();
        assert_eq!(framework.engine().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalid_input_names_engine() {
        let telemetry = Arc::new(MemoryTelemetry::default());
        let framework = AnalyticsFramework::new(GateEngine::default()).with_telemetry(telemetry.clone());

        let err = framework.execute(&Numbers(vec![]), &1, "sum").await.unwrap_err();
        assert_eq!(
            err,
            AnalyticsError::InvalidInput {
                engine: "gate".into(),
                reason: "at least one number is required".into()
            }
        );
        assert_eq!(framework.engine().calls.load(Ordering::SeqCst), 0);
        assert_eq!(telemetry.events()[0].outcome, TelemetryOutcome::Failed);
        assert_eq!(framework.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_analysis_failure_is_wrapped_and_not_cached() {
        let framework = AnalyticsFramework::new(GateEngine::default());
        let err = framework.execute(&Numbers(vec![1.0]), &0, "mean").await.unwrap_err();
        assert_eq!(
            err,
            AnalyticsError::ExecutionFailed {
                engine: "gate".into(),
                operation: "mean".into(),
                reason: "divisor is zero".into()
            }
        );
        assert!(framework.cache().is_empty());
        assert_eq!(framework.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_admission_rejects_exactly_one_extra_call() {
        let framework = Arc::new(AnalyticsFramework::with_limits(
            GateEngine {
                blocking: true,
                ..Default::default()
            },
            3,
            DEFAULT_CACHE_TTL,
        ));

        let mut running = Vec::new();
        for i in 0..3 {
            let framework = framework.clone();
            running.push(tokio::spawn(async move {
                framework.execute(&Numbers(vec![i as f64]), &1, "sum").await
            }));
        }
        while framework.engine().calls.load(Ordering::SeqCst) < 3 {
            tokio::task::yield_now().await;
        }

        let err = framework.execute(&Numbers(vec![9.0]), &1, "sum").await.unwrap_err();
        assert_eq!(
            err,
            AnalyticsError::ConcurrencyLimitExceeded {
                engine: "gate".into(),
                limit: 3
            }
        );

        framework.engine().gate.notify_waiters();
        for handle in running {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(framework.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_dropped_call_releases_its_slot() {
        let framework = AnalyticsFramework::with_limits(
            GateEngine {
                blocking: true,
                ..Default::default()
            },
            1,
            DEFAULT_CACHE_TTL,
        );

        let numbers = Numbers(vec![1.0]);
        let call = framework.execute(&numbers, &1, "sum");
        let timed_out = tokio::time::timeout(Duration::from_millis(20), call).await;
        assert!(timed_out.is_err());
        assert_eq!(framework.in_flight(), 0);
    }
}
