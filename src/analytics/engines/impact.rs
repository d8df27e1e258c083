use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{require_count, scale, Algorithm, AlgorithmRegistry};
use crate::analytics::{AnalyticsEngine, AnalyticsWarning, QualityMetrics, WarningLevel};

pub const MAX_RANGE_DAYS: i64 = 365;
pub const MAX_ITERATIONS: u32 = 100_000;

/// Fewer simulation runs than this give wide intervals.
const STABLE_ITERATIONS: u32 = 1_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intervention {
    pub name: String,
    /// Variable the intervention acts on.
    pub target: String,
    /// Relative change applied to the target, e.g. `0.1` for +10%.
    pub magnitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactInput {
    pub interventions: Vec<Intervention>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ImpactInput {
    fn range_days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactConfig {
    pub iterations: u32,
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self { iterations: 10_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactEffect {
    pub intervention: String,
    pub expected_change: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpactOutput {
    pub effects: Vec<ImpactEffect>,
}

/// Simulates the effect of planned interventions over a time range.
pub struct ImpactEngine {
    algorithms: AlgorithmRegistry<ImpactInput, ImpactConfig, ImpactOutput>,
}

impl Default for ImpactEngine {
    fn default() -> Self {
        Self {
            algorithms: AlgorithmRegistry::with_placeholders(&["simulation"]),
        }
    }
}

impl ImpactEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_algorithm(
        mut self,
        algorithm: Arc<dyn Algorithm<ImpactInput, ImpactConfig, ImpactOutput>>,
    ) -> Self {
        self.algorithms.register("simulation", algorithm);
        self
    }
}

#[async_trait]
impl AnalyticsEngine for ImpactEngine {
    type Input = ImpactInput;
    type Config = ImpactConfig;
    type Output = ImpactOutput;

    fn name(&self) -> &str {
        "impact"
    }

    fn validate_input(&self, input: &ImpactInput, config: &ImpactConfig) -> Result<(), String> {
        require_count("intervention(s)", input.interventions.len(), 1)?;
        if input.start >= input.end {
            return Err("time range start must be before its end".into());
        }
        if input.range_days() > MAX_RANGE_DAYS {
            return Err(format!(
                "time range must not exceed {MAX_RANGE_DAYS} days, got {}",
                input.range_days()
            ));
        }
        if config.iterations == 0 || config.iterations > MAX_ITERATIONS {
            return Err(format!(
                "iterations must be between 1 and {MAX_ITERATIONS}, got {}",
                config.iterations
            ));
        }
        Ok(())
    }

    async fn perform_analysis(&self, input: &ImpactInput, config: &ImpactConfig) -> anyhow::Result<ImpactOutput> {
        self.algorithms.select("simulation")?.run(input, config).await
    }

    /// Completeness is the share of interventions with a named target and a
    /// finite magnitude; accuracy and reliability are fixed for simulations.
    fn calculate_quality_metrics(&self, input: &ImpactInput, _output: &ImpactOutput) -> QualityMetrics {
        let well_formed = input
            .interventions
            .iter()
            .filter(|i| !i.target.trim().is_empty() && i.magnitude.is_finite())
            .count();
        QualityMetrics {
            completeness: well_formed as f64 / input.interventions.len().max(1) as f64,
            accuracy: 0.7,
            reliability: 0.7,
            significance: None,
        }
    }

    fn identify_warnings(
        &self,
        input: &ImpactInput,
        config: &ImpactConfig,
        quality: &QualityMetrics,
    ) -> Vec<AnalyticsWarning> {
        let mut warnings = Vec::new();
        if quality.completeness < 1.0 {
            warnings.push(AnalyticsWarning::new(
                WarningLevel::Error,
                "some interventions lack a target or a finite magnitude",
                "Name a target variable and magnitude for every intervention.",
            ));
        }
        if config.iterations < STABLE_ITERATIONS {
            warnings.push(AnalyticsWarning::new(
                WarningLevel::Info,
                format!("{} iterations give wide intervals", config.iterations),
                format!("Use at least {STABLE_ITERATIONS} iterations."),
            ));
        }
        let targets: std::collections::HashSet<&str> =
            input.interventions.iter().map(|i| i.target.as_str()).collect();
        if targets.len() < input.interventions.len() {
            warnings.push(AnalyticsWarning::new(
                WarningLevel::Warning,
                "several interventions act on the same variable",
                "Their effects are confounded; consider simulating them separately.",
            ));
        }
        warnings
    }

    /// 5s per intervention, scaled by iterations per 1000 and days per 30.
    fn estimate_execution_time(&self, input: &ImpactInput, config: &ImpactConfig) -> Duration {
        Duration::from_secs_f64(
            5.0 * input.interventions.len() as f64
                * scale(config.iterations as usize, 1000.0)
                * scale(input.range_days().max(0) as usize, 30.0),
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn input(days: i64) -> ImpactInput {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        ImpactInput {
            interventions: vec![Intervention {
                name: "price increase".into(),
                target: "revenue".into(),
                magnitude: 0.05,
            }],
            start,
            end: start + chrono::Duration::days(days),
        }
    }

    fn iterations(iterations: u32) -> ImpactConfig {
        ImpactConfig { iterations }
    }

    #[test]
    fn test_validation_bounds() {
        let engine = ImpactEngine::new();
        assert!(engine.validate_input(&input(365), &iterations(1)).is_ok());
        assert!(engine.validate_input(&input(30), &iterations(100_000)).is_ok());
        assert!(engine.validate_input(&input(366), &iterations(10)).unwrap_err().contains("365 days"));
        assert!(engine.validate_input(&input(0), &iterations(10)).unwrap_err().contains("before"));
        assert!(engine.validate_input(&input(30), &iterations(0)).is_err());
        assert!(engine.validate_input(&input(30), &iterations(100_001)).is_err());

        let mut none = input(30);
        none.interventions.clear();
        assert!(engine.validate_input(&none, &iterations(10)).is_err());
    }

    #[test]
    fn test_time_estimate() {
        let engine = ImpactEngine::new();
        assert_eq!(
            engine.estimate_execution_time(&input(60), &iterations(10_000)),
            Duration::from_secs(100)
        );
    }

    #[test]
    fn test_warnings() {
        let engine = ImpactEngine::new();
        let mut input = input(30);
        input.interventions.push(Intervention {
            name: "ad campaign".into(),
            target: "revenue".into(),
            magnitude: f64::NAN,
        });
        let quality = engine.calculate_quality_metrics(&input, &ImpactOutput::default());
        assert!((quality.completeness - 0.5).abs() < 1e-9);

        let levels: Vec<WarningLevel> = engine
            .identify_warnings(&input, &iterations(100), &quality)
            .iter()
            .map(|w| w.level)
            .collect();
        assert_eq!(levels, vec![WarningLevel::Error, WarningLevel::Info, WarningLevel::Warning]);
    }
}
