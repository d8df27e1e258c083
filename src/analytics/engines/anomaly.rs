use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    quality_warnings, require_count, require_observed, sample_quality, scale, Algorithm,
    AlgorithmRegistry, DataPoint,
};
use crate::analytics::{AnalyticsEngine, AnalyticsWarning, QualityMetrics, WarningLevel};

pub const MIN_DATA_POINTS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyMethod {
    #[default]
    Statistical,
    IsolationForest,
}

impl AnomalyMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Statistical => "statistical",
            Self::IsolationForest => "isolation_forest",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyInput {
    pub variables: Vec<String>,
    pub data: Vec<DataPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyConfig {
    pub method: AnomalyMethod,
    /// In (0, 1]; higher flags more points.
    pub sensitivity: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            method: AnomalyMethod::default(),
            sensitivity: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub variable: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalyOutput {
    pub anomalies: Vec<Anomaly>,
}

pub struct AnomalyEngine {
    algorithms: AlgorithmRegistry<AnomalyInput, AnomalyConfig, AnomalyOutput>,
}

impl Default for AnomalyEngine {
    fn default() -> Self {
        Self {
            algorithms: AlgorithmRegistry::with_placeholders(&["statistical", "isolation_forest"]),
        }
    }
}

impl AnomalyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_algorithm(
        mut self,
        method: AnomalyMethod,
        algorithm: Arc<dyn Algorithm<AnomalyInput, AnomalyConfig, AnomalyOutput>>,
    ) -> Self {
        self.algorithms.register(method.as_str(), algorithm);
        self
    }
}

#[async_trait]
impl AnalyticsEngine for AnomalyEngine {
    type Input = AnomalyInput;
    type Config = AnomalyConfig;
    type Output = AnomalyOutput;

    fn name(&self) -> &str {
        "anomaly"
    }

    fn validate_input(&self, input: &AnomalyInput, config: &AnomalyConfig) -> Result<(), String> {
        require_count("variable(s)", input.variables.len(), 1)?;
        require_count("data points", input.data.len(), MIN_DATA_POINTS)?;
        if !(config.sensitivity > 0.0 && config.sensitivity <= 1.0) {
            return Err(format!(
                "sensitivity must be in (0, 1], got {}",
                config.sensitivity
            ));
        }
        require_observed(&input.variables, &input.data)
    }

    async fn perform_analysis(&self, input: &AnomalyInput, config: &AnomalyConfig) -> anyhow::Result<AnomalyOutput> {
        self.algorithms
            .select(config.method.as_str())?
            .run(input, config)
            .await
    }

    fn calculate_quality_metrics(&self, input: &AnomalyInput, _output: &AnomalyOutput) -> QualityMetrics {
        sample_quality(&input.variables, &input.data, MIN_DATA_POINTS)
    }

    fn identify_warnings(
        &self,
        _input: &AnomalyInput,
        config: &AnomalyConfig,
        quality: &QualityMetrics,
    ) -> Vec<AnalyticsWarning> {
        let mut warnings = quality_warnings(quality);
        if config.sensitivity > 0.9 {
            warnings.push(AnalyticsWarning::new(
                WarningLevel::Info,
                "high sensitivity flags many ordinary fluctuations",
                "Lower the sensitivity if the result is noisy.",
            ));
        }
        warnings
    }

    /// 1s per variable, scaled by points per 1000; isolation forest costs
    /// 2.5x.
    fn estimate_execution_time(&self, input: &AnomalyInput, config: &AnomalyConfig) -> Duration {
        let method = match config.method {
            AnomalyMethod::Statistical => 1.0,
            AnomalyMethod::IsolationForest => 2.5,
        };
        Duration::from_secs_f64(
            input.variables.len() as f64 * scale(input.data.len(), 1000.0) * method,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{names, series};
    use super::*;

    fn input(points: usize) -> AnomalyInput {
        AnomalyInput {
            variables: names(&["latency"]),
            data: series(&["latency"], points),
        }
    }

    #[test]
    fn test_validation_bounds() {
        let engine = AnomalyEngine::new();
        let config = AnomalyConfig::default();
        assert!(engine.validate_input(&input(20), &config).is_ok());
        assert!(engine.validate_input(&input(19), &config).is_err());

        for sensitivity in [0.0, -0.1, 1.01] {
            let config = AnomalyConfig {
                sensitivity,
                ..Default::default()
            };
            assert!(engine.validate_input(&input(20), &config).unwrap_err().contains("sensitivity"));
        }
        let edge = AnomalyConfig {
            sensitivity: 1.0,
            ..Default::default()
        };
        assert!(engine.validate_input(&input(20), &edge).is_ok());
    }

    #[test]
    fn test_time_estimate() {
        let engine = AnomalyEngine::new();
        let forest = AnomalyConfig {
            method: AnomalyMethod::IsolationForest,
            ..Default::default()
        };
        assert_eq!(engine.estimate_execution_time(&input(4000), &forest), Duration::from_secs(10));
    }
}
