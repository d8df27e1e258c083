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

pub const MIN_DATA_POINTS: usize = 10;
pub const MAX_HORIZON_DAYS: u32 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastModel {
    #[default]
    Linear,
    Seasonal,
    Ensemble,
}

impl ForecastModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Seasonal => "seasonal",
            Self::Ensemble => "ensemble",
        }
    }

    fn cost(&self) -> f64 {
        match self {
            Self::Linear => 1.0,
            Self::Seasonal => 1.5,
            Self::Ensemble => 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictiveInput {
    pub target_variables: Vec<String>,
    pub data: Vec<DataPoint>,
    pub horizon_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictiveConfig {
    pub model: ForecastModel,
    pub confidence_level: f64,
}

impl Default for PredictiveConfig {
    fn default() -> Self {
        Self {
            model: ForecastModel::default(),
            confidence_level: 0.95,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub variable: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictiveOutput {
    pub forecasts: Vec<Forecast>,
}

/// Forecasts target variables over a horizon of days.
pub struct PredictiveEngine {
    algorithms: AlgorithmRegistry<PredictiveInput, PredictiveConfig, PredictiveOutput>,
}

impl Default for PredictiveEngine {
    fn default() -> Self {
        Self {
            algorithms: AlgorithmRegistry::with_placeholders(&["linear", "seasonal", "ensemble"]),
        }
    }
}

impl PredictiveEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_algorithm(
        mut self,
        model: ForecastModel,
        algorithm: Arc<dyn Algorithm<PredictiveInput, PredictiveConfig, PredictiveOutput>>,
    ) -> Self {
        self.algorithms.register(model.as_str(), algorithm);
        self
    }
}

#[async_trait]
impl AnalyticsEngine for PredictiveEngine {
    type Input = PredictiveInput;
    type Config = PredictiveConfig;
    type Output = PredictiveOutput;

    fn name(&self) -> &str {
        "predictive"
    }

    fn validate_input(&self, input: &PredictiveInput, config: &PredictiveConfig) -> Result<(), String> {
        require_count("target variable(s)", input.target_variables.len(), 1)?;
        require_count("data points", input.data.len(), MIN_DATA_POINTS)?;
        if input.horizon_days == 0 || input.horizon_days > MAX_HORIZON_DAYS {
            return Err(format!(
                "forecast horizon must be between 1 and {MAX_HORIZON_DAYS} days, got {}",
                input.horizon_days
            ));
        }
        if !(config.confidence_level > 0.0 && config.confidence_level < 1.0) {
            return Err(format!(
                "confidence level must be in (0, 1), got {}",
                config.confidence_level
            ));
        }
        require_observed(&input.target_variables, &input.data)
    }

    async fn perform_analysis(
        &self,
        input: &PredictiveInput,
        config: &PredictiveConfig,
    ) -> anyhow::Result<PredictiveOutput> {
        self.algorithms
            .select(config.model.as_str())?
            .run(input, config)
            .await
    }

    fn calculate_quality_metrics(&self, input: &PredictiveInput, _output: &PredictiveOutput) -> QualityMetrics {
        sample_quality(&input.target_variables, &input.data, MIN_DATA_POINTS)
    }

    fn identify_warnings(
        &self,
        input: &PredictiveInput,
        _config: &PredictiveConfig,
        quality: &QualityMetrics,
    ) -> Vec<AnalyticsWarning> {
        let mut warnings = quality_warnings(quality);
        if input.horizon_days as usize > input.data.len() {
            warnings.push(AnalyticsWarning::new(
                WarningLevel::Warning,
                format!(
                    "horizon of {} days exceeds the {} observed points",
                    input.horizon_days,
                    input.data.len()
                ),
                "Shorten the horizon or supply a longer history.",
            ));
        }
        warnings
    }

    /// 2s per target, scaled by points per 1000, horizon per 30 days, and
    /// the model's cost.
    fn estimate_execution_time(&self, input: &PredictiveInput, config: &PredictiveConfig) -> Duration {
        let secs = 2.0
            * input.target_variables.len() as f64
            * scale(input.data.len(), 1000.0)
            * scale(input.horizon_days as usize, 30.0)
            * config.model.cost();
        Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{names, series};
    use super::*;

    fn input(points: usize, horizon_days: u32) -> PredictiveInput {
        PredictiveInput {
            target_variables: names(&["revenue"]),
            data: series(&["revenue"], points),
            horizon_days,
        }
    }

    #[test]
    fn test_validation_bounds() {
        let engine = PredictiveEngine::new();
        let config = PredictiveConfig::default();

        assert!(engine.validate_input(&input(10, 1), &config).is_ok());
        assert!(engine.validate_input(&input(10, 365), &config).is_ok());
        assert!(engine.validate_input(&input(9, 30), &config).unwrap_err().contains("10 data points"));
        assert!(engine.validate_input(&input(10, 0), &config).unwrap_err().contains("horizon"));
        assert!(engine.validate_input(&input(10, 366), &config).is_err());

        let mut no_targets = input(10, 30);
        no_targets.target_variables.clear();
        assert!(engine.validate_input(&no_targets, &config).is_err());
    }

    #[test]
    fn test_time_estimate_scales_with_horizon_and_model() {
        let engine = PredictiveEngine::new();
        let linear = PredictiveConfig::default();
        assert_eq!(engine.estimate_execution_time(&input(100, 30), &linear), Duration::from_secs(2));
        assert_eq!(engine.estimate_execution_time(&input(100, 90), &linear), Duration::from_secs(6));

        let ensemble = PredictiveConfig {
            model: ForecastModel::Ensemble,
            ..Default::default()
        };
        assert_eq!(engine.estimate_execution_time(&input(100, 30), &ensemble), Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_placeholder_returns_empty_forecast() {
        let engine = PredictiveEngine::new();
        let output = engine
            .perform_analysis(&input(20, 7), &PredictiveConfig::default())
            .await
            .unwrap();
        assert!(output.forecasts.is_empty());
    }

    #[test]
    fn test_long_horizon_warns() {
        let engine = PredictiveEngine::new();
        let input = input(50, 120);
        let quality = engine.calculate_quality_metrics(&input, &PredictiveOutput::default());
        let warnings = engine.identify_warnings(&input, &PredictiveConfig::default(), &quality);
        assert!(warnings.iter().any(|w| w.message.contains("horizon")));
    }
}
