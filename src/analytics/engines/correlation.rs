use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    quality_warnings, require_count, require_observed, sample_quality, scale, Algorithm,
    AlgorithmRegistry, DataPoint,
};
use crate::analytics::{AnalyticsEngine, AnalyticsWarning, QualityMetrics, WarningLevel};

pub const MIN_VARIABLES: usize = 2;
pub const MIN_DATA_POINTS: usize = 3;

/// Below this many points a coefficient says little.
const RELIABLE_POINTS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMethod {
    #[default]
    Pearson,
    Spearman,
}

impl CorrelationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pearson => "pearson",
            Self::Spearman => "spearman",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationInput {
    pub variables: Vec<String>,
    pub data: Vec<DataPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationConfig {
    pub method: CorrelationMethod,
    /// Pairs with |coefficient| below this are not reported.
    pub min_coefficient: f64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            method: CorrelationMethod::default(),
            min_coefficient: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationPair {
    pub left: String,
    pub right: String,
    pub coefficient: f64,
    pub p_value: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationOutput {
    pub pairs: Vec<CorrelationPair>,
}

pub struct CorrelationEngine {
    algorithms: AlgorithmRegistry<CorrelationInput, CorrelationConfig, CorrelationOutput>,
}

impl Default for CorrelationEngine {
    fn default() -> Self {
        Self {
            algorithms: AlgorithmRegistry::with_placeholders(&["pearson", "spearman"]),
        }
    }
}

impl CorrelationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_algorithm(
        mut self,
        method: CorrelationMethod,
        algorithm: Arc<dyn Algorithm<CorrelationInput, CorrelationConfig, CorrelationOutput>>,
    ) -> Self {
        self.algorithms.register(method.as_str(), algorithm);
        self
    }
}

#[async_trait]
impl AnalyticsEngine for CorrelationEngine {
    type Input = CorrelationInput;
    type Config = CorrelationConfig;
    type Output = CorrelationOutput;

    fn name(&self) -> &str {
        "correlation"
    }

    fn validate_input(&self, input: &CorrelationInput, config: &CorrelationConfig) -> Result<(), String> {
        require_count("variables", input.variables.len(), MIN_VARIABLES)?;
        require_count("data points", input.data.len(), MIN_DATA_POINTS)?;
        if !(0.0..=1.0).contains(&config.min_coefficient) {
            return Err(format!(
                "minimum coefficient must be in [0, 1], got {}",
                config.min_coefficient
            ));
        }
        require_observed(&input.variables, &input.data)
    }

    async fn perform_analysis(
        &self,
        input: &CorrelationInput,
        config: &CorrelationConfig,
    ) -> anyhow::Result<CorrelationOutput> {
        self.algorithms
            .select(config.method.as_str())?
            .run(input, config)
            .await
    }

    fn calculate_quality_metrics(&self, input: &CorrelationInput, _output: &CorrelationOutput) -> QualityMetrics {
        sample_quality(&input.variables, &input.data, MIN_DATA_POINTS)
    }

    fn identify_warnings(
        &self,
        input: &CorrelationInput,
        _config: &CorrelationConfig,
        quality: &QualityMetrics,
    ) -> Vec<AnalyticsWarning> {
        let mut warnings = quality_warnings(quality);
        if input.data.len() < RELIABLE_POINTS {
            warnings.push(AnalyticsWarning::new(
                WarningLevel::Warning,
                format!("{} points are too few for stable coefficients", input.data.len()),
                format!("Use at least {RELIABLE_POINTS} points."),
            ));
        }
        warnings
    }

    /// 0.5s per variable pair, scaled by points per 1000; Spearman costs
    /// 1.5x for ranking.
    fn estimate_execution_time(&self, input: &CorrelationInput, config: &CorrelationConfig) -> Duration {
        let n = input.variables.len();
        let pairs = (n * n.saturating_sub(1) / 2) as f64;
        let method = match config.method {
            CorrelationMethod::Pearson => 1.0,
            CorrelationMethod::Spearman => 1.5,
        };
        Duration::from_secs_f64(0.5 * pairs * scale(input.data.len(), 1000.0) * method)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{names, series};
    use super::*;

    fn input(variables: &[&str], points: usize) -> CorrelationInput {
        CorrelationInput {
            variables: names(variables),
            data: series(variables, points),
        }
    }

    #[test]
    fn test_validation_bounds() {
        let engine = CorrelationEngine::new();
        let config = CorrelationConfig::default();
        assert!(engine.validate_input(&input(&["a", "b"], 3), &config).is_ok());
        assert!(engine.validate_input(&input(&["a"], 10), &config).unwrap_err().contains("2 variables"));
        assert!(engine.validate_input(&input(&["a", "b"], 2), &config).is_err());

        let bad = CorrelationConfig {
            min_coefficient: 1.5,
            ..Default::default()
        };
        assert!(engine.validate_input(&input(&["a", "b"], 3), &bad).is_err());
    }

    #[test]
    fn test_time_estimate_counts_pairs() {
        let engine = CorrelationEngine::new();
        let config = CorrelationConfig::default();
        assert_eq!(
            engine.estimate_execution_time(&input(&["a", "b", "c", "d"], 10), &config),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn test_few_points_warn() {
        let engine = CorrelationEngine::new();
        let input = input(&["a", "b"], 5);
        let quality = engine.calculate_quality_metrics(&input, &CorrelationOutput::default());
        let warnings = engine.identify_warnings(&input, &CorrelationConfig::default(), &quality);
        assert!(warnings.iter().any(|w| w.level == WarningLevel::Warning));
    }
}
