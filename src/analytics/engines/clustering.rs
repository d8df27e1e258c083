use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    quality_warnings, require_count, require_observed, sample_quality, scale, Algorithm,
    AlgorithmRegistry, DataPoint,
};
use crate::analytics::{AnalyticsEngine, AnalyticsWarning, QualityMetrics, WarningLevel};

pub const MIN_FEATURES: usize = 2;
pub const MIN_CLUSTERS: usize = 2;
pub const MAX_CLUSTERS: usize = 50;

/// Fewer points per cluster than this makes clusters unstable.
const POINTS_PER_CLUSTER: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusteringAlgorithm {
    #[default]
    KMeans,
    Hierarchical,
}

impl ClusteringAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KMeans => "k_means",
            Self::Hierarchical => "hierarchical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringInput {
    pub features: Vec<String>,
    pub data: Vec<DataPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringConfig {
    pub algorithm: ClusteringAlgorithm,
    pub cluster_count: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            algorithm: ClusteringAlgorithm::default(),
            cluster_count: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: usize,
    /// Indexes into the input data.
    pub members: Vec<usize>,
    pub centroid: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusteringOutput {
    pub clusters: Vec<Cluster>,
}

pub struct ClusteringEngine {
    algorithms: AlgorithmRegistry<ClusteringInput, ClusteringConfig, ClusteringOutput>,
}

impl Default for ClusteringEngine {
    fn default() -> Self {
        Self {
            algorithms: AlgorithmRegistry::with_placeholders(&["k_means", "hierarchical"]),
        }
    }
}

impl ClusteringEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_algorithm(
        mut self,
        kind: ClusteringAlgorithm,
        algorithm: Arc<dyn Algorithm<ClusteringInput, ClusteringConfig, ClusteringOutput>>,
    ) -> Self {
        self.algorithms.register(kind.as_str(), algorithm);
        self
    }
}

#[async_trait]
impl AnalyticsEngine for ClusteringEngine {
    type Input = ClusteringInput;
    type Config = ClusteringConfig;
    type Output = ClusteringOutput;

    fn name(&self) -> &str {
        "clustering"
    }

    fn validate_input(&self, input: &ClusteringInput, config: &ClusteringConfig) -> Result<(), String> {
        require_count("features", input.features.len(), MIN_FEATURES)?;
        if !(MIN_CLUSTERS..=MAX_CLUSTERS).contains(&config.cluster_count) {
            return Err(format!(
                "cluster count must be between {MIN_CLUSTERS} and {MAX_CLUSTERS}, got {}",
                config.cluster_count
            ));
        }
        if config.cluster_count > input.data.len() {
            return Err(format!(
                "cluster count {} exceeds the {} data points",
                config.cluster_count,
                input.data.len()
            ));
        }
        require_observed(&input.features, &input.data)
    }

    async fn perform_analysis(
        &self,
        input: &ClusteringInput,
        config: &ClusteringConfig,
    ) -> anyhow::Result<ClusteringOutput> {
        self.algorithms
            .select(config.algorithm.as_str())?
            .run(input, config)
            .await
    }

    fn calculate_quality_metrics(&self, input: &ClusteringInput, _output: &ClusteringOutput) -> QualityMetrics {
        sample_quality(&input.features, &input.data, MIN_CLUSTERS * POINTS_PER_CLUSTER)
    }

    fn identify_warnings(
        &self,
        input: &ClusteringInput,
        config: &ClusteringConfig,
        quality: &QualityMetrics,
    ) -> Vec<AnalyticsWarning> {
        let mut warnings = quality_warnings(quality);
        if input.data.len() < config.cluster_count * POINTS_PER_CLUSTER {
            warnings.push(AnalyticsWarning::new(
                WarningLevel::Warning,
                format!(
                    "{} points for {} clusters leaves clusters sparsely populated",
                    input.data.len(),
                    config.cluster_count
                ),
                "Reduce the cluster count or add data points.",
            ));
        }
        warnings
    }

    /// 3s scaled by points per 1000, features per 2, and clusters per 5;
    /// hierarchical costs 2x.
    fn estimate_execution_time(&self, input: &ClusteringInput, config: &ClusteringConfig) -> Duration {
        let algorithm = match config.algorithm {
            ClusteringAlgorithm::KMeans => 1.0,
            ClusteringAlgorithm::Hierarchical => 2.0,
        };
        Duration::from_secs_f64(
            3.0 * scale(input.data.len(), 1000.0)
                * scale(input.features.len(), 2.0)
                * scale(config.cluster_count, 5.0)
                * algorithm,
        )
    }
}
