//! Concrete analytics engines and the pieces they share.
//!
//! Each engine owns an [`AlgorithmRegistry`] keyed by the method named in
//! its configuration. Every method starts out bound to [`Placeholder`],
//! which returns an empty, well-formed output; real algorithms are plugged
//! in with the engine's `with_algorithm`.

pub mod anomaly;
pub mod clustering;
pub mod correlation;
pub mod impact;
pub mod predictive;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AnalyticsWarning, QualityMetrics, WarningLevel};

pub use anomaly::AnomalyEngine;
pub use clustering::ClusteringEngine;
pub use correlation::CorrelationEngine;
pub use impact::ImpactEngine;
pub use predictive::PredictiveEngine;

/// One observation: named numeric values at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<String, f64>,
}

#[async_trait]
pub trait Algorithm<I, C, O>: Send + Sync {
    async fn run(&self, input: &I, config: &C) -> Result<O>;
}

/// Returns `O::default()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Placeholder;

#[async_trait]
impl<I, C, O> Algorithm<I, C, O> for Placeholder
where
    I: Sync + 'static,
    C: Sync + 'static,
    O: Default + Send + 'static,
{
    async fn run(&self, _input: &I, _config: &C) -> Result<O> {
        Ok(O::default())
    }
}

pub struct AlgorithmRegistry<I, C, O> {
    algorithms: HashMap<String, Arc<dyn Algorithm<I, C, O>>>,
}

impl<I, C, O> AlgorithmRegistry<I, C, O>
where
    I: Sync + 'static,
    C: Sync + 'static,
    O: Default + Send + 'static,
{
    /// A registry with [`Placeholder`] bound to each of `methods`.
    pub fn with_placeholders(methods: &[&str]) -> Self {
        let algorithms = methods
            .iter()
            .map(|m| (m.to_string(), Arc::new(Placeholder) as Arc<dyn Algorithm<I, C, O>>))
            .collect();
        Self { algorithms }
    }
}

impl<I, C, O> AlgorithmRegistry<I, C, O> {
    pub fn register(&mut self, method: impl Into<String>, algorithm: Arc<dyn Algorithm<I, C, O>>) {
        self.algorithms.insert(method.into(), algorithm);
    }

    pub fn select(&self, method: &str) -> Result<Arc<dyn Algorithm<I, C, O>>> {
        self.algorithms
            .get(method)
            .cloned()
            .ok_or_else(|| anyhow!("no algorithm registered for method '{method}'"))
    }
}

// ============ Shared validation ============

pub(crate) fn require_count(what: &str, actual: usize, min: usize) -> Result<(), String> {
    if actual < min {
        return Err(format!("at least {min} {what} required, got {actual}"));
    }
    Ok(())
}

/// Every named variable must have at least one finite value in `data`.
pub(crate) fn require_observed(variables: &[String], data: &[DataPoint]) -> Result<(), String> {
    for variable in variables {
        let observed = data
            .iter()
            .any(|p| p.values.get(variable).is_some_and(|v| v.is_finite()));
        if !observed {
            return Err(format!("variable '{variable}' has no values"));
        }
    }
    Ok(())
}

// ============ Shared quality policy ============

/// Fraction of (point, variable) cells holding a finite value.
pub(crate) fn coverage(variables: &[String], data: &[DataPoint]) -> f64 {
    let expected = variables.len() * data.len();
    if expected == 0 {
        return 0.0;
    }
    let present = data
        .iter()
        .map(|p| {
            variables
                .iter()
                .filter(|v| p.values.get(*v).is_some_and(|x| x.is_finite()))
                .count()
        })
        .sum::<usize>();
    present as f64 / expected as f64
}

/// Data-driven quality: completeness is cell coverage, accuracy grows with
/// sample size until `5 * min_points`, reliability blends the two.
pub(crate) fn sample_quality(variables: &[String], data: &[DataPoint], min_points: usize) -> QualityMetrics {
    let completeness = coverage(variables, data);
    let accuracy = (data.len() as f64 / (5 * min_points.max(1)) as f64).min(1.0);
    QualityMetrics {
        completeness,
        accuracy,
        reliability: 0.5 + 0.5 * completeness * accuracy,
        significance: None,
    }
}

/// Warnings every data-driven engine raises.
pub(crate) fn quality_warnings(quality: &QualityMetrics) -> Vec<AnalyticsWarning> {
    let mut warnings = Vec::new();
    if quality.completeness < 0.5 {
        warnings.push(AnalyticsWarning::new(
            WarningLevel::Error,
            format!("only {:.0}% of values are present", quality.completeness * 100.0),
            "Fill gaps in the source data before relying on this result.",
        ));
    } else if quality.completeness < 0.9 {
        warnings.push(AnalyticsWarning::new(
            WarningLevel::Warning,
            format!("{:.0}% of values are missing", (1.0 - quality.completeness) * 100.0),
            "Check the data collection for gaps.",
        ));
    }
    if quality.accuracy < 0.5 {
        warnings.push(AnalyticsWarning::new(
            WarningLevel::Info,
            "small sample size",
            "Collect more data points to tighten the estimate.",
        ));
    }
    warnings
}

/// `max(1, n / unit)`: a complexity multiplier that never shrinks the base.
pub(crate) fn scale(n: usize, unit: f64) -> f64 {
    (n as f64 / unit).max(1.0)
}
