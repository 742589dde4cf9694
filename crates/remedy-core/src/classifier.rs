//! Fault classification
//!
//! Maps raw health evidence into a typed, severity-tagged [`Fault`]:
//! - Per-metric rule table decides the fault kind and threshold
//! - `value / threshold` picks the base severity tier
//! - Trend over recent samples nudges the tier by at most one step
//!
//! Classification is deterministic: the same observation always yields the
//! same kind, severity and confidence.

use crate::error::ConfigError;
use crate::types::{
    ComponentHealth, ComponentId, Evidence, Fault, FaultId, FaultKind, FaultSource, MetricMap,
    Severity, Trend,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const EPSILON: f64 = 1e-9;

/// Rule for one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierRule {
    /// Fault kind raised when this metric dominates
    pub kind: FaultKind,
    /// Reference value; severity is derived from `value / threshold`
    pub threshold: f64,
}

impl ClassifierRule {
    /// Create a rule
    #[inline]
    #[must_use]
    pub fn new(kind: FaultKind, threshold: f64) -> Self {
        Self { kind, threshold }
    }
}

/// Ratio bands mapping `value / threshold` to a severity tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityBands {
    /// Ratio at or above which the tier is Critical
    pub critical_ratio: f64,
    /// Ratio at or above which the tier is Failed
    pub failed_ratio: f64,
}

impl SeverityBands {
    /// Base tier for a ratio. Monotonic in `ratio`.
    #[inline]
    #[must_use]
    pub fn severity_for(&self, ratio: f64) -> Severity {
        if ratio >= self.failed_ratio {
            Severity::Failed
        } else if ratio >= self.critical_ratio {
            Severity::Critical
        } else {
            Severity::Degraded
        }
    }
}

impl Default for SeverityBands {
    fn default() -> Self {
        Self {
            critical_ratio: 1.0,
            failed_ratio: 1.5,
        }
    }
}

/// Trend detection tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    /// Minimum samples before a trend is computed
    pub min_samples: usize,
    /// Relative change below which the metric is stable
    pub stable_band: f64,
    /// Relative change above which the metric is volatile
    pub volatile_band: f64,
    /// Confidence for stable, increasing and decreasing trends
    pub base_confidence: f64,
    /// Confidence when the metric is volatile
    pub volatile_confidence: f64,
    /// Confidence when there is not enough history
    pub insufficient_confidence: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            min_samples: 4,
            stable_band: 0.05,
            volatile_band: 0.20,
            base_confidence: 0.7,
            volatile_confidence: 0.95,
            insufficient_confidence: 0.5,
        }
    }
}

/// Classifier configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Metric name to rule
    #[serde(default = "default_rules")]
    pub rules: BTreeMap<String, ClassifierRule>,
    /// Severity bands
    #[serde(default)]
    pub bands: SeverityBands,
    /// Trend tuning
    #[serde(default)]
    pub trend: TrendConfig,
}

impl ClassifierConfig {
    /// With an extra or replaced rule
    #[inline]
    #[must_use]
    pub fn with_rule(mut self, metric: impl Into<String>, rule: ClassifierRule) -> Self {
        self.rules.insert(metric.into(), rule);
        self
    }

    /// Check the tuning values are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (metric, rule) in &self.rules {
            if !rule.threshold.is_finite() || rule.threshold <= 0.0 {
                return Err(ConfigError::invalid(
                    format!("classifier.rules.{metric}.threshold"),
                    "must be a positive finite number",
                ));
            }
        }

        let bands = &self.bands;
        if !(bands.critical_ratio.is_finite() && bands.failed_ratio.is_finite())
            || bands.critical_ratio <= 0.0
            || bands.critical_ratio > bands.failed_ratio
        {
            return Err(ConfigError::invalid(
                "classifier.bands",
                "expected 0 < critical_ratio <= failed_ratio",
            ));
        }

        let trend = &self.trend;
        if trend.min_samples < 2 {
            return Err(ConfigError::invalid(
                "classifier.trend.min_samples",
                "must be at least 2",
            ));
        }
        if !(0.0..=trend.volatile_band).contains(&trend.stable_band) {
            return Err(ConfigError::invalid(
                "classifier.trend",
                "expected 0 <= stable_band <= volatile_band",
            ));
        }
        for (field, value) in [
            ("base_confidence", trend.base_confidence),
            ("volatile_confidence", trend.volatile_confidence),
            ("insufficient_confidence", trend.insufficient_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::invalid(
                    format!("classifier.trend.{field}"),
                    "must be within 0.0..=1.0",
                ));
            }
        }
        Ok(())
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            bands: SeverityBands::default(),
            trend: TrendConfig::default(),
        }
    }
}

fn default_rules() -> BTreeMap<String, ClassifierRule> {
    use FaultKind::{
        ConfigurationError, ConnectivityFailure, DependencyFailure, PerformanceDegradation,
        ResourceExhaustion, SecurityVulnerability,
    };

    [
        ("cpu_usage", ResourceExhaustion, 90.0),
        ("memory_usage", ResourceExhaustion, 90.0),
        ("disk_usage", ResourceExhaustion, 90.0),
        ("latency_ms", PerformanceDegradation, 1000.0),
        ("error_rate", PerformanceDegradation, 0.05),
        ("packet_loss", ConnectivityFailure, 5.0),
        ("config_errors", ConfigurationError, 1.0),
        ("dependency_failures", DependencyFailure, 1.0),
        ("open_vulnerabilities", SecurityVulnerability, 1.0),
    ]
    .into_iter()
    .map(|(metric, kind, threshold)| (metric.to_string(), ClassifierRule::new(kind, threshold)))
    .collect()
}

/// Raw input to classification
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Observed component
    pub component: ComponentId,
    /// Tier computed by the monitor
    pub health: ComponentHealth,
    /// Latest metric snapshot
    pub metrics: MetricMap,
    /// Recent values per metric, oldest first, including the latest
    pub history: BTreeMap<String, Vec<f64>>,
    /// Set when sampling failed
    pub sample_error: Option<String>,
}

impl Observation {
    /// Observation of a successful sample
    #[inline]
    #[must_use]
    pub fn sampled(component: ComponentId, health: ComponentHealth, metrics: MetricMap) -> Self {
        Self {
            component,
            health,
            metrics,
            history: BTreeMap::new(),
            sample_error: None,
        }
    }

    /// Observation of a failed sample
    #[inline]
    #[must_use]
    pub fn sampling_failed(component: ComponentId, error: impl Into<String>) -> Self {
        Self {
            component,
            health: ComponentHealth::Failed,
            metrics: MetricMap::new(),
            history: BTreeMap::new(),
            sample_error: Some(error.into()),
        }
    }

    /// With metric history
    #[inline]
    #[must_use]
    pub fn with_history(mut self, history: BTreeMap<String, Vec<f64>>) -> Self {
        self.history = history;
        self
    }
}

/// Deterministic rule-table classifier
#[derive(Debug, Clone, Default)]
pub struct FaultClassifier {
    config: ClassifierConfig,
}

impl FaultClassifier {
    /// Create classifier from config
    #[inline]
    #[must_use]
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Get configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classify an observation into a monitor-sourced fault
    #[must_use]
    pub fn classify(&self, observation: Observation) -> Fault {
        let Observation {
            component,
            health,
            metrics,
            history,
            sample_error,
        } = observation;

        if let Some(error) = sample_error {
            let evidence = Evidence {
                sample_error: Some(error),
                ..Evidence::snapshot(metrics)
            };
            return build_fault(
                component,
                FaultKind::ConnectivityFailure,
                Severity::Failed,
                evidence,
            );
        }

        let Some((metric, rule, ratio)) = self.dominant(&metrics) else {
            let kind = FaultKind::Custom(format!(
                "unclassified anomaly: {health} with no matching classifier rule"
            ));
            let evidence = Evidence {
                confidence: self.config.trend.insufficient_confidence,
                ..Evidence::snapshot(metrics)
            };
            return build_fault(component, kind, Severity::from_health(health), evidence);
        };

        let base = self.config.bands.severity_for(ratio);
        let trend = history
            .get(metric)
            .map_or(Trend::Insufficient, |values| self.trend(values));
        let severity = match trend {
            Trend::Increasing => base.escalate(),
            Trend::Decreasing => base.deescalate(),
            Trend::Stable | Trend::Volatile | Trend::Insufficient => base,
        };

        tracing::debug!(
            component = %component,
            metric,
            ratio,
            ?trend,
            ?base,
            ?severity,
            "classified observation"
        );

        let evidence = Evidence {
            dominant_metric: Some(metric.to_string()),
            ratio: Some(ratio),
            trend,
            confidence: self.confidence(trend),
            ..Evidence::snapshot(metrics)
        };
        build_fault(component, rule.kind.clone(), severity, evidence)
    }

    /// Metric with the highest `value / threshold` among ruled metrics
    fn dominant<'a>(&'a self, metrics: &MetricMap) -> Option<(&'a str, &'a ClassifierRule, f64)> {
        let mut best: Option<(&str, &ClassifierRule, f64)> = None;
        for (name, rule) in &self.config.rules {
            let Some(value) = metrics.get(name).copied().filter(|v| v.is_finite()) else {
                continue;
            };
            let ratio = value / rule.threshold;
            if best.map_or(true, |(_, _, current)| ratio > current) {
                best = Some((name.as_str(), rule, ratio));
            }
        }
        best
    }

    /// Compare the mean of the first half of `values` with the second half
    #[must_use]
    pub fn trend(&self, values: &[f64]) -> Trend {
        let cfg = &self.config.trend;
        if values.len() < cfg.min_samples {
            return Trend::Insufficient;
        }

        let half = values.len() / 2;
        let first = mean(&values[..half]);
        let second = mean(&values[values.len() - half..]);

        if first.abs() < EPSILON {
            return if second.abs() < EPSILON {
                Trend::Stable
            } else {
                Trend::Volatile
            };
        }

        let change = (second - first) / first.abs();
        if change.abs() < cfg.stable_band {
            Trend::Stable
        } else if change.abs() > cfg.volatile_band {
            Trend::Volatile
        } else if change > 0.0 {
            Trend::Increasing
        } else {
            Trend::Decreasing
        }
    }

    fn confidence(&self, trend: Trend) -> f64 {
        let cfg = &self.config.trend;
        match trend {
            Trend::Volatile => cfg.volatile_confidence,
            Trend::Insufficient => cfg.insufficient_confidence,
            Trend::Stable | Trend::Increasing | Trend::Decreasing => cfg.base_confidence,
        }
    }
}

fn build_fault(
    component: ComponentId,
    kind: FaultKind,
    severity: Severity,
    evidence: Evidence,
) -> Fault {
    Fault {
        id: FaultId::new(),
        component,
        kind,
        severity,
        evidence,
        source: FaultSource::Monitor,
        created_at: Utc::now(),
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
