//! Engine configuration
//!
//! Everything tunable lives here and loads from TOML:
//! - Admission limit, retry policy and per-strategy timeouts
//! - Monitor cadence and the per-component threshold table
//! - Classifier and planner tables
//!
//! Durations are plain milliseconds so the file format stays obvious.

use crate::classifier::ClassifierConfig;
use crate::error::ConfigError;
use crate::planner::PlannerConfig;
use crate::types::{Component, ComponentHealth, ComponentId, MetricMap, RecoveryStrategy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Upper bounds for one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricThreshold {
    /// Value at or above which the metric is Degraded
    pub degraded: f64,
    /// Value at or above which the metric is Critical
    pub critical: f64,
    /// Value at or above which the metric is Failed
    pub failed: f64,
}

impl MetricThreshold {
    /// Create threshold
    #[inline]
    #[must_use]
    pub fn new(degraded: f64, critical: f64, failed: f64) -> Self {
        Self {
            degraded,
            critical,
            failed,
        }
    }

    /// Tier of a single value
    #[inline]
    #[must_use]
    pub fn evaluate(&self, value: f64) -> ComponentHealth {
        if value >= self.failed {
            ComponentHealth::Failed
        } else if value >= self.critical {
            ComponentHealth::Critical
        } else if value >= self.degraded {
            ComponentHealth::Degraded
        } else {
            ComponentHealth::Healthy
        }
    }

    fn is_ordered(&self) -> bool {
        [self.degraded, self.critical, self.failed]
            .iter()
            .all(|v| v.is_finite())
            && self.degraded <= self.critical
            && self.critical <= self.failed
    }
}

/// Per-metric thresholds with per-component overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdTable {
    /// Applies to every component
    #[serde(default = "default_thresholds")]
    pub defaults: BTreeMap<String, MetricThreshold>,
    /// Component id to metric overrides
    #[serde(default)]
    pub overrides: BTreeMap<ComponentId, BTreeMap<String, MetricThreshold>>,
}

impl ThresholdTable {
    /// Threshold in effect for a component's metric
    #[must_use]
    pub fn lookup(&self, component: &ComponentId, metric: &str) -> Option<&MetricThreshold> {
        self.overrides
            .get(component)
            .and_then(|m| m.get(metric))
            .or_else(|| self.defaults.get(metric))
    }

    /// Worst tier across all metrics that have a threshold. Non-finite
    /// values count as Failed; metrics without thresholds are ignored.
    #[must_use]
    pub fn evaluate(&self, component: &ComponentId, metrics: &MetricMap) -> ComponentHealth {
        metrics
            .iter()
            .filter_map(|(name, value)| {
                self.lookup(component, name).map(|t| {
                    if value.is_finite() {
                        t.evaluate(*value)
                    } else {
                        ComponentHealth::Failed
                    }
                })
            })
            .fold(ComponentHealth::Healthy, ComponentHealth::worst)
    }

    /// With a default threshold
    #[inline]
    #[must_use]
    pub fn with_default(mut self, metric: impl Into<String>, threshold: MetricThreshold) -> Self {
        self.defaults.insert(metric.into(), threshold);
        self
    }

    /// With a component override
    #[inline]
    #[must_use]
    pub fn with_override(
        mut self,
        component: impl Into<ComponentId>,
        metric: impl Into<String>,
        threshold: MetricThreshold,
    ) -> Self {
        self.overrides
            .entry(component.into())
            .or_default()
            .insert(metric.into(), threshold);
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let all = self
            .defaults
            .iter()
            .chain(self.overrides.values().flat_map(|m| m.iter()));
        for (metric, threshold) in all {
            if !threshold.is_ordered() {
                return Err(ConfigError::UnorderedThresholds {
                    metric: metric.clone(),
                });
            }
        }
        Ok(())
    }
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self {
            defaults: default_thresholds(),
            overrides: BTreeMap::new(),
        }
    }
}

fn default_thresholds() -> BTreeMap<String, MetricThreshold> {
    [
        ("cpu_usage", MetricThreshold::new(75.0, 90.0, 98.0)),
        ("memory_usage", MetricThreshold::new(75.0, 90.0, 98.0)),
        ("disk_usage", MetricThreshold::new(80.0, 90.0, 98.0)),
        ("latency_ms", MetricThreshold::new(500.0, 1000.0, 5000.0)),
        ("error_rate", MetricThreshold::new(0.01, 0.05, 0.25)),
        ("packet_loss", MetricThreshold::new(1.0, 5.0, 25.0)),
    ]
    .into_iter()
    .map(|(metric, threshold)| (metric.to_string(), threshold))
    .collect()
}

/// Retry policy for retryable strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts of the planned strategy before downgrading to Notify
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Cap on any single backoff delay
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (0 for the first retry):
    /// `base_delay * 2^retry`, capped at `max_delay`
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        let millis = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(millis)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

/// Per-attempt execution ceilings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyTimeouts {
    /// Ceiling for strategies without an override
    pub default_ms: u64,
    /// Strategy-specific ceilings
    pub per_strategy: BTreeMap<RecoveryStrategy, u64>,
}

impl StrategyTimeouts {
    /// Ceiling for a strategy
    #[inline]
    #[must_use]
    pub fn for_strategy(&self, strategy: RecoveryStrategy) -> Duration {
        Duration::from_millis(
            self.per_strategy
                .get(&strategy)
                .copied()
                .unwrap_or(self.default_ms),
        )
    }
}

impl Default for StrategyTimeouts {
    fn default() -> Self {
        Self {
            default_ms: 5 * 60 * 1_000,
            per_strategy: BTreeMap::new(),
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum concurrent remediations (K)
    pub max_concurrent: usize,
    /// Monitor tick interval
    pub monitor_interval_ms: u64,
    /// Ceiling for one metrics sample
    pub sample_timeout_ms: u64,
    /// Samples kept per metric for trend detection
    pub history_window: usize,
    /// Backlog length that triggers a capacity warning
    pub backlog_watermark: usize,
    /// Capacity of the monitor to scheduler channel
    pub intake_capacity: usize,
    /// Time an executor gets to honour cancellation before it is abandoned
    pub cancel_grace_ms: u64,
    /// Skip monitor faults for components that already have an open fault
    pub suppress_duplicate_faults: bool,
    /// Deliver every recorded action to the notification sink
    pub notify_all_outcomes: bool,
    /// Retry policy
    pub retry: RetryPolicy,
    /// Per-attempt timeouts
    pub timeouts: StrategyTimeouts,
    /// Monitor thresholds
    pub thresholds: ThresholdTable,
    /// Classifier tables
    pub classifier: ClassifierConfig,
    /// Planner tables
    pub planner: PlannerConfig,
    /// Components registered at construction
    pub components: Vec<Component>,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// With max concurrent remediations
    #[inline]
    #[must_use]
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// With default attempt timeout
    #[inline]
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.default_ms = duration_ms(timeout);
        self
    }

    /// With timeout for one strategy
    #[inline]
    #[must_use]
    pub fn with_strategy_timeout(mut self, strategy: RecoveryStrategy, timeout: Duration) -> Self {
        self.timeouts.per_strategy.insert(strategy, duration_ms(timeout));
        self
    }

    /// With monitor interval
    #[inline]
    #[must_use]
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval_ms = duration_ms(interval);
        self
    }

    /// With cancellation grace period
    #[inline]
    #[must_use]
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace_ms = duration_ms(grace);
        self
    }

    /// With backlog watermark
    #[inline]
    #[must_use]
    pub fn with_backlog_watermark(mut self, watermark: usize) -> Self {
        self.backlog_watermark = watermark;
        self
    }

    /// With threshold table
    #[inline]
    #[must_use]
    pub fn with_thresholds(mut self, thresholds: ThresholdTable) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// With a component
    #[inline]
    #[must_use]
    pub fn with_component(mut self, component: Component) -> Self {
        self.components.push(component);
        self
    }

    /// Monitor interval
    #[inline]
    #[must_use]
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    /// Sample timeout
    #[inline]
    #[must_use]
    pub fn sample_timeout(&self) -> Duration {
        Duration::from_millis(self.sample_timeout_ms)
    }

    /// Cancellation grace period
    #[inline]
    #[must_use]
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::invalid("max_concurrent", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::invalid(
                "retry",
                "base_delay_ms must not exceed max_delay_ms",
            ));
        }
        for (field, value) in [
            ("monitor_interval_ms", self.monitor_interval_ms),
            ("sample_timeout_ms", self.sample_timeout_ms),
            ("timeouts.default_ms", self.timeouts.default_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }
        if let Some((strategy, _)) = self.timeouts.per_strategy.iter().find(|(_, ms)| **ms == 0) {
            return Err(ConfigError::invalid(
                format!("timeouts.per_strategy.{strategy}"),
                "must be greater than zero",
            ));
        }
        if self.history_window == 0 {
            return Err(ConfigError::invalid("history_window", "must be at least 1"));
        }
        if self.intake_capacity == 0 {
            return Err(ConfigError::invalid("intake_capacity", "must be at least 1"));
        }

        let mut seen = HashSet::new();
        for component in &self.components {
            if !seen.insert(&component.id) {
                return Err(ConfigError::DuplicateComponent(component.id.to_string()));
            }
        }

        self.thresholds.validate()?;
        self.classifier.validate()?;
        self.planner.validate()?;
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            monitor_interval_ms: 30_000,
            sample_timeout_ms: 10_000,
            history_window: 10,
            backlog_watermark: 100,
            intake_capacity: 256,
            cancel_grace_ms: 5_000,
            suppress_duplicate_faults: true,
            notify_all_outcomes: false,
            retry: RetryPolicy::default(),
            timeouts: StrategyTimeouts::default(),
            thresholds: ThresholdTable::default(),
            classifier: ClassifierConfig::default(),
            planner: PlannerConfig::default(),
            components: Vec::new(),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_concurrent, 3);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(
            config.timeouts.for_strategy(RecoveryStrategy::Restart),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 350,
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(350));
        assert_eq!(policy.backoff(80), Duration::from_millis(350));
    }

    #[test]
    fn threshold_table_uses_overrides_then_defaults() {
        let table = ThresholdTable::default().with_override(
            "batch",
            "cpu_usage",
            MetricThreshold::new(95.0, 99.0, 100.0),
        );
        let metrics: MetricMap = [("cpu_usage".to_string(), 92.0)].into_iter().collect();

        assert_eq!(table.evaluate(&"api".into(), &metrics), ComponentHealth::Critical);
        assert_eq!(table.evaluate(&"batch".into(), &metrics), ComponentHealth::Healthy);
    }

    #[test]
    fn worst_metric_wins_and_unknown_metrics_ignored() {
        let table = ThresholdTable::default();
        let metrics: MetricMap = [
            ("cpu_usage".to_string(), 80.0),
            ("latency_ms".to_string(), 6000.0),
            ("goroutines".to_string(), 1e9),
        ]
        .into_iter()
        .collect();
        assert_eq!(table.evaluate(&"api".into(), &metrics), ComponentHealth::Failed);

        let nan: MetricMap = [("cpu_usage".to_string(), f64::NAN)].into_iter().collect();
        assert_eq!(table.evaluate(&"api".into(), &nan), ComponentHealth::Failed);
    }

    #[test]
    fn parses_toml() {
        let source = r#"
            max_concurrent = 5
            monitor_interval_ms = 1000

            [retry]
            max_attempts = 4
            base_delay_ms = 250

            [timeouts]
            default_ms = 60000
            per_strategy = { Failover = 120000 }

            [thresholds.defaults.queue_depth]
            degraded = 100.0
            critical = 500.0
            failed = 1000.0

            [[components]]
            id = "api"
            name = "API gateway"

            [[planner.keyword_rules]]
            keyword = "oom"
            strategy = "Restart"
        "#;

        let config = EngineConfig::from_toml_str(source).unwrap();
        assert_eq!(config.max_concurrent, 5);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.max_delay_ms, 60_000);
        assert_eq!(
            config.timeouts.for_strategy(RecoveryStrategy::Failover),
            Duration::from_secs(120)
        );
        assert_eq!(
            config.timeouts.for_strategy(RecoveryStrategy::Restart),
            Duration::from_secs(60)
        );
        assert!(config.thresholds.defaults.contains_key("queue_depth"));
        assert_eq!(config.components[0].id, ComponentId::new("api"));
        assert_eq!(config.planner.keyword_rules.len(), 1);
        assert!(!config.classifier.rules.is_empty());
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(EngineConfig::new().with_max_concurrent(0).validate().is_err());

        let unordered = EngineConfig::new().with_thresholds(
            ThresholdTable::default().with_default("cpu_usage", MetricThreshold::new(90.0, 80.0, 99.0)),
        );
        assert!(matches!(
            unordered.validate(),
            Err(ConfigError::UnorderedThresholds { .. })
        ));

        let duplicate = EngineConfig::new()
            .with_component(Component::new("api", "API"))
            .with_component(Component::new("api", "API again"));
        assert!(matches!(
            duplicate.validate(),
            Err(ConfigError::DuplicateComponent(_))
        ));

        assert!(EngineConfig::from_toml_str("max_concurrent = \"three\"").is_err());
    }

    #[test]
    fn reads_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remedy.toml");
        std::fs::write(&path, "max_concurrent = 2\n").unwrap();

        let config = EngineConfig::from_path(&path).unwrap();
        assert_eq!(config.max_concurrent, 2);

        let missing = EngineConfig::from_path(dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
