//! Core types for Remedy
//!
//! Defines the fundamental domain vocabulary:
//! - Components and their health tiers
//! - Faults, fault kinds and severity
//! - Recovery strategies
//! - Healing actions (audit records)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use ulid::Ulid;

/// Metric name to sampled value. Ordered so serialized snapshots are stable.
pub type MetricMap = BTreeMap<String, f64>;

/// Component identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(pub String);

impl ComponentId {
    /// Create a component id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as str
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ComponentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ComponentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A monitored component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    /// Identifier referenced everywhere else
    pub id: ComponentId,
    /// Logical display name
    pub name: String,
}

impl Component {
    /// Create a component
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<ComponentId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Unique fault identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FaultId(pub Ulid);

impl FaultId {
    /// Generate new fault ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for FaultId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FaultId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique healing action identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActionId(pub Ulid);

impl ActionId {
    /// Generate new action ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single metrics sample for one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    /// Sampled component
    pub component: ComponentId,
    /// When the sample was taken
    pub timestamp: DateTime<Utc>,
    /// Raw metric values
    pub metrics: MetricMap,
}

impl HealthSample {
    /// Create sample stamped now
    #[inline]
    #[must_use]
    pub fn now(component: ComponentId, metrics: MetricMap) -> Self {
        Self {
            component,
            timestamp: Utc::now(),
            metrics,
        }
    }
}

/// Health tier of a component
///
/// Ordered by severity: Healthy < Degraded < Critical < Failed.
/// `Recovering` is an overlay reported while remediation is in flight and
/// ranks with the tier it overlays, so it is never used for aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentHealth {
    /// All metrics within bounds
    Healthy,
    /// At least one metric past its degraded bound
    Degraded,
    /// At least one metric past its critical bound
    Critical,
    /// Past the failed bound, or sampling failed
    Failed,
    /// Remediation in flight
    Recovering,
}

impl ComponentHealth {
    /// Severity rank used for ordering and aggregation
    #[inline]
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            ComponentHealth::Healthy | ComponentHealth::Recovering => 0,
            ComponentHealth::Degraded => 1,
            ComponentHealth::Critical => 2,
            ComponentHealth::Failed => 3,
        }
    }

    /// Return the more severe of two tiers
    #[inline]
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }

    /// Whether this tier triggers a fault
    #[inline]
    #[must_use]
    pub fn needs_remediation(self) -> bool {
        matches!(self, ComponentHealth::Critical | ComponentHealth::Failed)
    }

    /// Aggregate a set of tiers into system health
    #[must_use]
    pub fn aggregate<I: IntoIterator<Item = ComponentHealth>>(tiers: I) -> Self {
        tiers
            .into_iter()
            .fold(ComponentHealth::Healthy, ComponentHealth::worst)
    }
}

impl std::fmt::Display for ComponentHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ComponentHealth::Healthy => "healthy",
            ComponentHealth::Degraded => "degraded",
            ComponentHealth::Critical => "critical",
            ComponentHealth::Failed => "failed",
            ComponentHealth::Recovering => "recovering",
        };
        f.write_str(s)
    }
}

impl From<Severity> for ComponentHealth {
    fn from(value: Severity) -> Self {
        match value {
            Severity::Degraded => ComponentHealth::Degraded,
            Severity::Critical => ComponentHealth::Critical,
            Severity::Failed => ComponentHealth::Failed,
        }
    }
}

/// Fault severity tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Lowest tier a fault can carry
    Degraded,
    /// Needs prompt remediation
    Critical,
    /// Component is down
    Failed,
}

impl Severity {
    /// One tier up, capped at Failed
    #[inline]
    #[must_use]
    pub fn escalate(self) -> Self {
        match self {
            Severity::Degraded => Severity::Critical,
            Severity::Critical | Severity::Failed => Severity::Failed,
        }
    }

    /// One tier down, floored at Degraded
    #[inline]
    #[must_use]
    pub fn deescalate(self) -> Self {
        match self {
            Severity::Failed => Severity::Critical,
            Severity::Critical | Severity::Degraded => Severity::Degraded,
        }
    }

    /// Map a health tier to a fault severity (Healthy floors to Degraded)
    #[inline]
    #[must_use]
    pub fn from_health(health: ComponentHealth) -> Self {
        match health {
            ComponentHealth::Failed => Severity::Failed,
            ComponentHealth::Critical => Severity::Critical,
            _ => Severity::Degraded,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        ComponentHealth::from(*self).fmt(f)
    }
}

/// Kind of fault
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "description")]
pub enum FaultKind {
    /// CPU, memory, disk or handle exhaustion
    ResourceExhaustion,
    /// Latency or throughput regression
    PerformanceDegradation,
    /// Unreachable peer or failed sampling
    ConnectivityFailure,
    /// Invalid or drifted configuration
    ConfigurationError,
    /// Upstream/downstream dependency failure
    DependencyFailure,
    /// Known vulnerability detected
    SecurityVulnerability,
    /// Anything else, described in free text
    Custom(String),
}

impl FaultKind {
    /// Short stable label for logs and metadata
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            FaultKind::ResourceExhaustion => "resource_exhaustion",
            FaultKind::PerformanceDegradation => "performance_degradation",
            FaultKind::ConnectivityFailure => "connectivity_failure",
            FaultKind::ConfigurationError => "configuration_error",
            FaultKind::DependencyFailure => "dependency_failure",
            FaultKind::SecurityVulnerability => "security_vulnerability",
            FaultKind::Custom(_) => "custom",
        }
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FaultKind::Custom(desc) => write!(f, "custom({desc})"),
            other => f.write_str(other.label()),
        }
    }
}

/// Direction of a metric over its recent history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trend {
    /// Not enough samples to judge
    Insufficient,
    /// Relative change under the stable band
    Stable,
    /// Rising between the stable and volatile bands
    Increasing,
    /// Falling between the stable and volatile bands
    Decreasing,
    /// Swinging past the volatile band
    Volatile,
}

/// Where a fault came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultSource {
    /// Synthesized by the health monitor
    Monitor,
    /// Requested through `heal_component`
    Manual,
    /// Reported by an external detector
    External,
}

/// Evidence attached to a fault
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Raw metric snapshot at detection time
    pub metrics: MetricMap,
    /// Metric that drove the classification
    pub dominant_metric: Option<String>,
    /// Dominant value divided by its rule threshold
    pub ratio: Option<f64>,
    /// Trend of the dominant metric
    pub trend: Trend,
    /// Classification confidence (0.0 - 1.0)
    pub confidence: f64,
    /// Sampling failure message, if the sample could not be taken
    pub sample_error: Option<String>,
}

impl Evidence {
    /// Evidence with only a metric snapshot
    #[inline]
    #[must_use]
    pub fn snapshot(metrics: MetricMap) -> Self {
        Self {
            metrics,
            dominant_metric: None,
            ratio: None,
            trend: Trend::Insufficient,
            confidence: 1.0,
            sample_error: None,
        }
    }
}

impl Default for Evidence {
    fn default() -> Self {
        Self::snapshot(MetricMap::new())
    }
}

/// A classified, severity-tagged anomaly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    /// Fault identifier
    pub id: FaultId,
    /// Affected component
    pub component: ComponentId,
    /// Fault kind
    pub kind: FaultKind,
    /// Severity tier
    pub severity: Severity,
    /// Supporting evidence
    pub evidence: Evidence,
    /// Origin of the fault
    pub source: FaultSource,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Fault {
    /// Create an externally reported fault with empty evidence
    #[inline]
    #[must_use]
    pub fn new(component: impl Into<ComponentId>, kind: FaultKind, severity: Severity) -> Self {
        Self {
            id: FaultId::new(),
            component: component.into(),
            kind,
            severity,
            evidence: Evidence::default(),
            source: FaultSource::External,
            created_at: Utc::now(),
        }
    }

    /// With evidence
    #[inline]
    #[must_use]
    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence = evidence;
        self
    }

    /// With source
    #[inline]
    #[must_use]
    pub fn with_source(mut self, source: FaultSource) -> Self {
        self.source = source;
        self
    }
}

/// Category of remediation action
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecoveryStrategy {
    /// Restart the process or service
    Restart,
    /// Re-apply or repair configuration
    Reconfigure,
    /// Add capacity
    ScaleUp,
    /// Shift traffic to a replica
    Failover,
    /// Revert to the last known good release
    Rollback,
    /// Apply a security patch
    Patch,
    /// Cut the component off from the system
    Isolate,
    /// Escalate to an operator
    Notify,
}

impl RecoveryStrategy {
    /// All strategies
    pub const ALL: [RecoveryStrategy; 8] = [
        RecoveryStrategy::Restart,
        RecoveryStrategy::Reconfigure,
        RecoveryStrategy::ScaleUp,
        RecoveryStrategy::Failover,
        RecoveryStrategy::Rollback,
        RecoveryStrategy::Patch,
        RecoveryStrategy::Isolate,
        RecoveryStrategy::Notify,
    ];

    /// Whether failed attempts may be retried with backoff
    #[inline]
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            RecoveryStrategy::Restart | RecoveryStrategy::Reconfigure | RecoveryStrategy::ScaleUp
        )
    }

    /// Stable lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryStrategy::Restart => "restart",
            RecoveryStrategy::Reconfigure => "reconfigure",
            RecoveryStrategy::ScaleUp => "scale_up",
            RecoveryStrategy::Failover => "failover",
            RecoveryStrategy::Rollback => "rollback",
            RecoveryStrategy::Patch => "patch",
            RecoveryStrategy::Isolate => "isolate",
            RecoveryStrategy::Notify => "notify",
        }
    }
}

impl std::fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecoveryStrategy {
    type Err = crate::error::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        RecoveryStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == normalized || format!("{strategy:?}").eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| crate::error::ConfigError::UnknownStrategy(s.to_string()))
    }
}

/// Outcome of one remediation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionOutcome {
    /// Executor reported success
    Success,
    /// Executor reported failure, crashed, or was missing
    Failure,
    /// Attempt exceeded its ceiling
    Timeout,
    /// Engine stopped while the attempt was in flight
    Cancelled,
}

impl ActionOutcome {
    /// Whether the outcome counts as failure for retry purposes
    #[inline]
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(self, ActionOutcome::Failure | ActionOutcome::Timeout)
    }
}

/// Immutable record of one remediation attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealingAction {
    /// Action identifier
    pub id: ActionId,
    /// Fault this attempt belongs to
    pub fault_id: FaultId,
    /// Component the fault was raised for
    pub component: ComponentId,
    /// Strategy executed
    pub strategy: RecoveryStrategy,
    /// Attempt outcome
    pub outcome: ActionOutcome,
    /// Wall time spent in the attempt
    pub duration_ms: u64,
    /// 1-based attempt number across the whole fault
    pub attempt_number: u32,
    /// Completion time
    pub timestamp: DateTime<Utc>,
    /// Free-form detail (side effect, error, backoff)
    pub metadata: BTreeMap<String, String>,
}

impl HealingAction {
    /// Create a record stamped now
    #[must_use]
    pub fn new(
        fault: &Fault,
        strategy: RecoveryStrategy,
        outcome: ActionOutcome,
        attempt_number: u32,
        duration_ms: u64,
    ) -> Self {
        Self {
            id: ActionId::new(),
            fault_id: fault.id,
            component: fault.component.clone(),
            strategy,
            outcome,
            duration_ms,
            attempt_number,
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    /// Add a metadata entry
    #[inline]
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_rank_orders_by_severity() {
        assert!(ComponentHealth::Healthy.rank() < ComponentHealth::Degraded.rank());
        assert!(ComponentHealth::Degraded.rank() < ComponentHealth::Critical.rank());
        assert!(ComponentHealth::Critical.rank() < ComponentHealth::Failed.rank());
    }

    #[test]
    fn aggregate_takes_worst() {
        let system = ComponentHealth::aggregate([
            ComponentHealth::Degraded,
            ComponentHealth::Critical,
            ComponentHealth::Healthy,
        ]);
        assert_eq!(system, ComponentHealth::Critical);
        assert_eq!(ComponentHealth::aggregate([]), ComponentHealth::Healthy);
    }

    #[test]
    fn severity_escalation_is_bounded() {
        assert_eq!(Severity::Failed.escalate(), Severity::Failed);
        assert_eq!(Severity::Degraded.escalate(), Severity::Critical);
        assert_eq!(Severity::Degraded.deescalate(), Severity::Degraded);
        assert_eq!(Severity::Failed.deescalate(), Severity::Critical);
        assert!(Severity::Failed > Severity::Critical);
    }

    #[test]
    fn retryable_strategies() {
        let retryable: Vec<_> = RecoveryStrategy::ALL
            .into_iter()
            .filter(|s| s.is_retryable())
            .collect();
        assert_eq!(
            retryable,
            vec![
                RecoveryStrategy::Restart,
                RecoveryStrategy::Reconfigure,
                RecoveryStrategy::ScaleUp
            ]
        );
    }

    #[test]
    fn strategy_from_str_accepts_both_spellings() {
        assert_eq!("scale_up".parse::<RecoveryStrategy>().unwrap(), RecoveryStrategy::ScaleUp);
        assert_eq!("ScaleUp".parse::<RecoveryStrategy>().unwrap(), RecoveryStrategy::ScaleUp);
        assert_eq!("Failover".parse::<RecoveryStrategy>().unwrap(), RecoveryStrategy::Failover);
        assert!("reboot".parse::<RecoveryStrategy>().is_err());
    }

    #[test]
    fn fault_kind_serializes_tagged() {
        let kind = FaultKind::Custom("disk smart errors".into());
        let json = serde_json::to_string(&kind).unwrap();
        assert!(json.contains("\"kind\":\"Custom\""));
        let back: FaultKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, kind);
    }

    #[test]
    fn timeout_counts_as_failure() {
        assert!(ActionOutcome::Timeout.is_failure());
        assert!(ActionOutcome::Failure.is_failure());
        assert!(!ActionOutcome::Cancelled.is_failure());
        assert!(!ActionOutcome::Success.is_failure());
    }
}
