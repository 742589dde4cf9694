//! Seeded remediation simulator
//!
//! Drives a real engine against randomized collaborators and checks the
//! invariants that must hold regardless of the random schedule:
//! - the active set never exceeds `max_concurrent`
//! - the audit chain verifies
//! - attempt numbers per fault run 1..n and at most one record is Cancelled
//! - nothing is still active once the engine is stopped

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use remedy_core::{
    ActionOutcome, AuditLog, AuditQuery, Component, ComponentId, EngineConfig, FaultId, HealingAction,
    MetricMap, RetryPolicy,
};
use remedy_engine::{
    ExecutionReport, ExecutionRequest, ExecutorError, ExecutorRegistry, MetricsSource,
    RemediationEngine, SchedulerStats, SourceError, StrategyExecutor,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Simulation parameters
#[derive(Debug, Clone, Serialize)]
pub(crate) struct SimulatorConfig {
    /// Random seed for reproducibility
    pub(crate) seed: u64,
    /// Number of simulated components
    pub(crate) components: usize,
    /// Monitor passes to drive
    pub(crate) ticks: u32,
    /// Pause between passes
    pub(crate) tick: Duration,
    /// Chance that a sample carries a threshold breach
    pub(crate) spike_rate: f64,
    /// Chance that sampling a component fails outright
    pub(crate) sample_failure_rate: f64,
    /// Chance that one executor attempt fails
    pub(crate) executor_failure_rate: f64,
    /// How long to wait for the backlog to drain before stopping
    pub(crate) settle_timeout: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            components: 8,
            ticks: 50,
            tick: Duration::from_millis(5),
            spike_rate: 0.15,
            sample_failure_rate: 0.02,
            executor_failure_rate: 0.3,
            settle_timeout: Duration::from_secs(10),
        }
    }
}

/// Engine configuration tuned for simulation: short backoff and timeouts,
/// and a monitor loop slow enough that the simulator drives the passes
pub(crate) fn simulation_engine_config() -> EngineConfig {
    let mut config = EngineConfig::new()
        .with_retry(RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 5,
            max_delay_ms: 50,
        })
        .with_default_timeout(Duration::from_millis(500))
        .with_monitor_interval(Duration::from_secs(3600))
        .with_cancel_grace(Duration::from_millis(100));
    config.sample_timeout_ms = 100;
    config
}

/// Invariant broken during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum Violation {
    ActiveSetExceeded { tick: u32, active: usize, limit: usize },
    ExecutorConcurrencyExceeded { peak: usize, limit: usize },
    AuditIntegrity { detail: String },
    AttemptSequence { fault: FaultId, attempts: Vec<u32> },
    RepeatedCancellation { fault: FaultId, count: usize },
    LingeringActive { active: usize },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ActiveSetExceeded { tick, active, limit } => {
                write!(f, "tick {tick}: {active} active remediations, limit {limit}")
            }
            Self::ExecutorConcurrencyExceeded { peak, limit } => {
                write!(f, "executor saw {peak} concurrent calls, limit {limit}")
            }
            Self::AuditIntegrity { detail } => write!(f, "audit chain: {detail}"),
            Self::AttemptSequence { fault, attempts } => {
                write!(f, "fault {fault}: attempt numbers {attempts:?}")
            }
            Self::RepeatedCancellation { fault, count } => {
                write!(f, "fault {fault}: {count} cancelled records")
            }
            Self::LingeringActive { active } => {
                write!(f, "{active} remediations still active after stop")
            }
        }
    }
}

/// Outcome of one simulation run
#[derive(Debug, Clone, Serialize)]
pub(crate) struct SimulationReport {
    pub(crate) config: SimulatorConfig,
    pub(crate) max_concurrent: usize,
    pub(crate) faults_detected: usize,
    pub(crate) settled: bool,
    pub(crate) stats: SchedulerStats,
    pub(crate) executor_calls: u64,
    pub(crate) executor_peak: usize,
    pub(crate) sample_calls: u64,
    pub(crate) audit_records: usize,
    pub(crate) head_digest: String,
    pub(crate) violations: Vec<Violation>,
}

impl SimulationReport {
    /// Whether every invariant held
    pub(crate) fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Human readable summary
    pub(crate) fn generate_text(&self) -> String {
        let mut report = String::new();
        report.push_str("=== Remediation Simulator Report ===\n\n");
        report.push_str(&format!("Seed: {}\n", self.config.seed));
        report.push_str(&format!("Components: {}\n", self.config.components));
        report.push_str(&format!("Ticks: {}\n", self.config.ticks));
        report.push_str(&format!("Max Concurrent: {}\n", self.max_concurrent));
        report.push_str(&format!("Faults Detected: {}\n", self.faults_detected));
        report.push_str(&format!(
            "Remediated: {}  Escalated: {}  Unresolved: {}  Cancelled: {}\n",
            self.stats.remediated, self.stats.escalated, self.stats.unresolved, self.stats.cancelled
        ));
        report.push_str(&format!("Peak Active: {}\n", self.stats.peak_active));
        report.push_str(&format!(
            "Executor Calls: {} (peak {})\n",
            self.executor_calls, self.executor_peak
        ));
        report.push_str(&format!("Audit Records: {}\n", self.audit_records));
        report.push_str(&format!("Head Digest: {}\n", self.head_digest));
        if !self.settled {
            report.push_str("Backlog did not drain before the settle timeout\n");
        }

        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                report.push_str(&format!("{}. {v}\n", i + 1));
            }
        }

        report.push_str(&format!(
            "\n=== Result: {} ===\n",
            if self.passed() { "PASS" } else { "FAIL" }
        ));
        report
    }
}

/// Run one simulation, returning the report and the engine's audit trail
///
/// # Errors
/// When the engine cannot be built or started
pub(crate) async fn run_simulation(
    engine_config: EngineConfig,
    sim: SimulatorConfig,
) -> anyhow::Result<(SimulationReport, Arc<AuditLog>)> {
    let mut config = engine_config;
    for i in 0..sim.components {
        config = config.with_component(Component::new(
            format!("svc-{i}"),
            format!("simulated service {i}"),
        ));
    }
    let limit = config.max_concurrent;

    let source = Arc::new(RandomMetrics::new(
        sim.seed,
        sim.spike_rate,
        sim.sample_failure_rate,
    ));
    let executor = Arc::new(RandomExecutor::new(
        sim.seed.wrapping_add(1),
        sim.executor_failure_rate,
    ));
    let engine = RemediationEngine::builder(config)
        .metrics_source(source.clone())
        .executors(ExecutorRegistry::new().with_fallback(executor.clone()))
        .build()?;
    engine.start()?;
    tracing::info!(seed = sim.seed, components = sim.components, ticks = sim.ticks, "simulation started");

    let mut violations = Vec::new();
    let mut faults_detected = 0;
    for tick in 0..sim.ticks {
        faults_detected += engine.run_monitor_pass().await.len();
        let active = engine.scheduler_stats().active;
        if active > limit {
            violations.push(Violation::ActiveSetExceeded { tick, active, limit });
        }
        tokio::time::sleep(sim.tick).await;
    }

    let settled = tokio::time::timeout(sim.settle_timeout, engine.wait_idle())
        .await
        .is_ok();
    engine.stop().await;

    let stats = engine.scheduler_stats();
    if stats.peak_active > limit {
        violations.push(Violation::ActiveSetExceeded {
            tick: sim.ticks,
            active: stats.peak_active,
            limit,
        });
    }
    if executor.peak() > limit {
        violations.push(Violation::ExecutorConcurrencyExceeded {
            peak: executor.peak(),
            limit,
        });
    }
    if stats.active != 0 {
        violations.push(Violation::LingeringActive { active: stats.active });
    }

    let audit = engine.audit_log();
    if let Err(error) = audit.verify_integrity() {
        violations.push(Violation::AuditIntegrity {
            detail: error.to_string(),
        });
    }
    violations.extend(check_history(&engine.get_history(&AuditQuery::all())));

    let report = SimulationReport {
        config: sim,
        max_concurrent: limit,
        faults_detected,
        settled,
        stats,
        executor_calls: executor.calls(),
        executor_peak: executor.peak(),
        sample_calls: source.calls(),
        audit_records: audit.len(),
        head_digest: audit.head_digest(),
        violations,
    };
    tracing::info!(
        passed = report.passed(),
        violations = report.violations.len(),
        audit_records = report.audit_records,
        "simulation finished"
    );
    Ok((report, audit))
}

/// Per-fault checks over an audit history
pub(crate) fn check_history(history: &[HealingAction]) -> Vec<Violation> {
    let mut per_fault: BTreeMap<FaultId, Vec<&HealingAction>> = BTreeMap::new();
    for action in history {
        per_fault.entry(action.fault_id).or_default().push(action);
    }

    let mut violations = Vec::new();
    for (fault, actions) in per_fault {
        let attempts: Vec<u32> = actions.iter().map(|a| a.attempt_number).collect();
        let expected = 1..=u32::try_from(attempts.len()).unwrap_or(u32::MAX);
        if !attempts.iter().copied().eq(expected) {
            violations.push(Violation::AttemptSequence { fault, attempts });
        }
        let cancelled = actions
            .iter()
            .filter(|a| a.outcome == ActionOutcome::Cancelled)
            .count();
        if cancelled > 1 {
            violations.push(Violation::RepeatedCancellation {
                fault,
                count: cancelled,
            });
        }
    }
    violations
}

// ---------------------------------------------------------------------------
// Randomized collaborators
// ---------------------------------------------------------------------------

/// Metrics with a healthy baseline and occasional breaches or outages
struct RandomMetrics {
    rng: Mutex<StdRng>,
    spike_rate: f64,
    failure_rate: f64,
    calls: AtomicU64,
}

impl RandomMetrics {
    fn new(seed: u64, spike_rate: f64, failure_rate: f64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            spike_rate: spike_rate.clamp(0.0, 1.0),
            failure_rate: failure_rate.clamp(0.0, 1.0),
            calls: AtomicU64::new(0),
        }
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MetricsSource for RandomMetrics {
    async fn sample(&self, component: &ComponentId) -> Result<MetricMap, SourceError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let mut rng = self.rng.lock();
        if rng.gen_bool(self.failure_rate) {
            return Err(SourceError::Unavailable(format!(
                "simulated outage of {component}"
            )));
        }

        let mut metrics = MetricMap::new();
        metrics.insert("cpu_usage".into(), rng.gen_range(5.0..60.0));
        metrics.insert("memory_usage".into(), rng.gen_range(20.0..70.0));
        metrics.insert("latency_ms".into(), rng.gen_range(10.0..300.0));
        metrics.insert("error_rate".into(), rng.gen_range(0.0..0.005));

        if rng.gen_bool(self.spike_rate) {
            let (metric, value) = match rng.gen_range(0..4) {
                0 => ("cpu_usage", rng.gen_range(91.0..100.0)),
                1 => ("memory_usage", rng.gen_range(91.0..100.0)),
                2 => ("latency_ms", rng.gen_range(1_500.0..8_000.0)),
                _ => ("error_rate", rng.gen_range(0.06..0.5)),
            };
            metrics.insert(metric.into(), value);
        }
        Ok(metrics)
    }
}

/// Executor that sleeps a few milliseconds and then succeeds or fails at
/// random, tracking its own peak concurrency
struct RandomExecutor {
    rng: Mutex<StdRng>,
    failure_rate: f64,
    current: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicU64,
}

impl RandomExecutor {
    fn new(seed: u64, failure_rate: f64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            failure_rate: failure_rate.clamp(0.0, 1.0),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicU64::new(0),
        }
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StrategyExecutor for RandomExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionReport, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.current);

        let (delay, fails, transient) = {
            let mut rng = self.rng.lock();
            (
                Duration::from_millis(rng.gen_range(1..=8)),
                rng.gen_bool(self.failure_rate),
                rng.gen_bool(0.5),
            )
        };

        tokio::select! {
            () = request.cancel.cancelled() => {
                return Err(ExecutorError::Failed("cancelled".into()));
            }
            () = tokio::time::sleep(delay) => {}
        }

        match (fails, transient) {
            (false, _) => Ok(ExecutionReport::new(format!(
                "{} applied to {}",
                request.strategy, request.fault.component
            ))
            .with_meta("simulated_ms", delay.as_millis().to_string())),
            (true, true) => Err(ExecutorError::Transient("simulated blip".into())),
            (true, false) => Err(ExecutorError::Failed("simulated failure".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remedy_core::{Fault, FaultKind, RecoveryStrategy, Severity};

    fn quick(seed: u64) -> SimulatorConfig {
        SimulatorConfig {
            seed,
            components: 6,
            ticks: 20,
            tick: Duration::from_millis(2),
            spike_rate: 0.3,
            sample_failure_rate: 0.05,
            executor_failure_rate: 0.3,
            settle_timeout: Duration::from_secs(5),
        }
    }

    fn action(fault: &Fault, outcome: ActionOutcome, attempt: u32) -> HealingAction {
        HealingAction::new(fault, RecoveryStrategy::Restart, outcome, attempt, 1)
    }

    #[tokio::test]
    async fn simulation_holds_invariants() {
        let config = simulation_engine_config().with_max_concurrent(2);
        let (report, audit) = run_simulation(config, quick(7)).await.unwrap();

        assert!(report.passed(), "{}", report.generate_text());
        assert!(report.faults_detected > 0);
        assert!(report.audit_records > 0);
        assert!(report.stats.peak_active <= 2);
        assert!(report.executor_peak <= 2);
        assert_eq!(report.stats.active, 0);
        assert!(report.generate_text().contains("Result: PASS"));
        assert_eq!(audit.len(), report.audit_records);
        assert_eq!(audit.head_digest(), report.head_digest);
    }

    #[tokio::test]
    async fn always_failing_executor_escalates_everything() {
        let sim = SimulatorConfig {
            executor_failure_rate: 1.0,
            sample_failure_rate: 0.0,
            ..quick(11)
        };
        let (report, _) = run_simulation(simulation_engine_config(), sim).await.unwrap();

        assert!(report.passed(), "{}", report.generate_text());
        assert_eq!(report.stats.remediated, 0);
        assert!(report.stats.escalated > 0);
    }

    #[test]
    fn history_checks_flag_gaps_and_double_cancellation() {
        let ok = Fault::new("a", FaultKind::DependencyFailure, Severity::Critical);
        let gap = Fault::new("b", FaultKind::DependencyFailure, Severity::Critical);
        let twice = Fault::new("c", FaultKind::DependencyFailure, Severity::Critical);
        let history = vec![
            action(&ok, ActionOutcome::Failure, 1),
            action(&ok, ActionOutcome::Success, 2),
            action(&gap, ActionOutcome::Failure, 1),
            action(&gap, ActionOutcome::Failure, 3),
            action(&twice, ActionOutcome::Cancelled, 1),
            action(&twice, ActionOutcome::Cancelled, 2),
        ];

        let violations = check_history(&history);
        assert_eq!(violations.len(), 2);
        assert!(violations.contains(&Violation::AttemptSequence {
            fault: gap.id,
            attempts: vec![1, 3],
        }));
        assert!(violations.contains(&Violation::RepeatedCancellation {
            fault: twice.id,
            count: 2,
        }));
    }

    #[test]
    fn failed_report_lists_violations() {
        let report = SimulationReport {
            config: quick(1),
            max_concurrent: 1,
            faults_detected: 0,
            settled: true,
            stats: SchedulerStats::default(),
            executor_calls: 0,
            executor_peak: 2,
            sample_calls: 0,
            audit_records: 0,
            head_digest: String::new(),
            violations: vec![Violation::ExecutorConcurrencyExceeded { peak: 2, limit: 1 }],
        };
        let text = report.generate_text();
        assert!(!report.passed());
        assert!(text.contains("1. executor saw 2 concurrent calls, limit 1"));
        assert!(text.contains("Result: FAIL"));
    }
}
