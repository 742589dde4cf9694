//! Testing utilities for the Remedy workspace
//!
//! Scripted collaborators, fixtures and small async helpers.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use remedy_core::{
    Component, ComponentId, EngineConfig, Fault, FaultKind, HealingAction, MetricMap, RetryPolicy,
    Severity,
};
use remedy_engine::{
    ExecutionReport, ExecutionRequest, ExecutorError, MetricsSource, NotificationSink,
    SourceError, StrategyExecutor,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn metrics(pairs: &[(&str, f64)]) -> MetricMap {
    pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
}

pub fn fault(component: &str, severity: Severity) -> Fault {
    Fault::new(component, FaultKind::ResourceExhaustion, severity)
}

pub fn fault_of(component: &str, kind: FaultKind, severity: Severity) -> Fault {
    Fault::new(component, kind, severity)
}

/// Config with millisecond backoff and timeouts suitable for tests
pub fn fast_config(components: &[&str]) -> EngineConfig {
    let mut config = EngineConfig::new()
        .with_retry(RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 100,
        })
        .with_default_timeout(Duration::from_secs(5))
        .with_monitor_interval(Duration::from_millis(20))
        .with_cancel_grace(Duration::from_millis(200));
    config.sample_timeout_ms = 200;
    for id in components {
        config = config.with_component(Component::new(*id, *id));
    }
    config
}

/// Poll `condition` every few milliseconds until it holds
///
/// # Panics
/// If the condition does not hold within `timeout`
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within {timeout:?}");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

// ---------------------------------------------------------------------------
// Metrics source
// ---------------------------------------------------------------------------

/// Metrics source returning scripted samples. The last scripted sample for a
/// component repeats; unscripted components report no metrics.
#[derive(Debug, Default)]
pub struct ScriptedMetricsSource {
    scripts: Mutex<HashMap<ComponentId, VecDeque<Result<MetricMap, SourceError>>>>,
    calls: AtomicUsize,
}

impl ScriptedMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the script with a single repeating sample
    pub fn set(&self, component: &str, metrics: MetricMap) {
        self.scripts
            .lock()
            .insert(component.into(), VecDeque::from([Ok(metrics)]));
    }

    /// Replace the script with a single repeating failure
    pub fn fail(&self, component: &str, message: &str) {
        self.scripts.lock().insert(
            component.into(),
            VecDeque::from([Err(SourceError::Unavailable(message.to_string()))]),
        );
    }

    /// Append a sample to the script
    pub fn push(&self, component: &str, sample: Result<MetricMap, SourceError>) {
        self.scripts
            .lock()
            .entry(component.into())
            .or_default()
            .push_back(sample);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsSource for ScriptedMetricsSource {
    async fn sample(&self, component: &ComponentId) -> Result<MetricMap, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut scripts = self.scripts.lock();
        let Some(script) = scripts.get_mut(component) else {
            return Ok(MetricMap::new());
        };
        if script.len() > 1 {
            script.pop_front().unwrap_or_else(|| Ok(MetricMap::new()))
        } else {
            script.front().cloned().unwrap_or_else(|| Ok(MetricMap::new()))
        }
    }
}

// ---------------------------------------------------------------------------
// Executors
// ---------------------------------------------------------------------------

/// What a scripted executor does on one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scripted {
    Succeed,
    Fail,
    Transient,
    Panic,
    /// Never returns unless cancelled
    Hang,
    /// Never returns, even when cancelled
    IgnoreCancel,
}

#[derive(Debug, Clone)]
pub struct CallRecord {
    pub component: ComponentId,
    pub fault: remedy_core::FaultId,
    pub strategy: remedy_core::RecoveryStrategy,
    pub attempt: u32,
    pub at: Instant,
}

/// Concurrency gauge shared by executors
#[derive(Debug, Default)]
pub struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) -> GaugeGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard(self)
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct GaugeGuard<'a>(&'a Gauge);

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Executor that plays back a script of outcomes, then succeeds
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<Scripted>>,
    delay: Duration,
    calls: Mutex<Vec<CallRecord>>,
    gauge: Gauge,
}

impl ScriptedExecutor {
    pub fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn always(outcome: Scripted) -> Self {
        Self::new(std::iter::repeat(outcome).take(1024))
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn gauge(&self) -> &Gauge {
        &self.gauge
    }
}

#[async_trait]
impl StrategyExecutor for ScriptedExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionReport, ExecutorError> {
        let _gauge = self.gauge.enter();
        self.calls.lock().push(CallRecord {
            component: request.fault.component.clone(),
            fault: request.fault.id,
            strategy: request.strategy,
            attempt: request.attempt,
            at: Instant::now(),
        });
        let step = self.script.lock().pop_front().unwrap_or(Scripted::Succeed);

        if !self.delay.is_zero() {
            tokio::select! {
                () = request.cancel.cancelled() => {
                    return Err(ExecutorError::Failed("cancelled".into()));
                }
                () = tokio::time::sleep(self.delay) => {}
            }
        }

        match step {
            Scripted::Succeed => Ok(ExecutionReport::new(format!(
                "{} applied to {}",
                request.strategy, request.fault.component
            ))),
            Scripted::Fail => Err(ExecutorError::Failed("scripted failure".into())),
            Scripted::Transient => Err(ExecutorError::Transient("scripted blip".into())),
            Scripted::Panic => panic!("scripted executor panic"),
            Scripted::Hang => {
                request.cancel.cancelled().await;
                Err(ExecutorError::Failed("cancelled".into()))
            }
            Scripted::IgnoreCancel => {
                std::future::pending::<()>().await;
                Err(ExecutorError::Failed("unreachable".into()))
            }
        }
    }
}

/// Executor whose calls block until released one permit at a time
#[derive(Debug)]
pub struct GatedExecutor {
    gate: Semaphore,
    started: Mutex<Vec<ComponentId>>,
    gauge: Gauge,
}

impl Default for GatedExecutor {
    fn default() -> Self {
        Self {
            gate: Semaphore::new(0),
            started: Mutex::new(Vec::new()),
            gauge: Gauge::default(),
        }
    }
}

impl GatedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `n` blocked calls complete successfully
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Components in the order their calls started
    pub fn started(&self) -> Vec<ComponentId> {
        self.started.lock().clone()
    }

    pub fn started_count(&self) -> usize {
        self.started.lock().len()
    }

    pub fn gauge(&self) -> &Gauge {
        &self.gauge
    }
}

#[async_trait]
impl StrategyExecutor for GatedExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionReport, ExecutorError> {
        let _gauge = self.gauge.enter();
        self.started.lock().push(request.fault.component.clone());

        tokio::select! {
            () = request.cancel.cancelled() => Err(ExecutorError::Failed("cancelled".into())),
            permit = self.gate.acquire() => {
                if let Ok(permit) = permit {
                    permit.forget();
                }
                Ok(ExecutionReport::new(format!("released {}", request.fault.component)))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Notification sink
// ---------------------------------------------------------------------------

/// Sink that keeps every delivered action
#[derive(Debug, Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<HealingAction>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<HealingAction> {
        self.delivered.lock().clone()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, action: &HealingAction) {
        self.delivered.lock().push(action.clone());
    }
}

/// Convenience for `Arc::new`
pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
