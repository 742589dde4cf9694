//! Engine facade
//!
//! Owns the health board, audit log, monitor and scheduler, and wires them
//! together with two background loops:
//! - Monitor loop: fixed cadence, pushes detected faults into a bounded channel
//! - Intake loop: drains that channel into the scheduler
//!
//! The scheduler itself is event driven and never polled.

use crate::collaborators::{ExecutorRegistry, MetricsSource, NotificationSink, StrategyExecutor, TracingSink};
use crate::error::{EngineError, SourceError};
use crate::health::HealthBoard;
use crate::monitor::HealthMonitor;
use crate::scheduler::{Dispatch, RemediationScheduler, SchedulerStats};
use async_trait::async_trait;
use parking_lot::Mutex;
use remedy_core::{
    AuditLog, AuditQuery, Component, ComponentHealth, ComponentId, EngineConfig, Evidence, Fault,
    FaultId, FaultKind, FaultSource, FaultState, HealingAction, MetricMap, RecoveryStrategy,
    Severity,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Description given to faults raised by [`RemediationEngine::heal_component`]
pub const MANUAL_HEAL_DESCRIPTION: &str = "manual restart requested";

/// Source used when the embedder supplies none: every component reports no
/// metrics and therefore stays Healthy
#[derive(Debug, Clone, Copy, Default)]
struct NoMetrics;

#[async_trait]
impl MetricsSource for NoMetrics {
    async fn sample(&self, _: &ComponentId) -> Result<MetricMap, SourceError> {
        Ok(MetricMap::new())
    }
}

/// Builder for [`RemediationEngine`]
pub struct RemediationEngineBuilder {
    config: EngineConfig,
    source: Arc<dyn MetricsSource>,
    executors: ExecutorRegistry,
    sink: Arc<dyn NotificationSink>,
    audit: Option<Arc<AuditLog>>,
}

impl RemediationEngineBuilder {
    /// With metrics source
    #[must_use]
    pub fn metrics_source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.source = source;
        self
    }

    /// With the complete executor registry
    #[must_use]
    pub fn executors(mut self, executors: ExecutorRegistry) -> Self {
        self.executors = executors;
        self
    }

    /// With one executor
    #[must_use]
    pub fn executor(mut self, strategy: RecoveryStrategy, executor: Arc<dyn StrategyExecutor>) -> Self {
        self.executors = self.executors.with_executor(strategy, executor);
        self
    }

    /// With notification sink
    #[must_use]
    pub fn notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Continue an existing audit trail, e.g. one restored with
    /// [`AuditLog::import`]
    #[must_use]
    pub fn audit_log(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Validate configuration and assemble the engine
    ///
    /// # Errors
    /// - `EngineError::Config` if the configuration is invalid
    pub fn build(self) -> Result<RemediationEngine, EngineError> {
        self.config.validate()?;

        let board = Arc::new(HealthBoard::new());
        for component in &self.config.components {
            board.register(component.clone());
        }
        let audit = self.audit.unwrap_or_default();
        let monitor = Arc::new(HealthMonitor::new(
            &self.config,
            self.source,
            Arc::clone(&board),
        ));
        let scheduler = RemediationScheduler::new(
            &self.config,
            self.executors,
            Arc::clone(&audit),
            Arc::clone(&board),
            self.sink,
        );

        Ok(RemediationEngine {
            config: self.config,
            board,
            audit,
            monitor,
            scheduler,
            lifecycle: Mutex::new(None),
        })
    }
}

impl std::fmt::Debug for RemediationEngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemediationEngineBuilder")
            .field("config", &self.config)
            .field("executors", &self.executors)
            .finish_non_exhaustive()
    }
}

struct Lifecycle {
    token: CancellationToken,
    loops: TaskTracker,
    dispatch: Dispatch,
}

/// Autonomous remediation engine
pub struct RemediationEngine {
    config: EngineConfig,
    board: Arc<HealthBoard>,
    audit: Arc<AuditLog>,
    monitor: Arc<HealthMonitor>,
    scheduler: RemediationScheduler,
    lifecycle: Mutex<Option<Lifecycle>>,
}

impl RemediationEngine {
    /// Start building an engine
    #[must_use]
    pub fn builder(config: EngineConfig) -> RemediationEngineBuilder {
        RemediationEngineBuilder {
            config,
            source: Arc::new(NoMetrics),
            executors: ExecutorRegistry::new(),
            sink: Arc::new(TracingSink),
            audit: None,
        }
    }

    /// Spawn the monitor and intake loops and start dispatching.
    ///
    /// Idempotent. Faults queued while stopped are dispatched now.
    ///
    /// # Errors
    /// - `EngineError::NoRuntime` when called outside a tokio runtime
    pub fn start(&self) -> Result<(), EngineError> {
        let handle = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.is_some() {
            return Ok(());
        }

        let token = CancellationToken::new();
        let loops = TaskTracker::new();
        let (intake_tx, intake_rx) = mpsc::channel(self.config.intake_capacity);

        loops.spawn_on(
            monitor_loop(
                Arc::clone(&self.monitor),
                self.config.monitor_interval(),
                intake_tx,
                token.clone(),
            ),
            &handle,
        );
        loops.spawn_on(
            intake_loop(self.scheduler.clone(), intake_rx, token.clone()),
            &handle,
        );
        loops.close();

        let dispatch = self.scheduler.resume(token.child_token(), handle);
        *lifecycle = Some(Lifecycle {
            token,
            loops,
            dispatch,
        });

        tracing::info!(
            components = self.board.components().len(),
            max_concurrent = self.config.max_concurrent,
            monitor_interval = ?self.config.monitor_interval(),
            "engine started"
        );
        Ok(())
    }

    /// Stop both loops, cancel in-flight remediations and wait for them to
    /// record their final actions. Idempotent.
    pub async fn stop(&self) {
        let Some(lifecycle) = self.lifecycle.lock().take() else {
            return;
        };
        lifecycle.token.cancel();
        lifecycle.loops.wait().await;
        self.scheduler.shutdown(&lifecycle.dispatch).await;
        tracing::info!(audit_records = self.audit.len(), "engine stopped");
    }

    /// Whether the engine is started
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lifecycle.lock().is_some()
    }

    /// Inject a fault
    ///
    /// # Errors
    /// - `EngineError::UnknownComponent` if the component is not registered
    /// - `EngineError::Scheduler` if the fault id was already submitted
    pub fn report_fault(&self, fault: Fault) -> Result<FaultId, EngineError> {
        if !self.board.contains(&fault.component) {
            return Err(EngineError::UnknownComponent(fault.component));
        }
        let id = fault.id;
        self.scheduler.submit(fault)?;
        Ok(id)
    }

    /// Request a manual heal of a component
    ///
    /// # Errors
    /// - `EngineError::UnknownComponent` if the component is not registered
    pub fn heal_component(&self, id: &ComponentId) -> Result<FaultId, EngineError> {
        let observed = self
            .board
            .observed(id)
            .ok_or_else(|| EngineError::UnknownComponent(id.clone()))?;
        let metrics = self
            .board
            .last_sample(id)
            .map(|sample| sample.metrics)
            .unwrap_or_default();

        let fault = Fault::new(
            id.clone(),
            FaultKind::Custom(MANUAL_HEAL_DESCRIPTION.to_string()),
            Severity::from_health(observed),
        )
        .with_source(FaultSource::Manual)
        .with_evidence(Evidence::snapshot(metrics));

        tracing::info!(component = %id, fault = %fault.id, "manual heal requested");
        self.report_fault(fault)
    }

    /// Run one monitor pass now and submit what it finds
    pub async fn run_monitor_pass(&self) -> Vec<FaultId> {
        let mut submitted = Vec::new();
        for fault in self.monitor.tick().await {
            let id = fault.id;
            match self.scheduler.submit(fault) {
                Ok(()) => submitted.push(id),
                Err(error) => tracing::warn!(%error, "monitor fault rejected"),
            }
        }
        submitted
    }

    /// Reported health per component (Recovering while remediation is in flight)
    #[must_use]
    pub fn get_health(&self) -> BTreeMap<ComponentId, ComponentHealth> {
        self.board.snapshot()
    }

    /// Reported health of one component
    #[must_use]
    pub fn component_health(&self, id: &ComponentId) -> Option<ComponentHealth> {
        self.board.health(id)
    }

    /// Worst observed tier across all components
    #[must_use]
    pub fn get_system_health(&self) -> ComponentHealth {
        self.board.system_health()
    }

    /// Audit records matching the filter, in insertion order
    #[must_use]
    pub fn get_history(&self, query: &AuditQuery) -> Vec<HealingAction> {
        self.audit.query(query)
    }

    /// Start tracking a component
    ///
    /// # Errors
    /// - `EngineError::DuplicateComponent` if already registered
    pub fn register_component(&self, component: Component) -> Result<(), EngineError> {
        let id = component.id.clone();
        if !self.board.register(component) {
            return Err(EngineError::DuplicateComponent(id));
        }
        tracing::info!(component = %id, "component registered");
        Ok(())
    }

    /// Stop tracking a component. Faults already submitted still run.
    ///
    /// # Errors
    /// - `EngineError::UnknownComponent` if not registered
    pub fn deregister_component(&self, id: &ComponentId) -> Result<(), EngineError> {
        if !self.board.deregister(id) {
            return Err(EngineError::UnknownComponent(id.clone()));
        }
        tracing::info!(component = %id, "component deregistered");
        Ok(())
    }

    /// Lifecycle state of a fault
    #[must_use]
    pub fn fault_state(&self, id: FaultId) -> Option<FaultState> {
        self.scheduler.fault_state(id)
    }

    /// Scheduler counters
    #[must_use]
    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Resolves once nothing is queued or in flight
    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await;
    }

    /// Audit trail as JSON Lines
    ///
    /// # Errors
    /// - `EngineError::Audit` if a record fails to serialize
    pub fn export_audit(&self) -> Result<String, EngineError> {
        Ok(self.audit.export_all()?)
    }

    /// Shared audit log
    #[must_use]
    pub fn audit_log(&self) -> Arc<AuditLog> {
        Arc::clone(&self.audit)
    }

    /// Engine configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Drop for RemediationEngine {
    fn drop(&mut self) {
        if let Some(lifecycle) = self.lifecycle.get_mut().take() {
            lifecycle.token.cancel();
        }
    }
}

impl std::fmt::Debug for RemediationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemediationEngine")
            .field("running", &self.is_running())
            .field("scheduler", &self.scheduler)
            .field("audit_records", &self.audit.len())
            .finish_non_exhaustive()
    }
}

async fn monitor_loop(
    monitor: Arc<HealthMonitor>,
    period: Duration,
    intake: mpsc::Sender<Fault>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let faults = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            faults = monitor.tick() => faults,
        };

        let total = faults.len();
        for (sent_count, fault) in faults.into_iter().enumerate() {
            let sent = tokio::select! {
                biased;
                () = cancel.cancelled() => false,
                sent = intake.send(fault) => sent.is_ok(),
            };
            if !sent {
                tracing::debug!(dropped = total - sent_count, "monitor loop exited mid-pass");
                return;
            }
        }
    }
    tracing::debug!("monitor loop exited");
}

async fn intake_loop(
    scheduler: RemediationScheduler,
    mut intake: mpsc::Receiver<Fault>,
    cancel: CancellationToken,
) {
    loop {
        let fault = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            fault = intake.recv() => match fault {
                Some(fault) => fault,
                None => break,
            },
        };
        submit_detected(&scheduler, fault);
    }

    // Whatever the monitor already sent stays queued for the next start.
    intake.close();
    while let Ok(fault) = intake.try_recv() {
        submit_detected(&scheduler, fault);
    }
    tracing::debug!("intake loop exited");
}

fn submit_detected(scheduler: &RemediationScheduler, fault: Fault) {
    if let Err(error) = scheduler.submit(fault) {
        tracing::warn!(%error, "monitor fault rejected");
    }
}
