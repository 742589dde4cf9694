//! Remediation scheduler
//!
//! Admission control over concurrent recoveries:
//! - Faults wait in a severity-ordered [`Backlog`]
//! - At most `max_concurrent` faults are in flight
//! - Every completion releases its slot and admits the next fault at once
//! - Retryable strategies back off exponentially, then escalate to Notify
//!
//! All bookkeeping sits behind one mutex that is never held across an
//! `.await`. Each dispatching period gets its own [`TaskTracker`] so shutdown
//! can wait for every in-flight fault of that period to record its final
//! action, even when a new period has already started.

use crate::backlog::Backlog;
use crate::collaborators::{ExecutionReport, ExecutionRequest, ExecutorRegistry, NotificationSink};
use crate::error::{ExecutorError, SchedulerError};
use crate::health::HealthBoard;
use crate::monitor::panic_message;
use futures::FutureExt;
use parking_lot::Mutex;
use remedy_core::{
    validate_transition, ActionOutcome, AuditLog, ComponentId, EngineConfig, Fault, FaultId,
    FaultState, HealingAction, LifecycleError, RecoveryPlanner, RecoveryStrategy, Resolution,
    RetryPolicy, StrategyTimeouts,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Scheduler counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Admission limit
    pub max_concurrent: usize,
    /// Faults waiting in the backlog
    pub queued: usize,
    /// Faults in flight
    pub active: usize,
    /// Highest number of faults ever in flight at once
    pub peak_active: usize,
    /// Faults accepted by `submit`
    pub submitted: u64,
    /// Completed with the planned strategy succeeding
    pub remediated: u64,
    /// Completed by escalating to Notify
    pub escalated: u64,
    /// Completed with nothing succeeding
    pub unresolved: u64,
    /// Cancelled while in flight
    pub cancelled: u64,
    /// Whether the backlog is currently above the watermark
    pub above_watermark: bool,
    /// Times the backlog rose above the watermark
    pub watermark_crossings: u64,
}

#[derive(Debug, Clone)]
struct Policy {
    max_concurrent: usize,
    retry: RetryPolicy,
    timeouts: StrategyTimeouts,
    cancel_grace: Duration,
    backlog_watermark: usize,
    notify_all_outcomes: bool,
}

impl Policy {
    fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent,
            retry: config.retry,
            timeouts: config.timeouts.clone(),
            cancel_grace: config.cancel_grace(),
            backlog_watermark: config.backlog_watermark,
            notify_all_outcomes: config.notify_all_outcomes,
        }
    }

    fn attempts_for(&self, strategy: RecoveryStrategy) -> u32 {
        if strategy.is_retryable() {
            self.retry.max_attempts
        } else {
            1
        }
    }
}

struct Running {
    run: u64,
    token: CancellationToken,
    handle: Handle,
    tracker: TaskTracker,
}

/// One dispatching period, returned by [`RemediationScheduler::resume`] and
/// handed back to [`RemediationScheduler::shutdown`]
#[derive(Debug, Clone)]
pub struct Dispatch {
    run: u64,
    token: CancellationToken,
    tracker: TaskTracker,
}

impl Dispatch {
    /// Token observed by every remediation of this period
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[derive(Default)]
struct State {
    backlog: Backlog,
    active: HashMap<FaultId, ComponentId>,
    states: HashMap<FaultId, FaultState>,
    running: Option<Running>,
    runs: u64,
    stats: SchedulerStats,
}

impl State {
    fn transition(&mut self, id: FaultId, to: FaultState) -> Result<(), LifecycleError> {
        let from = self.states.get(&id).copied().unwrap_or(FaultState::Queued);
        validate_transition(from, to)?;
        self.states.insert(id, to);
        Ok(())
    }

    fn check_watermark(&mut self, watermark: usize) {
        let queued = self.backlog.len();
        if queued > watermark && !self.stats.above_watermark {
            self.stats.above_watermark = true;
            self.stats.watermark_crossings += 1;
            tracing::warn!(queued, watermark, "backlog above watermark");
        } else if queued <= watermark {
            self.stats.above_watermark = false;
        }
    }

    fn is_idle(&self) -> bool {
        self.backlog.is_empty() && self.active.is_empty()
    }
}

struct Inner {
    policy: Policy,
    planner: RecoveryPlanner,
    executors: ExecutorRegistry,
    audit: Arc<AuditLog>,
    board: Arc<HealthBoard>,
    sink: Arc<dyn NotificationSink>,
    state: Mutex<State>,
    idle: Notify,
}

/// Severity-ordered, bounded-concurrency remediation scheduler
#[derive(Clone)]
pub struct RemediationScheduler {
    inner: Arc<Inner>,
}

impl RemediationScheduler {
    /// Create a stopped scheduler
    #[must_use]
    pub fn new(
        config: &EngineConfig,
        executors: ExecutorRegistry,
        audit: Arc<AuditLog>,
        board: Arc<HealthBoard>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let policy = Policy::from_config(config);
        let stats = SchedulerStats {
            max_concurrent: policy.max_concurrent,
            ..SchedulerStats::default()
        };
        Self {
            inner: Arc::new(Inner {
                policy,
                planner: RecoveryPlanner::new(config.planner.clone()),
                executors,
                audit,
                board,
                sink,
                state: Mutex::new(State {
                    stats,
                    ..State::default()
                }),
                idle: Notify::new(),
            }),
        }
    }

    /// Queue a fault and admit it if capacity allows.
    ///
    /// Faults submitted while stopped wait until [`RemediationScheduler::resume`].
    ///
    /// # Errors
    /// - `SchedulerError::DuplicateFault` if the fault id was seen before
    pub fn submit(&self, fault: Fault) -> Result<(), SchedulerError> {
        {
            let mut state = self.inner.state.lock();
            if state.states.contains_key(&fault.id) {
                return Err(SchedulerError::DuplicateFault(fault.id));
            }
            tracing::debug!(
                fault = %fault.id,
                component = %fault.component,
                severity = %fault.severity,
                "fault queued"
            );
            state.states.insert(fault.id, FaultState::Queued);
            state.stats.submitted += 1;
            self.inner.board.fault_opened(&fault.component);
            state.backlog.push(fault);
            state.check_watermark(self.inner.policy.backlog_watermark);
        }
        self.inner.pump();
        Ok(())
    }

    /// Start dispatching on `handle`, stopping when `token` is cancelled.
    ///
    /// While a live period exists it is returned unchanged.
    pub fn resume(&self, token: CancellationToken, handle: Handle) -> Dispatch {
        let dispatch = {
            let mut state = self.inner.state.lock();
            if let Some(running) = state
                .running
                .as_ref()
                .filter(|running| !running.token.is_cancelled())
            {
                return Dispatch {
                    run: running.run,
                    token: running.token.clone(),
                    tracker: running.tracker.clone(),
                };
            }
            state.runs += 1;
            let dispatch = Dispatch {
                run: state.runs,
                token,
                tracker: TaskTracker::new(),
            };
            state.running = Some(Running {
                run: dispatch.run,
                token: dispatch.token.clone(),
                handle,
                tracker: dispatch.tracker.clone(),
            });
            tracing::info!(
                run = dispatch.run,
                queued = state.backlog.len(),
                max_concurrent = self.inner.policy.max_concurrent,
                "scheduler dispatching"
            );
            dispatch
        };
        self.inner.pump();
        dispatch
    }

    /// Cancel the in-flight remediations of one period and wait until each
    /// has recorded its final action. Queued faults stay queued, and a
    /// period started after `dispatch` keeps running.
    pub async fn shutdown(&self, dispatch: &Dispatch) {
        dispatch.token.cancel();
        dispatch.tracker.close();
        dispatch.tracker.wait().await;

        let mut state = self.inner.state.lock();
        if state
            .running
            .as_ref()
            .is_some_and(|running| running.run == dispatch.run)
        {
            state.running = None;
        }
        tracing::info!(
            run = dispatch.run,
            queued = state.backlog.len(),
            "scheduler stopped"
        );
    }

    /// Whether faults are being dispatched
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner
            .state
            .lock()
            .running
            .as_ref()
            .is_some_and(|running| !running.token.is_cancelled())
    }

    /// Resolves once nothing is queued or in flight
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.state.lock().is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let state = self.inner.state.lock();
        SchedulerStats {
            queued: state.backlog.len(),
            active: state.active.len(),
            ..state.stats
        }
    }

    /// Lifecycle state of a fault
    #[must_use]
    pub fn fault_state(&self, id: FaultId) -> Option<FaultState> {
        self.inner.state.lock().states.get(&id).copied()
    }

    /// Faults currently in flight
    #[must_use]
    pub fn active_faults(&self) -> Vec<FaultId> {
        self.inner.state.lock().active.keys().copied().collect()
    }
}

impl std::fmt::Debug for RemediationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemediationScheduler")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

enum Step {
    Cancelled,
    Finished(std::thread::Result<Result<ExecutionReport, ExecutorError>>),
    TimedOut,
}

impl Inner {
    /// Admit faults while capacity allows
    fn pump(self: &Arc<Self>) {
        loop {
            let (fault, token, handle, tracker) = {
                let mut state = self.state.lock();
                let (token, handle, tracker) = match &state.running {
                    Some(running) if !running.token.is_cancelled() => (
                        running.token.clone(),
                        running.handle.clone(),
                        running.tracker.clone(),
                    ),
                    _ => return,
                };
                if state.active.len() >= self.policy.max_concurrent {
                    return;
                }
                let Some(fault) = state.backlog.pop() else {
                    return;
                };
                state.check_watermark(self.policy.backlog_watermark);
                if let Err(error) = state.transition(fault.id, FaultState::InProgress) {
                    tracing::error!(fault = %fault.id, %error, "dropping fault with invalid state");
                    continue;
                }
                state.active.insert(fault.id, fault.component.clone());
                state.stats.peak_active = state.stats.peak_active.max(state.active.len());
                self.board.fault_admitted(&fault.component);
                tracing::info!(
                    fault = %fault.id,
                    component = %fault.component,
                    severity = %fault.severity,
                    active = state.active.len(),
                    queued = state.backlog.len(),
                    "fault admitted"
                );
                (fault, token.child_token(), handle, tracker)
            };

            let inner = Arc::clone(self);
            tracker.spawn_on(async move { inner.remediate(fault, token).await }, &handle);
        }
    }

    async fn remediate(self: Arc<Self>, fault: Fault, cancel: CancellationToken) {
        let planned = self.planner.plan(&fault.kind);
        tracing::info!(
            fault = %fault.id,
            component = %fault.component,
            kind = %fault.kind,
            strategy = %planned,
            "remediation started"
        );
        let final_state = self.drive(&fault, planned, &cancel).await;
        self.finish(&fault, final_state);
    }

    /// Run the planned strategy with retries, then escalate to Notify
    async fn drive(
        &self,
        fault: &Fault,
        planned: RecoveryStrategy,
        cancel: &CancellationToken,
    ) -> FaultState {
        let mut attempt = 0;

        if planned != RecoveryStrategy::Notify {
            let allowed = self.policy.attempts_for(planned);
            for retry in 0..allowed {
                attempt += 1;
                let action = self.attempt(fault, planned, attempt, cancel).await;
                match action.outcome {
                    ActionOutcome::Success => {
                        self.record(action);
                        return FaultState::Completed(Resolution::Remediated);
                    }
                    ActionOutcome::Cancelled => {
                        self.record(action);
                        return FaultState::Cancelled;
                    }
                    ActionOutcome::Failure | ActionOutcome::Timeout => {}
                }

                if retry + 1 == allowed {
                    self.record(action);
                    break;
                }

                let delay = self.policy.retry.backoff(retry);
                self.record(action.with_meta("next_backoff_ms", delay.as_millis().to_string()));
                tracing::info!(
                    fault = %fault.id,
                    strategy = %planned,
                    attempt,
                    backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "retrying after backoff"
                );

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        let action = HealingAction::new(fault, planned, ActionOutcome::Cancelled, attempt + 1, 0)
                            .with_meta("phase", "backoff");
                        self.record(action);
                        return FaultState::Cancelled;
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }

            tracing::warn!(
                fault = %fault.id,
                component = %fault.component,
                strategy = %planned,
                attempts = attempt,
                "planned strategy exhausted, escalating to notify"
            );
        }

        attempt += 1;
        let mut action = self
            .attempt(fault, RecoveryStrategy::Notify, attempt, cancel)
            .await;
        if planned != RecoveryStrategy::Notify {
            action = action.with_meta("escalated_from", planned.as_str());
        }
        let final_state = match action.outcome {
            ActionOutcome::Success => FaultState::Completed(Resolution::Escalated),
            ActionOutcome::Cancelled => FaultState::Cancelled,
            ActionOutcome::Failure | ActionOutcome::Timeout => {
                FaultState::Completed(Resolution::Unresolved)
            }
        };
        self.record(action);
        final_state
    }

    /// One executor invocation, bounded by the strategy timeout and the
    /// cancellation grace period
    async fn attempt(
        &self,
        fault: &Fault,
        strategy: RecoveryStrategy,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> HealingAction {
        let started = Instant::now();
        if cancel.is_cancelled() {
            return HealingAction::new(fault, strategy, ActionOutcome::Cancelled, attempt, 0)
                .with_meta("phase", "pending");
        }

        let Some(executor) = self.executors.resolve(strategy) else {
            tracing::error!(fault = %fault.id, %strategy, "no executor registered");
            return HealingAction::new(fault, strategy, ActionOutcome::Failure, attempt, 0)
                .with_meta("error", format!("no executor registered for {strategy}"))
                .with_meta("error_kind", "unsupported");
        };

        let request = ExecutionRequest {
            fault: fault.clone(),
            strategy,
            attempt,
            cancel: cancel.child_token(),
        };
        let limit = self.policy.timeouts.for_strategy(strategy);
        let mut call = AssertUnwindSafe(executor.execute(request)).catch_unwind();

        let step = tokio::select! {
            biased;
            () = cancel.cancelled() => Step::Cancelled,
            result = &mut call => Step::Finished(result),
            () = tokio::time::sleep(limit) => Step::TimedOut,
        };

        let mut metadata = BTreeMap::new();
        let outcome = match step {
            Step::Cancelled => {
                let ack = match tokio::time::timeout(self.policy.cancel_grace, call).await {
                    Ok(_) => "acknowledged",
                    Err(_) => "abandoned",
                };
                tracing::info!(fault = %fault.id, %strategy, attempt, ack, "attempt cancelled");
                metadata.insert("cancellation".to_string(), ack.to_string());
                ActionOutcome::Cancelled
            }
            Step::Finished(Ok(Ok(report))) => {
                metadata.extend(report.metadata);
                metadata.insert("side_effect".to_string(), report.description);
                ActionOutcome::Success
            }
            Step::Finished(Ok(Err(error))) => {
                tracing::warn!(fault = %fault.id, %strategy, attempt, %error, "attempt failed");
                metadata.insert("error".to_string(), error.to_string());
                metadata.insert("error_kind".to_string(), error.kind().to_string());
                ActionOutcome::Failure
            }
            Step::Finished(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(fault = %fault.id, %strategy, attempt, panic = %message, "executor panicked");
                metadata.insert("error".to_string(), format!("executor panicked: {message}"));
                metadata.insert("error_kind".to_string(), "crashed".to_string());
                ActionOutcome::Failure
            }
            Step::TimedOut => {
                tracing::warn!(fault = %fault.id, %strategy, attempt, timeout = ?limit, "attempt timed out");
                metadata.insert("timeout_ms".to_string(), limit.as_millis().to_string());
                ActionOutcome::Timeout
            }
        };

        let mut action = HealingAction::new(fault, strategy, outcome, attempt, elapsed_ms(started));
        action.metadata.extend(metadata);
        action
    }

    fn record(&self, action: HealingAction) {
        tracing::info!(
            fault = %action.fault_id,
            component = %action.component,
            strategy = %action.strategy,
            outcome = ?action.outcome,
            attempt = action.attempt_number,
            duration_ms = action.duration_ms,
            "healing action recorded"
        );

        if self.policy.notify_all_outcomes || action.strategy == RecoveryStrategy::Notify {
            let delivered =
                std::panic::catch_unwind(AssertUnwindSafe(|| self.sink.notify(&action)));
            if let Err(panic) = delivered {
                tracing::error!(panic = %panic_message(panic.as_ref()), "notification sink panicked");
            }
        }

        if let Err(error) = self.audit.append(action) {
            tracing::error!(%error, "failed to append audit record");
        }
    }

    /// Release the slot, settle the fault and admit the next one
    fn finish(self: &Arc<Self>, fault: &Fault, final_state: FaultState) {
        {
            let mut state = self.state.lock();
            if let Err(error) = state.transition(fault.id, final_state) {
                tracing::error!(fault = %fault.id, %error, "invalid final transition");
            }
            state.active.remove(&fault.id);
            match final_state {
                FaultState::Completed(Resolution::Remediated) => state.stats.remediated += 1,
                FaultState::Completed(Resolution::Escalated) => state.stats.escalated += 1,
                FaultState::Completed(Resolution::Unresolved) => state.stats.unresolved += 1,
                FaultState::Cancelled => state.stats.cancelled += 1,
                FaultState::Queued | FaultState::InProgress => {}
            }
            self.board.fault_closed(&fault.component);
        }

        tracing::info!(
            fault = %fault.id,
            component = %fault.component,
            state = ?final_state,
            "remediation finished"
        );
        self.idle.notify_waiters();
        self.pump();
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
