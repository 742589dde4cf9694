//! Start/stop semantics and cancellation of in-flight remediation

use pretty_assertions::assert_eq;
use remedy_core::{
    ActionOutcome, AuditQuery, EngineConfig, FaultState, RecoveryStrategy, Resolution, RetryPolicy,
    Severity,
};
use remedy_engine::{EngineError, RemediationEngine};
use remedy_test_utils::{
    fast_config, fault, shared, wait_until, GatedExecutor, Scripted, ScriptedExecutor,
};
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn stop_cancels_in_flight_fault_exactly_once() {
    let gate = shared(GatedExecutor::new());
    let engine = RemediationEngine::builder(fast_config(&["api"]))
        .executor(RecoveryStrategy::ScaleUp, gate.clone())
        .build()
        .unwrap();
    engine.start().unwrap();

    let id = engine.report_fault(fault("api", Severity::Critical)).unwrap();
    wait_until(WAIT, || gate.started_count() == 1).await;
    engine.stop().await;

    let history = engine.get_history(&AuditQuery::all().fault(id));
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, ActionOutcome::Cancelled);
    assert_eq!(history[0].metadata["cancellation"], "acknowledged");
    assert_eq!(engine.fault_state(id), Some(FaultState::Cancelled));

    let stats = engine.scheduler_stats();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.cancelled, 1);
}

#[tokio::test]
async fn executor_ignoring_cancellation_is_abandoned_after_grace() {
    let config = fast_config(&["api"]).with_cancel_grace(Duration::from_millis(50));
    let engine = RemediationEngine::builder(config)
        .executor(
            RecoveryStrategy::ScaleUp,
            shared(ScriptedExecutor::new([Scripted::IgnoreCancel])),
        )
        .build()
        .unwrap();
    engine.start().unwrap();

    let id = engine.report_fault(fault("api", Severity::Critical)).unwrap();
    wait_until(WAIT, || engine.fault_state(id) == Some(FaultState::InProgress)).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = Instant::now();
    engine.stop().await;
    assert!(started.elapsed() < Duration::from_secs(2));

    let history = engine.get_history(&AuditQuery::all().fault(id));
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, ActionOutcome::Cancelled);
    assert_eq!(history[0].metadata["cancellation"], "abandoned");
}

#[tokio::test]
async fn cancellation_during_backoff_records_cancelled() {
    let config = fast_config(&["api"]).with_retry(RetryPolicy {
        max_attempts: 3,
        base_delay_ms: 30_000,
        max_delay_ms: 60_000,
    });
    let engine = RemediationEngine::builder(config)
        .executor(
            RecoveryStrategy::ScaleUp,
            shared(ScriptedExecutor::new([Scripted::Fail])),
        )
        .build()
        .unwrap();
    engine.start().unwrap();

    let id = engine.report_fault(fault("api", Severity::Critical)).unwrap();
    wait_until(WAIT, || engine.get_history(&AuditQuery::all()).len() == 1).await;

    let started = Instant::now();
    engine.stop().await;
    assert!(started.elapsed() < Duration::from_secs(2));

    let history = engine.get_history(&AuditQuery::all().fault(id));
    let outcomes: Vec<_> = history.iter().map(|a| a.outcome).collect();
    assert_eq!(outcomes, vec![ActionOutcome::Failure, ActionOutcome::Cancelled]);
    assert_eq!(history[1].metadata["phase"], "backoff");
    assert_eq!(history[1].attempt_number, 2);
    assert_eq!(engine.fault_state(id), Some(FaultState::Cancelled));
}

#[tokio::test]
async fn queued_faults_survive_restart() {
    let gate = shared(GatedExecutor::new());
    let engine = RemediationEngine::builder(fast_config(&["a", "b"]).with_max_concurrent(1))
        .executor(RecoveryStrategy::ScaleUp, gate.clone())
        .build()
        .unwrap();
    engine.start().unwrap();

    let first = engine.report_fault(fault("a", Severity::Failed)).unwrap();
    let second = engine.report_fault(fault("b", Severity::Critical)).unwrap();
    wait_until(WAIT, || gate.started_count() == 1).await;

    engine.stop().await;
    assert_eq!(engine.fault_state(first), Some(FaultState::Cancelled));
    assert_eq!(engine.fault_state(second), Some(FaultState::Queued));
    assert_eq!(engine.scheduler_stats().queued, 1);

    engine.start().unwrap();
    gate.release(1);
    engine.wait_idle().await;
    engine.stop().await;

    assert_eq!(
        engine.fault_state(second),
        Some(FaultState::Completed(Resolution::Remediated))
    );
    assert!(engine
        .get_history(&AuditQuery::all().fault(first))
        .iter()
        .all(|a| a.outcome == ActionOutcome::Cancelled));
}

#[tokio::test]
async fn start_during_pending_stop_keeps_dispatching() {
    let gate = shared(GatedExecutor::new());
    let engine = RemediationEngine::builder(fast_config(&["a", "b"]))
        .executor(RecoveryStrategy::ScaleUp, gate.clone())
        .build()
        .unwrap();
    engine.start().unwrap();

    let first = engine.report_fault(fault("a", Severity::Critical)).unwrap();
    wait_until(WAIT, || gate.started_count() == 1).await;

    let mut stop = Box::pin(engine.stop());
    assert!(futures::poll!(&mut stop).is_pending());
    engine.start().unwrap();
    stop.await;

    assert!(engine.is_running());
    assert_eq!(engine.fault_state(first), Some(FaultState::Cancelled));

    let second = engine.report_fault(fault("b", Severity::Critical)).unwrap();
    wait_until(WAIT, || gate.started_count() == 2).await;
    gate.release(1);
    engine.wait_idle().await;
    assert_eq!(
        engine.fault_state(second),
        Some(FaultState::Completed(Resolution::Remediated))
    );

    engine.stop().await;
    assert!(!engine.is_running());
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let engine = RemediationEngine::builder(fast_config(&["api"]))
        .build()
        .unwrap();

    engine.stop().await;
    assert!(!engine.is_running());

    engine.start().unwrap();
    engine.start().unwrap();
    assert!(engine.is_running());

    engine.stop().await;
    engine.stop().await;
    assert!(!engine.is_running());
    assert!(engine.get_history(&AuditQuery::all()).is_empty());
}

#[test]
fn start_outside_runtime_fails() {
    let engine = RemediationEngine::builder(EngineConfig::new())
        .build()
        .unwrap();
    assert!(matches!(engine.start(), Err(EngineError::NoRuntime)));
    assert!(!engine.is_running());
}

#[test]
fn invalid_configuration_is_rejected_at_build() {
    let result = RemediationEngine::builder(EngineConfig::new().with_max_concurrent(0)).build();
    assert!(matches!(result, Err(EngineError::Config(_))));
}
