//! Monitor loop, health queries, manual heals and the audit trail

use pretty_assertions::assert_eq;
use remedy_core::{
    ActionOutcome, AuditLog, AuditQuery, Component, ComponentHealth, ComponentId, FaultKind,
    FaultState, RecoveryStrategy, Severity,
};
use remedy_engine::{EngineError, RemediationEngine};
use remedy_test_utils::{
    fast_config, fault, metrics, shared, wait_until, ScriptedExecutor, ScriptedMetricsSource,
};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn system_health_is_worst_component() {
    let source = shared(ScriptedMetricsSource::new());
    source.set("memory", metrics(&[("memory_usage", 80.0)]));
    source.set("disk", metrics(&[("disk_usage", 93.0)]));
    source.set("network", metrics(&[("packet_loss", 0.1)]));

    let engine = RemediationEngine::builder(fast_config(&["memory", "disk", "network"]))
        .metrics_source(source.clone())
        .build()
        .unwrap();

    let submitted = engine.run_monitor_pass().await;

    let health = engine.get_health();
    assert_eq!(health[&ComponentId::new("memory")], ComponentHealth::Degraded);
    assert_eq!(health[&ComponentId::new("disk")], ComponentHealth::Critical);
    assert_eq!(health[&ComponentId::new("network")], ComponentHealth::Healthy);
    assert_eq!(engine.get_system_health(), ComponentHealth::Critical);

    assert_eq!(submitted.len(), 1);
    assert_eq!(engine.fault_state(submitted[0]), Some(FaultState::Queued));
}

#[tokio::test]
async fn sampling_failure_marks_component_failed() {
    let source = shared(ScriptedMetricsSource::new());
    source.fail("db", "connection refused");
    source.set("api", metrics(&[("cpu_usage", 10.0)]));

    let engine = RemediationEngine::builder(fast_config(&["db", "api"]))
        .metrics_source(source.clone())
        .build()
        .unwrap();

    let submitted = engine.run_monitor_pass().await;

    assert_eq!(engine.get_health()[&ComponentId::new("db")], ComponentHealth::Failed);
    assert_eq!(engine.get_health()[&ComponentId::new("api")], ComponentHealth::Healthy);
    assert_eq!(engine.get_system_health(), ComponentHealth::Failed);
    assert_eq!(submitted.len(), 1);
}

#[tokio::test]
async fn monitor_loop_detects_and_remediates() {
    let source = shared(ScriptedMetricsSource::new());
    source.set("api", metrics(&[("cpu_usage", 99.0)]));
    let executor = shared(
        ScriptedExecutor::succeeding().with_delay(Duration::from_millis(200)),
    );

    let engine = RemediationEngine::builder(fast_config(&["api"]))
        .metrics_source(source.clone())
        .executor(RecoveryStrategy::ScaleUp, executor.clone())
        .build()
        .unwrap();
    engine.start().unwrap();

    let api = ComponentId::new("api");
    wait_until(WAIT, || executor.call_count() == 1).await;
    assert_eq!(engine.component_health(&api), Some(ComponentHealth::Recovering));
    assert_eq!(engine.get_system_health(), ComponentHealth::Failed);

    // Several ticks pass while the fault is in flight; none adds a fault.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.scheduler_stats().submitted, 1);

    source.set("api", metrics(&[("cpu_usage", 20.0)]));
    wait_until(WAIT, || !engine.get_history(&AuditQuery::all()).is_empty()).await;
    engine.stop().await;

    let history = engine.get_history(&AuditQuery::all().component("api"));
    assert_eq!(history[0].strategy, RecoveryStrategy::ScaleUp);
    assert_eq!(history[0].outcome, ActionOutcome::Success);
    assert!(history[0].metadata["side_effect"].contains("scale_up"));
    assert!(source.calls() > 1);
}

#[tokio::test]
async fn heal_component_requires_registration() {
    let engine = RemediationEngine::builder(fast_config(&["api"]))
        .build()
        .unwrap();

    let err = engine.heal_component(&"ghost".into()).unwrap_err();
    assert!(matches!(err, EngineError::UnknownComponent(ref id) if id.as_str() == "ghost"));
    assert!(err.is_configuration());
    assert_eq!(engine.scheduler_stats().submitted, 0);

    let err = engine
        .report_fault(fault("ghost", Severity::Critical))
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownComponent(_)));
}

#[tokio::test]
async fn manual_heal_restarts_component() {
    let restart = shared(ScriptedExecutor::succeeding());
    let engine = RemediationEngine::builder(fast_config(&["api"]))
        .executor(RecoveryStrategy::Restart, restart.clone())
        .build()
        .unwrap();
    engine.start().unwrap();

    let id = engine.heal_component(&"api".into()).unwrap();
    engine.wait_idle().await;
    engine.stop().await;

    let calls = restart.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].fault, id);
    assert_eq!(calls[0].strategy, RecoveryStrategy::Restart);

    let history = engine.get_history(&AuditQuery::all().fault(id));
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, ActionOutcome::Success);
}

#[tokio::test]
async fn components_can_be_registered_and_removed() {
    let engine = RemediationEngine::builder(fast_config(&[]))
        .build()
        .unwrap();

    engine
        .register_component(Component::new("cache", "Redis cache"))
        .unwrap();
    assert!(matches!(
        engine.register_component(Component::new("cache", "again")),
        Err(EngineError::DuplicateComponent(_))
    ));
    assert_eq!(
        engine.component_health(&"cache".into()),
        Some(ComponentHealth::Healthy)
    );

    engine.deregister_component(&"cache".into()).unwrap();
    assert!(engine.get_health().is_empty());
    assert!(matches!(
        engine.deregister_component(&"cache".into()),
        Err(EngineError::UnknownComponent(_))
    ));
}

#[tokio::test]
async fn exported_audit_trail_reimports_identically() {
    let engine = RemediationEngine::builder(fast_config(&["api", "db"]))
        .executor(
            RecoveryStrategy::ScaleUp,
            shared(ScriptedExecutor::new([remedy_test_utils::Scripted::Fail])),
        )
        .build()
        .unwrap();
    engine.start().unwrap();
    engine.report_fault(fault("api", Severity::Critical)).unwrap();
    engine
        .report_fault(remedy_test_utils::fault_of(
            "db",
            FaultKind::ConfigurationError,
            Severity::Failed,
        ))
        .unwrap();
    engine.wait_idle().await;
    engine.stop().await;

    let exported = engine.export_audit().unwrap();
    let imported = AuditLog::import(&exported).unwrap();

    assert_eq!(imported.actions(), engine.get_history(&AuditQuery::all()));
    assert_eq!(imported.head_digest(), engine.audit_log().head_digest());
    assert!(imported.verify_integrity().is_ok());

    let restored = RemediationEngine::builder(fast_config(&["api"]))
        .audit_log(shared(imported))
        .build()
        .unwrap();
    assert_eq!(
        restored.get_history(&AuditQuery::all().component("api")).len(),
        engine.get_history(&AuditQuery::all().component("api")).len()
    );
}
