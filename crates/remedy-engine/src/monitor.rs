//! Health monitor
//!
//! One [`HealthMonitor::tick`] samples every tracked component concurrently,
//! updates the health board and returns the faults that need remediation.
//! A failing, slow or panicking source only affects its own component.

use crate::collaborators::MetricsSource;
use crate::error::SourceError;
use crate::health::HealthBoard;
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use remedy_core::{
    ComponentHealth, ComponentId, EngineConfig, Fault, FaultClassifier, HealthSample, MetricMap,
    Observation, ThresholdTable,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

type History = BTreeMap<String, VecDeque<f64>>;

/// Samples components and synthesizes faults
pub struct HealthMonitor {
    source: Arc<dyn MetricsSource>,
    board: Arc<HealthBoard>,
    classifier: FaultClassifier,
    thresholds: ThresholdTable,
    sample_timeout: Duration,
    history_window: usize,
    suppress_duplicates: bool,
    history: Mutex<HashMap<ComponentId, History>>,
}

impl HealthMonitor {
    /// Create a monitor from engine configuration
    #[must_use]
    pub fn new(config: &EngineConfig, source: Arc<dyn MetricsSource>, board: Arc<HealthBoard>) -> Self {
        Self {
            source,
            board,
            classifier: FaultClassifier::new(config.classifier.clone()),
            thresholds: config.thresholds.clone(),
            sample_timeout: config.sample_timeout(),
            history_window: config.history_window,
            suppress_duplicates: config.suppress_duplicate_faults,
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Run one monitoring pass
    pub async fn tick(&self) -> Vec<Fault> {
        let components = self.board.components();
        let samples = join_all(components.iter().map(|c| self.sample(&c.id))).await;

        let mut faults = Vec::new();
        for (component, sample) in components.into_iter().zip(samples) {
            if let Some(fault) = self.observe(component.id, sample) {
                faults.push(fault);
            }
        }
        self.forget_deregistered();
        faults
    }

    async fn sample(&self, id: &ComponentId) -> Result<MetricMap, SourceError> {
        let call = AssertUnwindSafe(self.source.sample(id)).catch_unwind();
        match tokio::time::timeout(self.sample_timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(SourceError::Panicked(panic_message(panic.as_ref()))),
            Err(_) => Err(SourceError::Timeout(self.sample_timeout)),
        }
    }

    fn observe(&self, id: ComponentId, sample: Result<MetricMap, SourceError>) -> Option<Fault> {
        let observation = match sample {
            Ok(metrics) => {
                let health = self.thresholds.evaluate(&id, &metrics);
                let history = self.extend_history(&id, &metrics);
                self.board.record(
                    &id,
                    health,
                    Some(HealthSample::now(id.clone(), metrics.clone())),
                );
                Observation::sampled(id, health, metrics).with_history(history)
            }
            Err(error) => {
                tracing::warn!(component = %id, %error, "sampling failed");
                self.board.record(&id, ComponentHealth::Failed, None);
                Observation::sampling_failed(id, error.to_string())
            }
        };

        if !observation.health.needs_remediation() {
            return None;
        }
        if self.suppress_duplicates && self.board.has_open_fault(&observation.component) {
            tracing::debug!(
                component = %observation.component,
                "open fault already pending, skipping"
            );
            return None;
        }

        let fault = self.classifier.classify(observation);
        tracing::info!(
            fault = %fault.id,
            component = %fault.component,
            kind = %fault.kind,
            severity = %fault.severity,
            "fault detected"
        );
        Some(fault)
    }

    /// Push the latest values and return the windowed history
    fn extend_history(&self, id: &ComponentId, metrics: &MetricMap) -> BTreeMap<String, Vec<f64>> {
        let mut all = self.history.lock();
        let history = all.entry(id.clone()).or_default();
        for (name, value) in metrics {
            let window = history.entry(name.clone()).or_default();
            window.push_back(*value);
            while window.len() > self.history_window {
                window.pop_front();
            }
        }
        history
            .iter()
            .map(|(name, window)| (name.clone(), window.iter().copied().collect()))
            .collect()
    }

    fn forget_deregistered(&self) {
        self.history.lock().retain(|id, _| self.board.contains(id));
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("sample_timeout", &self.sample_timeout)
            .field("history_window", &self.history_window)
            .field("suppress_duplicates", &self.suppress_duplicates)
            .finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use remedy_core::{Component, FaultKind, FaultSource, Severity};

    struct Table(HashMap<&'static str, Result<MetricMap, &'static str>>);

    #[async_trait]
    impl MetricsSource for Table {
        async fn sample(&self, component: &ComponentId) -> Result<MetricMap, SourceError> {
            match self.0.get(component.as_str()) {
                Some(Ok(metrics)) => Ok(metrics.clone()),
                Some(Err("panic")) => panic!("probe exploded"),
                Some(Err("hang")) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(MetricMap::new())
                }
                Some(Err(message)) => Err(SourceError::Unavailable((*message).to_string())),
                None => Ok(MetricMap::new()),
            }
        }
    }

    fn metrics(pairs: &[(&str, f64)]) -> MetricMap {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    fn monitor(source: Table, ids: &[&str]) -> (HealthMonitor, Arc<HealthBoard>) {
        let board = Arc::new(HealthBoard::new());
        for id in ids {
            board.register(Component::new(*id, *id));
        }
        let config = EngineConfig::new();
        let monitor = HealthMonitor::new(
            &EngineConfig {
                sample_timeout_ms: 50,
                ..config
            },
            Arc::new(source),
            Arc::clone(&board),
        );
        (monitor, board)
    }

    #[tokio::test]
    async fn critical_components_emit_faults() {
        let source = Table(HashMap::from([
            ("api", Ok(metrics(&[("cpu_usage", 95.0)]))),
            ("db", Ok(metrics(&[("cpu_usage", 20.0)]))),
            ("cache", Ok(metrics(&[("cpu_usage", 80.0)]))),
        ]));
        let (monitor, board) = monitor(source, &["api", "db", "cache"]);

        let faults = monitor.tick().await;

        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].component, ComponentId::new("api"));
        assert_eq!(faults[0].kind, FaultKind::ResourceExhaustion);
        assert_eq!(faults[0].source, FaultSource::Monitor);
        assert_eq!(board.observed(&"db".into()), Some(ComponentHealth::Healthy));
        assert_eq!(board.observed(&"cache".into()), Some(ComponentHealth::Degraded));
        assert!(board.last_sample(&"api".into()).is_some());
    }

    #[tokio::test]
    async fn sampling_failures_are_isolated() {
        let source = Table(HashMap::from([
            ("broken", Err("connection refused")),
            ("panicky", Err("panic")),
            ("slow", Err("hang")),
            ("fine", Ok(metrics(&[("cpu_usage", 10.0)]))),
        ]));
        let (monitor, board) = monitor(source, &["broken", "panicky", "slow", "fine"]);

        let faults = monitor.tick().await;

        assert_eq!(faults.len(), 3);
        for fault in &faults {
            assert_eq!(fault.kind, FaultKind::ConnectivityFailure);
            assert_eq!(fault.severity, Severity::Failed);
        }
        assert_eq!(board.observed(&"fine".into()), Some(ComponentHealth::Healthy));
        let slow = faults.iter().find(|f| f.component.as_str() == "slow").unwrap();
        assert!(slow.evidence.sample_error.as_deref().unwrap().contains("timed out"));
        let panicky = faults.iter().find(|f| f.component.as_str() == "panicky").unwrap();
        assert!(panicky.evidence.sample_error.as_deref().unwrap().contains("probe exploded"));
    }

    #[tokio::test]
    async fn open_faults_suppress_repeats() {
        let source = Table(HashMap::from([("api", Ok(metrics(&[("latency_ms", 3000.0)])))]));
        let (monitor, board) = monitor(source, &["api"]);

        assert_eq!(monitor.tick().await.len(), 1);
        board.fault_opened(&"api".into());
        assert!(monitor.tick().await.is_empty());
    }

    #[tokio::test]
    async fn history_window_is_bounded() {
        let source = Table(HashMap::from([("api", Ok(metrics(&[("cpu_usage", 50.0)])))]));
        let (monitor, _board) = monitor(source, &["api"]);

        for _ in 0..15 {
            monitor.tick().await;
        }
        let history = monitor.history.lock();
        assert_eq!(history[&ComponentId::new("api")]["cpu_usage"].len(), 10);
    }
}
