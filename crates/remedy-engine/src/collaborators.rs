//! Collaborator contracts
//!
//! The engine owns no knowledge of how metrics are collected or how a
//! strategy is physically carried out. Embedders supply:
//! - [`MetricsSource`] for per-component samples
//! - [`StrategyExecutor`]s per strategy, collected in an [`ExecutorRegistry`]
//! - A [`NotificationSink`] for operator-facing delivery

use crate::error::{ExecutorError, SourceError};
use async_trait::async_trait;
use remedy_core::{ComponentId, Fault, HealingAction, MetricMap, RecoveryStrategy};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Source of raw metrics
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Take one sample for a component
    async fn sample(&self, component: &ComponentId) -> Result<MetricMap, SourceError>;
}

/// One remediation attempt handed to an executor
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Fault being remediated
    pub fault: Fault,
    /// Strategy to carry out
    pub strategy: RecoveryStrategy,
    /// 1-based attempt number across the whole fault
    pub attempt: u32,
    /// Fires when the engine stops. Executors should return promptly.
    pub cancel: CancellationToken,
}

/// What an executor did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Side effect description, recorded as audit metadata
    pub description: String,
    /// Extra audit metadata
    pub metadata: BTreeMap<String, String>,
}

impl ExecutionReport {
    /// Report with a side effect description
    #[inline]
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Add metadata
    #[inline]
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Carries out a recovery strategy
#[async_trait]
pub trait StrategyExecutor: Send + Sync {
    /// Execute one attempt
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionReport, ExecutorError>;
}

/// Fire-and-forget delivery of recorded actions
pub trait NotificationSink: Send + Sync {
    /// Deliver an action. Must not block.
    fn notify(&self, action: &HealingAction);
}

/// Sink that emits a tracing event per action
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, action: &HealingAction) {
        tracing::warn!(
            fault = %action.fault_id,
            component = %action.component,
            strategy = %action.strategy,
            outcome = ?action.outcome,
            attempt = action.attempt_number,
            "operator notification"
        );
    }
}

/// Built-in Notify handler. Delivery happens through the sink, so this
/// always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyExecutor;

#[async_trait]
impl StrategyExecutor for NotifyExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionReport, ExecutorError> {
        Ok(ExecutionReport::new(format!(
            "operator notified about {} on {}",
            request.fault.kind, request.fault.component
        )))
    }
}

/// Strategy to executor lookup
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<RecoveryStrategy, Arc<dyn StrategyExecutor>>,
    fallback: Option<Arc<dyn StrategyExecutor>>,
}

impl ExecutorRegistry {
    /// Create empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With an executor for one strategy
    #[must_use]
    pub fn with_executor(
        mut self,
        strategy: RecoveryStrategy,
        executor: Arc<dyn StrategyExecutor>,
    ) -> Self {
        self.executors.insert(strategy, executor);
        self
    }

    /// With the same executor for several strategies
    #[must_use]
    pub fn with_executor_for(
        mut self,
        strategies: impl IntoIterator<Item = RecoveryStrategy>,
        executor: Arc<dyn StrategyExecutor>,
    ) -> Self {
        for strategy in strategies {
            self.executors.insert(strategy, Arc::clone(&executor));
        }
        self
    }

    /// With an executor used when no strategy-specific one exists
    #[inline]
    #[must_use]
    pub fn with_fallback(mut self, executor: Arc<dyn StrategyExecutor>) -> Self {
        self.fallback = Some(executor);
        self
    }

    /// Executor for a strategy: registered, then built-in Notify, then fallback
    #[must_use]
    pub fn resolve(&self, strategy: RecoveryStrategy) -> Option<Arc<dyn StrategyExecutor>> {
        if let Some(executor) = self.executors.get(&strategy) {
            return Some(Arc::clone(executor));
        }
        if strategy == RecoveryStrategy::Notify {
            return Some(Arc::new(NotifyExecutor));
        }
        self.fallback.clone()
    }

    /// Strategies with a dedicated executor
    #[must_use]
    pub fn registered(&self) -> Vec<RecoveryStrategy> {
        let mut strategies: Vec<_> = self.executors.keys().copied().collect();
        strategies.sort();
        strategies
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("registered", &self.registered())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}
