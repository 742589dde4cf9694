//! Error types for Remedy Engine
//!
//! Provides error handling for:
//! - Engine API misuse (unknown components, no runtime)
//! - Scheduler intake
//! - Collaborator failures (metrics sources, strategy executors)

use remedy_core::{AuditError, ComponentId, ConfigError, FaultId, LifecycleError, RecoveryStrategy};
use std::time::Duration;

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Component is not registered
    #[error("unknown component: {0}")]
    UnknownComponent(ComponentId),

    /// Component already registered
    #[error("component already registered: {0}")]
    DuplicateComponent(ComponentId),

    /// `start()` was called outside a tokio runtime
    #[error("no tokio runtime available to start the engine")]
    NoRuntime,

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Scheduler rejected the fault
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Audit export failed
    #[error("audit error: {0}")]
    Audit(#[from] AuditError),
}

impl EngineError {
    /// Check if the caller may reasonably try again
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NoRuntime)
    }

    /// Check if the error stems from a malformed request
    #[inline]
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownComponent(_) | Self::DuplicateComponent(_) | Self::Config(_)
        )
    }
}

/// Scheduler errors
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// A fault with this id was already submitted
    #[error("fault {0} already submitted")]
    DuplicateFault(FaultId),

    /// Lifecycle table rejected a transition
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Metrics source errors. Any of these marks the component Failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    /// Source could not produce a sample
    #[error("metrics unavailable: {0}")]
    Unavailable(String),

    /// Sample exceeded its ceiling
    #[error("sampling timed out after {0:?}")]
    Timeout(Duration),

    /// Source panicked while sampling
    #[error("metrics source panicked: {0}")]
    Panicked(String),
}

/// Strategy executor errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutorError {
    /// Strategy ran and did not fix the problem
    #[error("remediation failed: {0}")]
    Failed(String),

    /// Temporary condition, worth retrying
    #[error("transient failure: {0}")]
    Transient(String),

    /// Executor cannot handle this strategy or fault
    #[error("unsupported strategy: {0}")]
    Unsupported(RecoveryStrategy),

    /// Executor crashed or panicked
    #[error("executor crashed: {0}")]
    Crashed(String),
}

impl ExecutorError {
    /// Transient failures are the only ones the executor itself marks as recoverable
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Stable label for audit metadata
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Failed(_) => "failed",
            Self::Transient(_) => "transient",
            Self::Unsupported(_) => "unsupported",
            Self::Crashed(_) => "crashed",
        }
    }
}
