//! Remedy Core - domain model of the remediation orchestrator
//!
//! Everything here is synchronous and runtime-free:
//! - Component, fault and healing action vocabulary
//! - Deterministic fault classification and recovery planning
//! - Fault lifecycle state machine
//! - Hash-chained audit trail
//! - Engine configuration loaded from TOML
//!
//! # Example
//!
//! ```rust
//! use remedy_core::{Fault, FaultKind, RecoveryPlanner, RecoveryStrategy, Severity};
//!
//! let fault = Fault::new("api", FaultKind::ResourceExhaustion, Severity::Critical);
//! let planner = RecoveryPlanner::default();
//! assert_eq!(planner.plan(&fault.kind), RecoveryStrategy::ScaleUp);
//! ```

#![warn(unreachable_pub)]

pub mod audit;
pub mod classifier;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod planner;
pub mod types;

pub use audit::{AuditLog, AuditQuery};
pub use classifier::{
    ClassifierConfig, ClassifierRule, FaultClassifier, Observation, SeverityBands, TrendConfig,
};
pub use config::{EngineConfig, MetricThreshold, RetryPolicy, StrategyTimeouts, ThresholdTable};
pub use error::{AuditError, ConfigError, LifecycleError};
pub use lifecycle::{validate_transition, FaultState, Resolution};
pub use planner::{KeywordRule, PlannerConfig, RecoveryPlanner, KEYWORD_TARGETS};
pub use types::{
    ActionId, ActionOutcome, Component, ComponentHealth, ComponentId, Evidence, Fault, FaultId,
    FaultKind, FaultSource, HealingAction, HealthSample, MetricMap, RecoveryStrategy, Severity,
    Trend,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Remedy Core
    pub use crate::{
        ActionOutcome, AuditLog, AuditQuery, ComponentHealth, ComponentId, EngineConfig, Fault,
        FaultKind, FaultState, HealingAction, RecoveryStrategy, Severity,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
