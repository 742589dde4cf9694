//! Remedy Engine - runtime half of the remediation orchestrator
//!
//! Runs the monitoring and healing loops on tokio:
//! - Samples component metrics on a fixed cadence
//! - Turns Critical/Failed components into classified faults
//! - Admits faults by severity under a concurrency limit
//! - Retries, times out, escalates and cancels remediation attempts
//! - Records every attempt in the hash-chained audit log
//!
//! # Example
//!
//! ```rust,no_run
//! use remedy_core::{Component, EngineConfig, Fault, FaultKind, Severity};
//! use remedy_engine::RemediationEngine;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::new()
//!     .with_max_concurrent(2)
//!     .with_component(Component::new("api", "API gateway"));
//! let engine = RemediationEngine::builder(config).build()?;
//!
//! engine.start()?;
//! engine.report_fault(Fault::new("api", FaultKind::ConfigurationError, Severity::Critical))?;
//! engine.wait_idle().await;
//! engine.stop().await;
//!
//! println!("{} actions recorded", engine.audit_log().len());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod backlog;
pub mod collaborators;
pub mod engine;
pub mod error;
pub mod health;
pub mod monitor;
pub mod scheduler;

pub use backlog::Backlog;
pub use collaborators::{
    ExecutionReport, ExecutionRequest, ExecutorRegistry, MetricsSource, NotificationSink,
    NotifyExecutor, StrategyExecutor, TracingSink,
};
pub use engine::{RemediationEngine, RemediationEngineBuilder, MANUAL_HEAL_DESCRIPTION};
pub use error::{EngineError, ExecutorError, SchedulerError, SourceError};
pub use health::HealthBoard;
pub use monitor::HealthMonitor;
pub use scheduler::{Dispatch, RemediationScheduler, SchedulerStats};

// Re-exported so collaborators can be written against this crate alone
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for embedding the engine
    pub use crate::{
        async_trait, CancellationToken, EngineError, ExecutionReport, ExecutionRequest,
        ExecutorError, ExecutorRegistry, MetricsSource, NotificationSink, RemediationEngine,
        SourceError, StrategyExecutor,
    };
    pub use remedy_core::prelude::*;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
