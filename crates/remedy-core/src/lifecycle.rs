//! Fault lifecycle state machine
//!
//! Queued -> InProgress -> {Completed(resolution) | Cancelled}. Nothing else.

use crate::error::LifecycleError;
use serde::{Deserialize, Serialize};

/// How a completed fault ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    /// Planned strategy succeeded
    Remediated,
    /// Planned strategy exhausted, operator notified
    Escalated,
    /// Nothing succeeded, not even the notification
    Unresolved,
}

impl Resolution {
    /// Whether the fault counts as successfully remediated
    #[inline]
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Resolution::Remediated)
    }
}

/// Lifecycle state of a fault inside the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultState {
    /// Waiting in the backlog
    Queued,
    /// Admitted to the active set
    InProgress,
    /// Finished, success or failure
    Completed(Resolution),
    /// Engine stopped while in progress
    Cancelled,
}

impl FaultState {
    /// Whether no further transitions are possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, FaultState::Completed(_) | FaultState::Cancelled)
    }
}

/// Validates a state transition.
///
/// Illegal transitions are returned as errors so the scheduler can log and
/// keep going instead of poisoning its state.
pub fn validate_transition(from: FaultState, to: FaultState) -> Result<(), LifecycleError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(LifecycleError::IllegalTransition { from, to })
    }
}

fn allowed(from: FaultState, to: FaultState) -> bool {
    use FaultState::{Cancelled, Completed, InProgress, Queued};
    matches!(
        (from, to),
        (Queued, InProgress) | (InProgress, Completed(_)) | (InProgress, Cancelled)
    )
}
