//! Append-only audit trail of healing actions
//!
//! Every [`HealingAction`] is appended once and never edited. Entries are
//! hash-chained (SHA-256 over the previous hash and the record's JSON) so an
//! exported trail can be re-imported and checked for tampering.

use crate::error::AuditError;
use crate::types::{
    ActionId, ActionOutcome, ComponentId, FaultId, HealingAction, RecoveryStrategy,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::path::Path;

#[derive(Debug, Clone)]
struct AuditEntry {
    action: HealingAction,
    prev_hash: [u8; 32],
    hash: [u8; 32],
}

/// Filter for audit queries. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditQuery {
    /// Only actions for this component
    pub component: Option<ComponentId>,
    /// Only actions for this fault
    pub fault: Option<FaultId>,
    /// Only actions at or after this time
    pub since: Option<DateTime<Utc>>,
    /// Only actions strictly before this time
    pub until: Option<DateTime<Utc>>,
    /// Only actions using this strategy
    pub strategy: Option<RecoveryStrategy>,
    /// Only actions with this outcome
    pub outcome: Option<ActionOutcome>,
}

impl AuditQuery {
    /// Match everything
    #[inline]
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to a component
    #[inline]
    #[must_use]
    pub fn component(mut self, component: impl Into<ComponentId>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Restrict to a fault
    #[inline]
    #[must_use]
    pub fn fault(mut self, fault: FaultId) -> Self {
        self.fault = Some(fault);
        self
    }

    /// Restrict to `[since, until)`
    #[inline]
    #[must_use]
    pub fn between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    /// Restrict to a strategy
    #[inline]
    #[must_use]
    pub fn strategy(mut self, strategy: RecoveryStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Restrict to an outcome
    #[inline]
    #[must_use]
    pub fn outcome(mut self, outcome: ActionOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Whether an action passes the filter
    #[must_use]
    pub fn matches(&self, action: &HealingAction) -> bool {
        self.component.as_ref().map_or(true, |c| &action.component == c)
            && self.fault.map_or(true, |f| action.fault_id == f)
            && self.since.map_or(true, |t| action.timestamp >= t)
            && self.until.map_or(true, |t| action.timestamp < t)
            && self.strategy.map_or(true, |s| action.strategy == s)
            && self.outcome.map_or(true, |o| action.outcome == o)
    }
}

/// Append-only, hash-chained log of healing actions
#[derive(Debug, Default)]
pub struct AuditLog {
    inner: Mutex<Vec<AuditEntry>>,
}

impl AuditLog {
    /// Create empty log
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action, chaining it to the previous entry
    pub fn append(&self, action: HealingAction) -> Result<ActionId, AuditError> {
        let mut guard = self.inner.lock();
        let prev_hash = guard.last().map_or([0u8; 32], |e| e.hash);
        let hash = compute_hash(&prev_hash, &action)?;
        let id = action.id;
        guard.push(AuditEntry {
            action,
            prev_hash,
            hash,
        });
        Ok(id)
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether nothing was recorded yet
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Matching actions in insertion order
    #[must_use]
    pub fn query(&self, query: &AuditQuery) -> Vec<HealingAction> {
        self.inner
            .lock()
            .iter()
            .filter(|e| query.matches(&e.action))
            .map(|e| e.action.clone())
            .collect()
    }

    /// All actions in insertion order
    #[must_use]
    pub fn actions(&self) -> Vec<HealingAction> {
        self.query(&AuditQuery::all())
    }

    /// Hex digest of the chain head (all zeros when empty)
    #[must_use]
    pub fn head_digest(&self) -> String {
        hex::encode(self.inner.lock().last().map_or([0u8; 32], |e| e.hash))
    }

    /// Recompute the chain and compare every link
    pub fn verify_integrity(&self) -> Result<(), AuditError> {
        let guard = self.inner.lock();
        let mut prev = [0u8; 32];
        for (index, entry) in guard.iter().enumerate() {
            if entry.prev_hash != prev || entry.hash != compute_hash(&prev, &entry.action)? {
                return Err(AuditError::IntegrityViolation { index });
            }
            prev = entry.hash;
        }
        Ok(())
    }

    /// Serialize every record as JSON Lines, in order
    pub fn export_all(&self) -> Result<String, AuditError> {
        let guard = self.inner.lock();
        let mut out = String::new();
        for entry in guard.iter() {
            out.push_str(&serde_json::to_string(&entry.action)?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Build a fresh log from [`AuditLog::export_all`] output
    pub fn import(serialized: &str) -> Result<Self, AuditError> {
        let log = Self::new();
        for (index, line) in serialized.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let action: HealingAction =
                serde_json::from_str(line).map_err(|source| AuditError::Malformed {
                    line: index + 1,
                    source,
                })?;
            log.append(action)?;
        }
        Ok(log)
    }

    /// Write the export to a file
    pub fn export_to_path(&self, path: impl AsRef<Path>) -> Result<usize, AuditError> {
        let serialized = self.export_all()?;
        std::fs::write(path.as_ref(), serialized)?;
        let count = self.len();
        tracing::info!(path = %path.as_ref().display(), count, "exported audit trail");
        Ok(count)
    }

    /// Read an export from a file
    pub fn import_from_path(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let serialized = std::fs::read_to_string(path.as_ref())?;
        Self::import(&serialized)
    }

    #[cfg(test)]
    fn tamper(&self, index: usize, f: impl FnOnce(&mut HealingAction)) {
        f(&mut self.inner.lock()[index].action);
    }
}

fn compute_hash(prev_hash: &[u8; 32], action: &HealingAction) -> Result<[u8; 32], AuditError> {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash);
    hasher.update(serde_json::to_vec(action)?);
    Ok(hasher.finalize().into())
}
