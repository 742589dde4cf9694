//! Offline checks for exported audit trails and config files

use crate::simulator::{check_history, Violation};
use anyhow::Context;
use remedy_core::{AuditLog, EngineConfig};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Result of validating an exported audit trail
#[derive(Debug, Clone, Serialize)]
pub(crate) struct LogReport {
    pub(crate) records: usize,
    pub(crate) faults: usize,
    pub(crate) components: usize,
    pub(crate) outcomes: BTreeMap<String, usize>,
    pub(crate) head_digest: String,
    pub(crate) problems: Vec<String>,
}

impl LogReport {
    pub(crate) fn valid(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Parse an exported trail, rebuild its chain and check per-fault sequences.
/// With `expected_digest`, the rebuilt head must match it.
///
/// # Errors
/// When the file cannot be read or a line does not parse
pub(crate) fn validate_log(path: &Path, expected_digest: Option<&str>) -> anyhow::Result<LogReport> {
    let log = AuditLog::import_from_path(path)
        .with_context(|| format!("failed to load audit trail from {}", path.display()))?;
    let actions = log.actions();

    let mut problems = Vec::new();
    if let Err(error) = log.verify_integrity() {
        problems.push(error.to_string());
    }
    problems.extend(check_history(&actions).iter().map(Violation::to_string));

    let head_digest = log.head_digest();
    if let Some(expected) = expected_digest {
        if !expected.trim().eq_ignore_ascii_case(&head_digest) {
            problems.push(format!(
                "head digest {head_digest} does not match expected {}",
                expected.trim()
            ));
        }
    }

    let mut outcomes = BTreeMap::new();
    for action in &actions {
        *outcomes.entry(format!("{:?}", action.outcome)).or_insert(0) += 1;
    }

    Ok(LogReport {
        records: actions.len(),
        faults: actions.iter().map(|a| a.fault_id).collect::<BTreeSet<_>>().len(),
        components: actions.iter().map(|a| &a.component).collect::<BTreeSet<_>>().len(),
        outcomes,
        head_digest,
        problems,
    })
}

/// Load and validate a TOML engine config
///
/// # Errors
/// When the file is unreadable, malformed or fails validation
pub(crate) fn check_config(path: &Path) -> anyhow::Result<EngineConfig> {
    EngineConfig::from_path(path).with_context(|| format!("invalid config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use remedy_core::{ActionOutcome, Fault, FaultKind, HealingAction, RecoveryStrategy, Severity};
    use std::io::Write;

    fn trail() -> AuditLog {
        let log = AuditLog::new();
        let fault = Fault::new("db", FaultKind::DependencyFailure, Severity::Critical);
        for (attempt, outcome) in [(1, ActionOutcome::Failure), (2, ActionOutcome::Success)] {
            log.append(HealingAction::new(
                &fault,
                RecoveryStrategy::Rollback,
                outcome,
                attempt,
                3,
            ))
            .unwrap();
        }
        log
    }

    #[test]
    fn exported_trail_validates() {
        let log = trail();
        let file = tempfile::NamedTempFile::new().unwrap();
        log.export_to_path(file.path()).unwrap();

        let report = validate_log(file.path(), Some(&log.head_digest())).unwrap();
        assert!(report.valid(), "{:?}", report.problems);
        assert_eq!(report.records, 2);
        assert_eq!(report.faults, 1);
        assert_eq!(report.components, 1);
        assert_eq!(report.outcomes["Success"], 1);
    }

    #[test]
    fn digest_mismatch_is_reported() {
        let log = trail();
        let file = tempfile::NamedTempFile::new().unwrap();
        log.export_to_path(file.path()).unwrap();

        let report = validate_log(file.path(), Some(&"0".repeat(64))).unwrap();
        assert!(!report.valid());
        assert!(report.problems[0].contains("does not match"));
    }

    #[test]
    fn malformed_line_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{ not json").unwrap();
        assert!(validate_log(file.path(), None).is_err());
    }

    #[test]
    fn config_check_reports_invalid_values() {
        let mut good = tempfile::NamedTempFile::new().unwrap();
        writeln!(good, "max_concurrent = 4").unwrap();
        assert_eq!(check_config(good.path()).unwrap().max_concurrent, 4);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "max_concurrent = 0").unwrap();
        assert!(check_config(bad.path()).is_err());
    }
}
