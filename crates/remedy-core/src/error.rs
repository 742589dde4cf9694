//! Error types for Remedy Core
//!
//! Provides error handling for:
//! - Configuration loading and validation
//! - Audit log import and integrity checks
//! - Illegal fault lifecycle transitions

use crate::lifecycle::FaultState;
use crate::types::RecoveryStrategy;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Path that failed
        path: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// TOML could not be parsed
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field holds an unusable value
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Offending field
        field: String,
        /// Why it was rejected
        reason: String,
    },

    /// Threshold bounds are not ordered degraded <= critical <= failed
    #[error("thresholds for metric {metric} must satisfy degraded <= critical <= failed")]
    UnorderedThresholds {
        /// Metric name
        metric: String,
    },

    /// Keyword rule targets a strategy outside the allowed set
    #[error("keyword rule '{keyword}' targets {strategy}, expected restart, reconfigure or failover")]
    InvalidKeywordRule {
        /// Rule keyword
        keyword: String,
        /// Rejected target
        strategy: RecoveryStrategy,
    },

    /// Strategy name not recognised
    #[error("unknown recovery strategy: {0}")]
    UnknownStrategy(String),

    /// Component listed twice
    #[error("duplicate component: {0}")]
    DuplicateComponent(String),
}

impl ConfigError {
    /// Shorthand for an invalid field value
    #[inline]
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Audit log errors
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// A record could not be serialized or parsed
    #[error("malformed audit record at line {line}: {source}")]
    Malformed {
        /// 1-based line number
        line: usize,
        /// Parse error
        #[source]
        source: serde_json::Error,
    },

    /// Serialization failed during export
    #[error("failed to serialize audit record: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Hash chain does not verify
    #[error("audit chain integrity violation at entry {index}")]
    IntegrityViolation {
        /// 0-based entry index
        index: usize,
    },

    /// Export/import file IO failed
    #[error("audit file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fault lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    /// Transition not in the allowed table
    #[error("illegal fault transition {from:?} -> {to:?}")]
    IllegalTransition {
        /// Current state
        from: FaultState,
        /// Requested state
        to: FaultState,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::invalid("max_concurrent", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "invalid value for max_concurrent: must be at least 1"
        );
    }

    #[test]
    fn keyword_rule_error_names_strategy() {
        let err = ConfigError::InvalidKeywordRule {
            keyword: "cve".into(),
            strategy: RecoveryStrategy::Patch,
        };
        assert!(err.to_string().contains("patch"));
    }

    #[test]
    fn integrity_error_display() {
        let err = AuditError::IntegrityViolation { index: 4 };
        assert!(err.to_string().contains("entry 4"));
    }
}
