//! Recovery planning
//!
//! Pure lookup from [`FaultKind`] to [`RecoveryStrategy`]. Custom faults go
//! to Notify unless their description matches a configured keyword rule,
//! which is the extension point for teaching the planner new vocabulary.

use crate::error::ConfigError;
use crate::types::{FaultKind, RecoveryStrategy};
use serde::{Deserialize, Serialize};

/// Strategies a keyword rule may target
pub const KEYWORD_TARGETS: [RecoveryStrategy; 3] = [
    RecoveryStrategy::Restart,
    RecoveryStrategy::Reconfigure,
    RecoveryStrategy::Failover,
];

/// Maps custom fault descriptions containing `keyword` to `strategy`.
///
/// The keyword must start at a word boundary: `crash` matches "crashed" and
/// "worker_crash" but `hang` does not match "exchange".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordRule {
    /// Case-insensitive word prefix to look for
    pub keyword: String,
    /// Strategy used on match
    pub strategy: RecoveryStrategy,
}

impl KeywordRule {
    /// Create a rule
    #[inline]
    #[must_use]
    pub fn new(keyword: impl Into<String>, strategy: RecoveryStrategy) -> Self {
        Self {
            keyword: keyword.into(),
            strategy,
        }
    }

    fn matches(&self, description_lower: &str) -> bool {
        let keyword = self.keyword.to_lowercase();
        description_lower.match_indices(&keyword).any(|(at, _)| {
            !description_lower[..at]
                .chars()
                .next_back()
                .is_some_and(char::is_alphanumeric)
        })
    }
}

/// Planner configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Ordered keyword rules, first match wins
    #[serde(default = "default_keyword_rules")]
    pub keyword_rules: Vec<KeywordRule>,
}

impl PlannerConfig {
    /// Reject empty keywords and targets outside [`KEYWORD_TARGETS`]
    pub fn validate(&self) -> Result<(), ConfigError> {
        for rule in &self.keyword_rules {
            if rule.keyword.trim().is_empty() {
                return Err(ConfigError::invalid(
                    "planner.keyword_rules",
                    "keyword must not be empty",
                ));
            }
            if !KEYWORD_TARGETS.contains(&rule.strategy) {
                return Err(ConfigError::InvalidKeywordRule {
                    keyword: rule.keyword.clone(),
                    strategy: rule.strategy,
                });
            }
        }
        Ok(())
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            keyword_rules: default_keyword_rules(),
        }
    }
}

fn default_keyword_rules() -> Vec<KeywordRule> {
    use RecoveryStrategy::{Failover, Reconfigure, Restart};

    [
        ("restart", Restart),
        ("crash", Restart),
        ("hang", Restart),
        ("manual", Restart),
        ("config", Reconfigure),
        ("setting", Reconfigure),
        ("failover", Failover),
        ("unreachable", Failover),
        ("partition", Failover),
    ]
    .into_iter()
    .map(|(keyword, strategy)| KeywordRule::new(keyword, strategy))
    .collect()
}

/// Static fault-kind to strategy table
#[derive(Debug, Clone, Default)]
pub struct RecoveryPlanner {
    config: PlannerConfig,
}

impl RecoveryPlanner {
    /// Create planner
    #[inline]
    #[must_use]
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Choose a strategy for a fault kind
    #[must_use]
    pub fn plan(&self, kind: &FaultKind) -> RecoveryStrategy {
        match kind {
            FaultKind::ResourceExhaustion | FaultKind::PerformanceDegradation => {
                RecoveryStrategy::ScaleUp
            }
            FaultKind::ConnectivityFailure => RecoveryStrategy::Failover,
            FaultKind::ConfigurationError => RecoveryStrategy::Reconfigure,
            FaultKind::DependencyFailure => RecoveryStrategy::Rollback,
            FaultKind::SecurityVulnerability => RecoveryStrategy::Patch,
            FaultKind::Custom(description) => self.plan_custom(description),
        }
    }

    fn plan_custom(&self, description: &str) -> RecoveryStrategy {
        let lower = description.to_lowercase();
        self.config
            .keyword_rules
            .iter()
            .find(|rule| rule.matches(&lower))
            .map_or(RecoveryStrategy::Notify, |rule| rule.strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_table() {
        let planner = RecoveryPlanner::default();
        let table = [
            (FaultKind::ResourceExhaustion, RecoveryStrategy::ScaleUp),
            (FaultKind::PerformanceDegradation, RecoveryStrategy::ScaleUp),
            (FaultKind::ConnectivityFailure, RecoveryStrategy::Failover),
            (FaultKind::ConfigurationError, RecoveryStrategy::Reconfigure),
            (FaultKind::DependencyFailure, RecoveryStrategy::Rollback),
            (FaultKind::SecurityVulnerability, RecoveryStrategy::Patch),
            (FaultKind::Custom("cosmic rays".into()), RecoveryStrategy::Notify),
        ];

        for (kind, expected) in table {
            assert_eq!(planner.plan(&kind), expected, "kind {kind}");
        }
    }

    #[test]
    fn custom_keywords_are_case_insensitive() {
        let planner = RecoveryPlanner::default();
        assert_eq!(
            planner.plan(&FaultKind::Custom("Worker CRASHED twice".into())),
            RecoveryStrategy::Restart
        );
        assert_eq!(
            planner.plan(&FaultKind::Custom("stale config map".into())),
            RecoveryStrategy::Reconfigure
        );
        assert_eq!(
            planner.plan(&FaultKind::Custom("region unreachable".into())),
            RecoveryStrategy::Failover
        );
    }

    #[test]
    fn keywords_only_match_at_word_start() {
        let planner = RecoveryPlanner::default();
        for description in [
            "exchange gateway saw a rate change",
            "reconfigured cluster",
            "unclassified anomaly: failed with no matching classifier rule",
        ] {
            assert_eq!(
                planner.plan(&FaultKind::Custom(description.into())),
                RecoveryStrategy::Notify,
                "{description}"
            );
        }
        assert_eq!(
            planner.plan(&FaultKind::Custom("request hanging".into())),
            RecoveryStrategy::Restart
        );
        assert_eq!(
            planner.plan(&FaultKind::Custom("worker_crash loop".into())),
            RecoveryStrategy::Restart
        );
    }

    #[test]
    fn first_matching_rule_wins() {
        let planner = RecoveryPlanner::new(PlannerConfig {
            keyword_rules: vec![
                KeywordRule::new("cache", RecoveryStrategy::Failover),
                KeywordRule::new("cache", RecoveryStrategy::Restart),
            ],
        });
        assert_eq!(
            planner.plan(&FaultKind::Custom("cache thrash".into())),
            RecoveryStrategy::Failover
        );
    }

    #[test]
    fn keyword_rules_limited_to_allowed_targets() {
        let config = PlannerConfig {
            keyword_rules: vec![KeywordRule::new("cve", RecoveryStrategy::Patch)],
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidKeywordRule { .. })
        ));
        assert!(PlannerConfig::default().validate().is_ok());
    }
}
