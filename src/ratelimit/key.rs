//! Window key generation and handling.

use super::rule::RateLimitRule;

/// A key that uniquely identifies one counting scope.
///
/// The rule id and caller id are kept as separate fields, so ids that
/// contain the display separator can never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    /// The rule this window belongs to
    pub rule_id: String,
    /// The caller identity being limited
    pub caller_id: String,
}

impl WindowKey {
    /// Create a new window key.
    pub fn new(rule_id: &str, caller_id: &str) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            caller_id: caller_id.to_string(),
        }
    }

    /// Create the key for a caller under a rule.
    pub fn for_rule(rule: &RateLimitRule, caller_id: &str) -> Self {
        Self::new(&rule.id, caller_id)
    }
}

impl std::fmt::Display for WindowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.rule_id, self.caller_id)
    }
}
