//! Rule storage.

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::trace;

use super::rule::{RateLimitFilter, RateLimitRule};
use crate::error::{LimiterError, Result};

/// Repository of rate limit rules keyed by id.
///
/// Implementations must be safe to share across tasks. Rules are handed out
/// by value so a reader never observes a rule half-way through an update.
pub trait RuleStore: Send + Sync {
    /// Insert or overwrite the rule stored at `rule.id`.
    fn save(&self, rule: RateLimitRule);

    /// Look up a rule by id.
    fn find_by_id(&self, id: &str) -> Result<RateLimitRule>;

    /// Return every rule matching the filter, in no particular order.
    /// `None` matches every rule.
    fn find_all(&self, filter: Option<&RateLimitFilter>) -> Vec<RateLimitRule>;

    /// Remove a rule. Removing an unknown id is not an error.
    fn delete(&self, id: &str);

    /// Remove every rule.
    fn clear(&self);

    /// Number of stored rules.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory rule store guarded by a reader-writer lock.
#[derive(Debug, Default)]
pub struct InMemoryRuleStore {
    rules: RwLock<HashMap<String, RateLimitRule>>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RuleStore for InMemoryRuleStore {
    fn save(&self, rule: RateLimitRule) {
        trace!(rule_id = %rule.id, "Saving rate limit rule");
        self.rules.write().insert(rule.id.clone(), rule);
    }

    fn find_by_id(&self, id: &str) -> Result<RateLimitRule> {
        self.rules
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| LimiterError::NotFound(id.to_string()))
    }

    fn find_all(&self, filter: Option<&RateLimitFilter>) -> Vec<RateLimitRule> {
        let rules = self.rules.read();
        rules
            .values()
            .filter(|rule| filter.map_or(true, |f| rule.matches_filter(f)))
            .cloned()
            .collect()
    }

    fn delete(&self, id: &str) {
        if self.rules.write().remove(id).is_some() {
            trace!(rule_id = %id, "Deleted rate limit rule");
        }
    }

    fn clear(&self) {
        self.rules.write().clear();
    }

    fn len(&self) -> usize {
        self.rules.read().len()
    }
}
