//! Limits service: rule management and admission on top of the store and
//! the engine.
//!
//! Every admission call resolves its rule from the store first, so callers
//! only ever deal in rule ids.

use std::sync::Arc;
use tracing::{debug, info};

use super::clock::{Clock, SystemClock};
use super::engine::{Decision, RateLimitEngine};
use super::rule::{RateLimitFilter, RateLimitRule};
use super::store::RuleStore;
use crate::error::{LimiterError, Result};

/// Result of an admission check.
///
/// An unknown rule is allowed and reported through `error`, so callers get
/// both the fail-open decision and the reason for it.
#[derive(Debug)]
pub struct CheckOutcome {
    pub allowed: bool,
    pub error: Option<LimiterError>,
}

impl CheckOutcome {
    fn decided(allowed: bool) -> Self {
        Self {
            allowed,
            error: None,
        }
    }

    fn fail_open(error: LimiterError) -> Self {
        Self {
            allowed: true,
            error: Some(error),
        }
    }

    /// Convert into a `Result`, discarding the fail-open decision on error.
    pub fn into_result(self) -> Result<bool> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.allowed),
        }
    }
}

/// Composes a rule store and an engine into the limits operations.
pub struct LimitsService<C: Clock = SystemClock> {
    store: Arc<dyn RuleStore>,
    engine: Arc<RateLimitEngine<C>>,
}

impl<C: Clock> Clone for LimitsService<C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<C: Clock> LimitsService<C> {
    /// Create a new service over an existing store and engine.
    pub fn new(store: Arc<dyn RuleStore>, engine: Arc<RateLimitEngine<C>>) -> Self {
        Self { store, engine }
    }

    /// The engine backing this service.
    pub fn engine(&self) -> &Arc<RateLimitEngine<C>> {
        &self.engine
    }

    /// Validate and store a new rule. A rule without an id is given one.
    pub fn create_rate_limit(&self, mut rule: RateLimitRule) -> Result<RateLimitRule> {
        rule.validate()?;
        if rule.id.is_empty() {
            rule.id = uuid::Uuid::new_v4().to_string();
        }

        info!(
            rule_id = %rule.id,
            limit = rule.limit,
            window = %rule.window,
            algorithm = %rule.algorithm,
            "Created rate limit rule"
        );
        self.store.save(rule.clone());
        Ok(rule)
    }

    pub fn get_rate_limit(&self, id: &str) -> Result<RateLimitRule> {
        self.store.find_by_id(id)
    }

    /// List rules matching the filter.
    pub fn list_rate_limits(&self, filter: Option<&RateLimitFilter>) -> Result<Vec<RateLimitRule>> {
        if let Some(filter) = filter {
            filter.validate()?;
        }
        Ok(self.store.find_all(filter))
    }

    /// Validate and store a rule over any existing rule with the same id.
    /// The rule does not need to exist beforehand.
    pub fn update_rate_limit(&self, rule: RateLimitRule) -> Result<RateLimitRule> {
        if rule.id.is_empty() {
            return Err(LimiterError::Validation("id is required".to_string()));
        }
        rule.validate()?;
        let window = rule.window_duration()?;

        self.store.save(rule.clone());
        let retuned = self.engine.retune_rule(&rule.id, window);
        info!(rule_id = %rule.id, windows = retuned, "Updated rate limit rule");
        Ok(rule)
    }

    /// Delete a rule and the windows recorded under it. Unknown ids are
    /// ignored.
    pub fn delete_rate_limit(&self, id: &str) -> Result<()> {
        self.store.delete(id);
        let forgotten = self.engine.forget_rule(id);
        info!(rule_id = %id, windows = forgotten, "Deleted rate limit rule");
        Ok(())
    }

    /// Check whether `caller_id` may proceed under the rule. An unknown rule
    /// is allowed along with the `NotFound` error.
    pub fn check_rate_limit(&self, rule_id: &str, caller_id: &str) -> CheckOutcome {
        match self.store.find_by_id(rule_id) {
            Ok(rule) => CheckOutcome::decided(self.engine.check_rate_limit(caller_id, &rule)),
            Err(err) => {
                debug!(rule_id = %rule_id, error = %err, "Unknown rule, allowing request");
                CheckOutcome::fail_open(err)
            }
        }
    }

    /// Record an event for `caller_id` under the rule.
    pub fn apply_rate_limit(&self, rule_id: &str, caller_id: &str) -> Result<()> {
        let rule = self.store.find_by_id(rule_id)?;
        self.engine.apply_rate_limit(caller_id, &rule);
        Ok(())
    }

    /// Check and, only when admitted, record in one step.
    pub fn attempt_rate_limit(&self, rule_id: &str, caller_id: &str) -> Result<Decision> {
        let rule = self.store.find_by_id(rule_id)?;
        Ok(self.engine.attempt_rate_limit(caller_id, &rule))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{Algorithm, EngineConfig, InMemoryRuleStore, ManualClock};
    use std::time::Duration;

    fn service() -> (LimitsService<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let engine = Arc::new(RateLimitEngine::with_clock(
            clock.clone(),
            EngineConfig::default(),
        ));
        let store: Arc<dyn RuleStore> = Arc::new(InMemoryRuleStore::new());
        (LimitsService::new(store, engine), clock)
    }

    fn api_users(limit: u64) -> RateLimitRule {
        RateLimitRule::new(
            "api-users",
            limit,
            "1m",
            Algorithm::SlidingWindow,
            "user:{{user_id}}",
        )
    }

    #[test]
    fn test_create_and_get() {
        let (service, _clock) = service();
        let created = service.create_rate_limit(api_users(200)).unwrap();

        assert_eq!(created, api_users(200));
        assert_eq!(service.get_rate_limit("api-users").unwrap(), created);
    }

    #[test]
    fn test_create_rejects_invalid_rule() {
        let (service, _clock) = service();
        let mut rule = api_users(200);
        rule.window = "forever".to_string();

        let err = service.create_rate_limit(rule).unwrap_err();
        assert!(matches!(err, LimiterError::Validation(_)));
        assert!(service.get_rate_limit("api-users").unwrap_err().is_not_found());
    }

    #[test]
    fn test_create_assigns_missing_id() {
        let (service, _clock) = service();
        let mut rule = api_users(5);
        rule.id = String::new();

        let created = service.create_rate_limit(rule).unwrap();
        assert!(!created.id.is_empty());
        assert!(uuid::Uuid::parse_str(&created.id).is_ok());
        assert_eq!(service.get_rate_limit(&created.id).unwrap(), created);
    }

    #[test]
    fn test_update_upserts() {
        let (service, _clock) = service();

        service.update_rate_limit(api_users(1)).unwrap();
        service.update_rate_limit(api_users(7)).unwrap();

        assert_eq!(service.get_rate_limit("api-users").unwrap().limit, 7);
    }

    #[test]
    fn test_update_requires_id_and_valid_rule() {
        let (service, _clock) = service();

        let mut rule = api_users(1);
        rule.id = String::new();
        assert!(matches!(
            service.update_rate_limit(rule),
            Err(LimiterError::Validation(_))
        ));

        assert!(matches!(
            service.update_rate_limit(api_users(0)),
            Err(LimiterError::Validation(_))
        ));
    }

    #[test]
    fn test_list_with_filter() {
        let (service, _clock) = service();
        service.create_rate_limit(api_users(10)).unwrap();
        service
            .create_rate_limit(RateLimitRule::new(
                "api-admins",
                10,
                "1h",
                Algorithm::FixedWindow,
                "admin:{{user_id}}",
            ))
            .unwrap();

        assert_eq!(service.list_rate_limits(None).unwrap().len(), 2);

        let filter = RateLimitFilter::new().with_algorithm(Algorithm::FixedWindow);
        let found = service.list_rate_limits(Some(&filter)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "api-admins");

        let invalid = RateLimitFilter::new().with_limit(0);
        assert!(service.list_rate_limits(Some(&invalid)).is_err());
    }

    #[test]
    fn test_delete_is_idempotent_and_forgets_windows() {
        let (service, _clock) = service();
        service.create_rate_limit(api_users(2)).unwrap();
        service.apply_rate_limit("api-users", "u1").unwrap();
        assert_eq!(service.engine().window_count(), 1);

        service.delete_rate_limit("api-users").unwrap();
        assert!(service.get_rate_limit("api-users").is_err());
        assert_eq!(service.engine().window_count(), 0);

        service.delete_rate_limit("api-users").unwrap();
        service.delete_rate_limit("missing").unwrap();
    }

    #[test]
    fn test_admission_scenario() {
        let (service, clock) = service();
        service.create_rate_limit(api_users(2)).unwrap();

        service.apply_rate_limit("api-users", "u1").unwrap();
        service.apply_rate_limit("api-users", "u1").unwrap();

        let outcome = service.check_rate_limit("api-users", "u1");
        assert!(!outcome.allowed);
        assert!(outcome.error.is_none());

        clock.advance(Duration::from_secs(61));
        assert!(service.check_rate_limit("api-users", "u1").allowed);
    }

    #[test]
    fn test_check_unknown_rule_fails_open() {
        let (service, _clock) = service();

        let outcome = service.check_rate_limit("missing", "u1");
        assert!(outcome.allowed);
        assert!(outcome.error.as_ref().is_some_and(|e| e.is_not_found()));
        assert!(outcome.into_result().unwrap_err().is_not_found());
    }

    #[test]
    fn test_apply_unknown_rule_records_nothing() {
        let (service, _clock) = service();

        let err = service.apply_rate_limit("missing", "u1").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(service.engine().window_count(), 0);
    }

    #[test]
    fn test_attempt() {
        let (service, _clock) = service();
        service.create_rate_limit(api_users(1)).unwrap();

        assert!(service.attempt_rate_limit("api-users", "u1").unwrap().allowed);
        assert!(!service.attempt_rate_limit("api-users", "u1").unwrap().allowed);
        assert!(service.attempt_rate_limit("missing", "u1").unwrap_err().is_not_found());
    }

    #[test]
    fn test_update_keeps_recorded_events() {
        let (service, _clock) = service();
        service.create_rate_limit(api_users(1)).unwrap();
        service.apply_rate_limit("api-users", "u1").unwrap();
        assert!(!service.check_rate_limit("api-users", "u1").allowed);

        // Raising the limit applies to events already recorded
        service.update_rate_limit(api_users(2)).unwrap();
        assert!(service.check_rate_limit("api-users", "u1").allowed);
    }

    #[test]
    fn test_sweep_after_widening_window_keeps_decision() {
        let (service, clock) = service();
        let mut rule = api_users(1);
        rule.window = "1s".to_string();
        service.create_rate_limit(rule.clone()).unwrap();
        service.apply_rate_limit("api-users", "u1").unwrap();

        rule.window = "1h".to_string();
        service.update_rate_limit(rule).unwrap();
        clock.advance(Duration::from_secs(3));

        assert_eq!(service.engine().sweep(), 0);
        assert!(!service.check_rate_limit("api-users", "u1").allowed);
    }
}
