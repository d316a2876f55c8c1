//! Limits backend trait for abstracting the service behind transports.

use async_trait::async_trait;

use super::clock::Clock;
use super::engine::Decision;
use super::rule::{RateLimitFilter, RateLimitRule};
use super::service::{CheckOutcome, LimitsService};
use crate::error::Result;

/// Trait for limits service implementations.
///
/// The gRPC layer is generic over this trait so it can be exercised against
/// any implementation, including test doubles.
#[async_trait]
pub trait LimitsBackend: Send + Sync {
    async fn create_rate_limit(&self, rule: RateLimitRule) -> Result<RateLimitRule>;

    async fn get_rate_limit(&self, id: &str) -> Result<RateLimitRule>;

    async fn update_rate_limit(&self, rule: RateLimitRule) -> Result<RateLimitRule>;

    async fn delete_rate_limit(&self, id: &str) -> Result<()>;

    async fn list_rate_limits(&self, filter: Option<RateLimitFilter>) -> Result<Vec<RateLimitRule>>;

    /// Check admission without recording.
    async fn check_rate_limit(&self, rule_id: &str, caller_id: &str) -> CheckOutcome;

    /// Record an event without checking.
    async fn apply_rate_limit(&self, rule_id: &str, caller_id: &str) -> Result<()>;

    /// Check and record atomically.
    async fn attempt_rate_limit(&self, rule_id: &str, caller_id: &str) -> Result<Decision>;
}

#[async_trait]
impl<C: Clock + 'static> LimitsBackend for LimitsService<C> {
    async fn create_rate_limit(&self, rule: RateLimitRule) -> Result<RateLimitRule> {
        LimitsService::create_rate_limit(self, rule)
    }

    async fn get_rate_limit(&self, id: &str) -> Result<RateLimitRule> {
        LimitsService::get_rate_limit(self, id)
    }

    async fn update_rate_limit(&self, rule: RateLimitRule) -> Result<RateLimitRule> {
        LimitsService::update_rate_limit(self, rule)
    }

    async fn delete_rate_limit(&self, id: &str) -> Result<()> {
        LimitsService::delete_rate_limit(self, id)
    }

    async fn list_rate_limits(
        &self,
        filter: Option<RateLimitFilter>,
    ) -> Result<Vec<RateLimitRule>> {
        LimitsService::list_rate_limits(self, filter.as_ref())
    }

    async fn check_rate_limit(&self, rule_id: &str, caller_id: &str) -> CheckOutcome {
        LimitsService::check_rate_limit(self, rule_id, caller_id)
    }

    async fn apply_rate_limit(&self, rule_id: &str, caller_id: &str) -> Result<()> {
        LimitsService::apply_rate_limit(self, rule_id, caller_id)
    }

    async fn attempt_rate_limit(&self, rule_id: &str, caller_id: &str) -> Result<Decision> {
        LimitsService::attempt_rate_limit(self, rule_id, caller_id)
    }
}
