//! Conversions between protobuf messages and domain types.

use tonic::metadata::MetadataValue;
use tonic::Status;

use super::proto::v1;
use crate::error::LimiterError;
use crate::ratelimit::{Decision, RateLimitFilter, RateLimitRule};

/// Metadata key carrying the fail-open decision on a `NOT_FOUND` check.
pub const ALLOWED_METADATA_KEY: &str = "x-ratelimit-allowed";

fn limit_from_proto(limit: i64) -> Result<u64, LimiterError> {
    u64::try_from(limit)
        .map_err(|_| LimiterError::Validation("limit must be greater than 0".to_string()))
}

impl TryFrom<v1::RateLimitRule> for RateLimitRule {
    type Error = LimiterError;

    fn try_from(rule: v1::RateLimitRule) -> Result<Self, Self::Error> {
        Ok(RateLimitRule {
            id: rule.id,
            limit: limit_from_proto(rule.limit)?,
            window: rule.window,
            algorithm: rule.algorithm.parse()?,
            key_pattern: rule.key_pattern,
        })
    }
}

impl From<RateLimitRule> for v1::RateLimitRule {
    fn from(rule: RateLimitRule) -> Self {
        v1::RateLimitRule {
            id: rule.id,
            limit: i64::try_from(rule.limit).unwrap_or(i64::MAX),
            window: rule.window,
            algorithm: rule.algorithm.as_str().to_string(),
            key_pattern: rule.key_pattern,
        }
    }
}

impl TryFrom<v1::ListRateLimitsRequest> for RateLimitFilter {
    type Error = LimiterError;

    fn try_from(request: v1::ListRateLimitsRequest) -> Result<Self, Self::Error> {
        Ok(RateLimitFilter {
            id: request.id,
            limit: request.limit.map(limit_from_proto).transpose()?,
            window: request.window,
            algorithm: request.algorithm.map(|a| a.parse()).transpose()?,
            key_pattern: request.key_pattern,
        })
    }
}

impl From<Decision> for v1::AttemptRateLimitResponse {
    fn from(decision: Decision) -> Self {
        v1::AttemptRateLimitResponse {
            allowed: decision.allowed,
            limit: decision.limit,
            remaining: decision.remaining,
            retry_after: decision.retry_after.map(|d| prost_types::Duration {
                seconds: d.as_secs() as i64,
                nanos: d.subsec_nanos() as i32,
            }),
        }
    }
}

impl From<LimiterError> for Status {
    fn from(err: LimiterError) -> Self {
        match err {
            LimiterError::Validation(msg) => Status::invalid_argument(msg),
            LimiterError::WindowParse(e) => Status::invalid_argument(e.to_string()),
            LimiterError::NotFound(id) => {
                Status::not_found(format!("rate limit rule not found: {}", id))
            }
            other => Status::internal(other.to_string()),
        }
    }
}

/// `NOT_FOUND` status for a check that was allowed because its rule is unknown.
pub fn fail_open_status(err: LimiterError) -> Status {
    let mut status = Status::from(err);
    status
        .metadata_mut()
        .insert(ALLOWED_METADATA_KEY, MetadataValue::from_static("true"));
    status
}
