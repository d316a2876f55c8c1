//! Rate limit rule model, validation and filtering.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::window::parse_window;
use crate::error::{LimiterError, Result};

/// Counting algorithm applied by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Counts events in aligned, non-overlapping intervals
    FixedWindow,
    /// Counts events in the trailing window ending now
    SlidingWindow,
}

impl Algorithm {
    /// The wire name of this algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::FixedWindow => "fixed_window",
            Algorithm::SlidingWindow => "sliding_window",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = LimiterError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fixed_window" => Ok(Algorithm::FixedWindow),
            "sliding_window" => Ok(Algorithm::SlidingWindow),
            "" => Err(LimiterError::Validation("algorithm is required".to_string())),
            _ => Err(LimiterError::Validation(format!("invalid algorithm: {}", s))),
        }
    }
}

/// A user-managed rate limit rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Unique identifier, also the namespace of the rule's windows
    #[serde(default)]
    pub id: String,
    /// Maximum admitted events per window
    pub limit: u64,
    /// Window duration, e.g. `"1m"` or `"30s"`
    pub window: String,
    /// Counting algorithm
    pub algorithm: Algorithm,
    /// Caller scoping template, e.g. `"user:{{user_id}}"`; stored as-is
    pub key_pattern: String,
}

impl RateLimitRule {
    /// Create a new rule.
    pub fn new(
        id: impl Into<String>,
        limit: u64,
        window: impl Into<String>,
        algorithm: Algorithm,
        key_pattern: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            limit,
            window: window.into(),
            algorithm,
            key_pattern: key_pattern.into(),
        }
    }

    /// Check the rule invariants. The id is not checked here, callers decide
    /// whether an empty id is acceptable.
    pub fn validate(&self) -> Result<()> {
        validate_limit(self.limit)?;
        validate_window(&self.window)?;
        validate_key_pattern(&self.key_pattern)?;
        Ok(())
    }

    /// Parse the window into a duration.
    pub fn window_duration(&self) -> Result<Duration> {
        Ok(parse_window(&self.window)?)
    }

    /// Returns `true` if every field present in the filter equals the
    /// corresponding field of this rule.
    pub fn matches_filter(&self, filter: &RateLimitFilter) -> bool {
        filter.id.as_ref().map_or(true, |id| *id == self.id)
            && filter.limit.map_or(true, |limit| limit == self.limit)
            && filter.window.as_ref().map_or(true, |w| *w == self.window)
            && filter.algorithm.map_or(true, |a| a == self.algorithm)
            && filter
                .key_pattern
                .as_ref()
                .map_or(true, |k| *k == self.key_pattern)
    }
}

/// Query predicate over rules. Absent fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<Algorithm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_pattern: Option<String>,
}

impl RateLimitFilter {
    /// A filter that matches every rule.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_window(mut self, window: impl Into<String>) -> Self {
        self.window = Some(window.into());
        self
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    pub fn with_key_pattern(mut self, key_pattern: impl Into<String>) -> Self {
        self.key_pattern = Some(key_pattern.into());
        self
    }

    /// Returns `true` when no field is set.
    pub fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.limit.is_none()
            && self.window.is_none()
            && self.algorithm.is_none()
            && self.key_pattern.is_none()
    }

    /// Check that every present field would be valid on a rule.
    pub fn validate(&self) -> Result<()> {
        if let Some(ref id) = self.id {
            if id.is_empty() {
                return Err(LimiterError::Validation("id must not be empty".to_string()));
            }
        }
        if let Some(limit) = self.limit {
            validate_limit(limit)?;
        }
        if let Some(ref window) = self.window {
            validate_window(window)?;
        }
        if let Some(ref key_pattern) = self.key_pattern {
            validate_key_pattern(key_pattern)?;
        }
        Ok(())
    }
}

fn validate_limit(limit: u64) -> Result<()> {
    if limit == 0 {
        return Err(LimiterError::Validation(
            "limit must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_window(window: &str) -> Result<()> {
    if window.is_empty() {
        return Err(LimiterError::Validation("window is required".to_string()));
    }
    let duration = parse_window(window)
        .map_err(|e| LimiterError::Validation(format!("window is invalid: {}", e)))?;
    if duration.is_zero() {
        return Err(LimiterError::Validation(
            "window must be a positive duration".to_string(),
        ));
    }
    Ok(())
}

fn validate_key_pattern(key_pattern: &str) -> Result<()> {
    if key_pattern.is_empty() {
        return Err(LimiterError::Validation(
            "key pattern is required".to_string(),
        ));
    }
    Ok(())
}
