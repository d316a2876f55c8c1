//! Rate limit rule files.
//!
//! Rules can be seeded at startup from a YAML or JSON document:
//!
//! ```yaml
//! rules:
//!   - id: api-users
//!     limit: 200
//!     window: 1m
//!     algorithm: sliding_window
//!     key_pattern: "user:{{user_id}}"
//! ```
//!
//! A bare YAML sequence of rules is accepted as well.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use super::clock::Clock;
use super::rule::RateLimitRule;
use super::service::LimitsService;
use crate::error::{LimiterError, Result};

/// A set of rules loaded from a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesFile {
    #[serde(default)]
    pub rules: Vec<RateLimitRule>,
}

impl RulesFile {
    /// Load rules from a file, choosing the format by extension.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&contents),
            _ => Self::from_yaml(&contents),
        }
    }

    /// Parse rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // A plain list of rules is the shortest form
        if let Ok(rules) = serde_yaml::from_str::<Vec<RateLimitRule>>(yaml) {
            return Ok(Self { rules });
        }

        serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::Config(format!("Failed to parse rules file: {}", e)))
    }

    /// Parse rules from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| LimiterError::Config(format!("Failed to parse rules file: {}", e)))
    }

    /// Create every rule through the service. Stops at the first invalid rule.
    pub fn seed<C: Clock>(&self, service: &LimitsService<C>) -> Result<usize> {
        for rule in &self.rules {
            service.create_rate_limit(rule.clone()).map_err(|e| match e {
                LimiterError::Validation(msg) => {
                    LimiterError::Validation(format!("rule {:?}: {}", rule.id, msg))
                }
                other => other,
            })?;
        }
        Ok(self.rules.len())
    }
}
