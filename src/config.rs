//! Configuration management for the rate limiter.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::ratelimit::EngineConfig;

/// Prefix for environment variable overrides, e.g.
/// `RATELIMITER__SERVER__GRPC_ADDR=0.0.0.0:8081`.
const ENV_PREFIX: &str = "RATELIMITER";

/// Main configuration for the rate limiter service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// gRPC server address
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_addr: default_grpc_addr(),
        }
    }
}

fn default_grpc_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8081))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Path to a rules file seeded at startup
    #[serde(default)]
    pub rules_path: Option<String>,

    /// Seconds between idle window sweeps; 0 disables sweeping
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Windows idle for this many multiples of their duration are evicted
    #[serde(default = "default_idle_window_multiple")]
    pub idle_window_multiple: u32,

    /// Idle seconds before evicting windows with an unparseable duration
    #[serde(default = "default_idle_ttl")]
    pub default_idle_ttl_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            sweep_interval_secs: default_sweep_interval(),
            idle_window_multiple: default_idle_window_multiple(),
            default_idle_ttl_secs: default_idle_ttl(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_idle_window_multiple() -> u32 {
    2
}

fn default_idle_ttl() -> u64 {
    300
}

impl RateLimitingConfig {
    /// The sweep interval, or `None` when sweeping is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }

    /// Engine retention settings.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            idle_window_multiple: self.idle_window_multiple,
            default_idle_ttl: Duration::from_secs(self.default_idle_ttl_secs),
        }
    }
}

impl LimiterConfig {
    /// Load configuration from an optional file (format chosen by extension)
    /// layered under `RATELIMITER__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
