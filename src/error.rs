//! Error types for the rate limiter service.

use thiserror::Error;

use crate::ratelimit::WindowParseError;

/// Main error type for rate limiter operations.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// A rule or filter failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// No rule exists for the requested id
    #[error("Rate limit rule not found: {0}")]
    NotFound(String),

    /// A window duration could not be parsed
    #[error("Invalid window: {0}")]
    WindowParse(#[from] WindowParseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// gRPC server errors
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::transport::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LimiterError {
    /// Returns `true` for errors caused by an unknown rule id.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LimiterError::NotFound(_))
    }
}

impl From<config::ConfigError> for LimiterError {
    fn from(err: config::ConfigError) -> Self {
        LimiterError::Config(err.to_string())
    }
}

/// Result type alias for rate limiter operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
