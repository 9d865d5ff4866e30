//! Error types for Showdown
//!
//! Provides a single error taxonomy shared by every stage:
//! - Fatal errors (bad input, bad configuration, broken partitions)
//! - Recoverable external-service errors (retried, then excluded)
//! - Error codes for machine-readable reporting

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Input errors (1xxx)
    InputError,

    // Configuration errors (2xxx)
    ConfigurationError,
    ConfigSourceError,

    // External service errors (8xxx)
    EmbeddingUnavailable,
    ExternalServiceError,
    UpstreamError,
    Timeout,

    // Internal errors (9xxx)
    AggregationError,
    SerializationError,
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::InputError => 1001,

            ErrorCode::ConfigurationError => 2001,
            ErrorCode::ConfigSourceError => 2002,

            ErrorCode::EmbeddingUnavailable => 8001,
            ErrorCode::ExternalServiceError => 8002,
            ErrorCode::UpstreamError => 8003,
            ErrorCode::Timeout => 8004,

            ErrorCode::AggregationError => 9001,
            ErrorCode::SerializationError => 9002,
            ErrorCode::InternalError => 9999,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Document empty or shorter than the absolute minimum
    #[error("Input error: {message}")]
    Input { message: String },

    /// A configuration value is outside its valid range
    #[error("Configuration error: {field}: {message}")]
    Configuration { field: String, message: String },

    #[error("Configuration source error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Embedding provider unavailable: {message}")]
    EmbeddingUnavailable { message: String },

    #[error("External service error ({service}): {message}")]
    ExternalService { service: String, message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Deadline exceeded during {stage}")]
    Timeout { stage: String },

    /// Inconsistent chunk partition detected while computing metrics
    #[error("Aggregation error in {strategy}: {message}")]
    Aggregation { strategy: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Input { .. } => ErrorCode::InputError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Config(_) => ErrorCode::ConfigSourceError,
            AppError::EmbeddingUnavailable { .. } => ErrorCode::EmbeddingUnavailable,
            AppError::ExternalService { .. } => ErrorCode::ExternalServiceError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Timeout { .. } => ErrorCode::Timeout,
            AppError::Aggregation { .. } => ErrorCode::AggregationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Internal { .. } => ErrorCode::InternalError,
        }
    }

    /// Whether a bounded retry may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::EmbeddingUnavailable { .. }
                | AppError::ExternalService { .. }
                | AppError::HttpClient(_)
        )
    }

    /// Whether the whole run must stop
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Input { .. }
                | AppError::Configuration { .. }
                | AppError::Config(_)
                | AppError::Aggregation { .. }
        )
    }

    pub fn input(message: impl Into<String>) -> Self {
        AppError::Input { message: message.into() }
    }

    pub fn configuration(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Configuration {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn aggregation(strategy: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Aggregation {
            strategy: strategy.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Input {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::input("empty document");
        assert_eq!(err.code(), ErrorCode::InputError);
        assert_eq!(err.code().as_code(), 1001);
    }

    #[test]
    fn test_fatal_errors() {
        assert!(AppError::input("x").is_fatal());
        assert!(AppError::configuration("chunking.target_size", "out of range").is_fatal());
        assert!(AppError::aggregation("fixed_size", "gap at 10").is_fatal());
        assert!(!AppError::external("llm", "503").is_fatal());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(AppError::external("llm", "503").is_retryable());
        assert!(AppError::EmbeddingUnavailable { message: "down".into() }.is_retryable());
        assert!(!AppError::Timeout { stage: "retrieval".into() }.is_retryable());
        assert!(!AppError::input("x").is_retryable());
    }

    #[test]
    fn test_display_includes_field() {
        let err = AppError::configuration("run.timeout_secs", "must be >= 1");
        assert!(err.to_string().contains("run.timeout_secs"));
    }
}
