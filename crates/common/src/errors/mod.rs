//! Error types for MediaWatch services
//!
//! Provides a single error enum shared by the datastore, broker, scoring
//! client and pipeline handlers, with:
//! - Distinct variants for different failure modes
//! - A failure class used to decide how a message outcome is reported
//! - Error codes for machine-readable log fields

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Payload errors (1xxx)
    MalformedPayload,
    UnknownPublisher,

    // Resource errors (4xxx)
    NotFound,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,
    TransactionTimeout,

    // External service errors (8xxx)
    UpstreamError,
    ScrapingError,
    ScoringError,
    MalformedResponse,
    QueueError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::MalformedPayload => 1001,
            ErrorCode::UnknownPublisher => 1002,

            ErrorCode::NotFound => 4001,

            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,
            ErrorCode::TransactionTimeout => 7003,

            ErrorCode::UpstreamError => 8001,
            ErrorCode::ScrapingError => 8002,
            ErrorCode::ScoringError => 8003,
            ErrorCode::MalformedResponse => 8004,
            ErrorCode::QueueError => 8005,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// How a failure is treated by the pipeline.
///
/// Every class still results in a nack when it escapes a handler; the class
/// decides log severity and which errors a handler may absorb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Broker, scraping HTTP, AI service unreachable
    Transport,
    /// Unparsable event payload or scoring response
    MalformedData,
    /// Author/news upsert or analysis persistence aborted
    Transactional,
    /// Configuration and programming errors
    Internal,
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Payload errors
    #[error("Malformed event payload: {message}")]
    MalformedPayload { message: String },

    #[error("Unknown publisher: media id {media_id}")]
    UnknownPublisher { media_id: i32 },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    #[error("Transaction exceeded deadline of {timeout_ms}ms")]
    TransactionTimeout { timeout_ms: u64 },

    // External service errors
    #[error("Scraping error: {message}")]
    Scraping { message: String },

    #[error("Scoring service error: {message}")]
    Scoring { message: String },

    #[error("Malformed scoring response: {message}")]
    MalformedResponse { message: String },

    #[error("Queue error: {message}")]
    QueueError { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::MalformedPayload { .. } => ErrorCode::MalformedPayload,
            AppError::UnknownPublisher { .. } => ErrorCode::UnknownPublisher,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::TransactionTimeout { .. } => ErrorCode::TransactionTimeout,
            AppError::Scraping { .. } => ErrorCode::ScrapingError,
            AppError::Scoring { .. } => ErrorCode::ScoringError,
            AppError::MalformedResponse { .. } => ErrorCode::MalformedResponse,
            AppError::QueueError { .. } => ErrorCode::QueueError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
        }
    }

    /// Get the failure class for this error
    pub fn class(&self) -> ErrorClass {
        match self {
            AppError::DatabaseConnection { .. } |
            AppError::Scraping { .. } |
            AppError::Scoring { .. } |
            AppError::QueueError { .. } |
            AppError::HttpClient(_) => ErrorClass::Transport,

            AppError::MalformedPayload { .. } |
            AppError::UnknownPublisher { .. } |
            AppError::MalformedResponse { .. } |
            AppError::Serialization(_) => ErrorClass::MalformedData,

            AppError::Database(_) |
            AppError::TransactionTimeout { .. } => ErrorClass::Transactional,

            AppError::NotFound { .. } |
            AppError::Internal { .. } |
            AppError::Configuration { .. } => ErrorClass::Internal,
        }
    }

    /// Whether redelivering the same message could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(self.class(), ErrorClass::Transport | ErrorClass::Transactional)
    }

    /// Shorthand for a malformed payload error
    pub fn malformed_payload(message: impl Into<String>) -> Self {
        AppError::MalformedPayload { message: message.into() }
    }

    /// Shorthand for a malformed scoring response error
    pub fn malformed_response(message: impl Into<String>) -> Self {
        AppError::MalformedResponse { message: message.into() }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string()
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::UnknownPublisher { media_id: 7 };
        assert_eq!(err.code(), ErrorCode::UnknownPublisher);
        assert_eq!(err.code().as_code(), 1002);
        assert_eq!(err.class(), ErrorClass::MalformedData);
    }

    #[test]
    fn test_scoring_errors_are_distinct() {
        let transport = AppError::Scoring { message: "connection reset".into() };
        let malformed = AppError::malformed_response("no json block");

        assert_eq!(transport.class(), ErrorClass::Transport);
        assert_eq!(malformed.class(), ErrorClass::MalformedData);
        assert_ne!(transport.code(), malformed.code());
        assert!(transport.is_transient());
        assert!(!malformed.is_transient());
    }

    #[test]
    fn test_transaction_errors() {
        let err = AppError::TransactionTimeout { timeout_ms: 10_000 };
        assert_eq!(err.class(), ErrorClass::Transactional);
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "Transaction exceeded deadline of 10000ms");
    }

    #[test]
    fn test_payload_error_from_serde() {
        let err: AppError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert_eq!(err.class(), ErrorClass::MalformedData);
    }
}
