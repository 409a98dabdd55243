use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Application-wide error types for Driftnet.
#[derive(Error, Debug)]
pub enum AppError {
    /// Transport-level fetch failure without a status code.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Upstream answered with a non-success status.
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// Translation/LLM provider call failed.
    #[error("Provider '{provider}' error (HTTP {status_code}): {message}")]
    ProviderError {
        provider: String,
        message: String,
        status_code: u16,
        retryable: bool,
    },

    /// Rate limit exceeded (local token bucket or upstream 429).
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Request or item timed out.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// URL is disallowed by the domain's robots.txt.
    #[error("Disallowed by robots.txt: {0}")]
    RobotsDisallowed(String),

    /// Fetched content could not be used.
    #[error("Malformed content: {0}")]
    MalformedContent(String),

    /// URL could not be parsed or normalized.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// No job registered under this id.
    #[error("Unknown job: {0}")]
    UnknownJob(Uuid),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

/// Failure classes driving retry and domain backoff decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying under the backoff schedule.
    Transient,
    /// Never retried; recorded against the single item.
    Permanent,
}

impl AppError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AppError::HttpError(_)
            | AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::RateLimitExceeded
            | AppError::DatabaseError(_)
            | AppError::Generic(_) => ErrorClass::Transient,
            AppError::HttpStatus { status, .. } => {
                if *status == 408 || *status == 429 || *status >= 500 {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Permanent
                }
            }
            AppError::ProviderError { retryable, .. } => {
                if *retryable {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Permanent
                }
            }
            AppError::RobotsDisallowed(_)
            | AppError::MalformedContent(_)
            | AppError::InvalidUrl(_)
            | AppError::UnknownJob(_)
            | AppError::ConfigError(_)
            | AppError::SerializationError(_) => ErrorClass::Permanent,
        }
    }

    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Returns true if this error should count against a provider's breaker.
    pub fn should_trip_circuit(&self) -> bool {
        match self {
            AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::RateLimitExceeded
            | AppError::HttpError(_) => true,
            AppError::ProviderError {
                status_code,
                retryable,
                ..
            } => *status_code == 429 || *status_code >= 500 || *retryable,
            AppError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Provider failure helper that derives `retryable` from the status code.
    pub fn provider(provider: impl Into<String>, status_code: u16, message: impl Into<String>) -> Self {
        AppError::ProviderError {
            provider: provider.into(),
            message: message.into(),
            status_code,
            retryable: status_code == 429 || status_code >= 500,
        }
    }
}
