//! Upstream data providers
//!
//! Each provider module owns its wire types, REST client, and
//! normalization into the canonical schema. The streaming connections that
//! consume provider wire formats live in [`crate::feed`].

pub mod alpaca;
pub mod massive;

use std::time::Duration;

use thiserror::Error;

use ingest_common::{ErrorCategory, ErrorClassification};

/// Provider error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProviderError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Request error: {0}")]
    Request(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Data not available: {0}")]
    NotAvailable(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ErrorClassification for ProviderError {
    fn category(&self) -> ErrorCategory {
        match self {
            ProviderError::Connection(_) => ErrorCategory::Transient,
            ProviderError::Authentication(_) => ErrorCategory::Configuration,
            ProviderError::Request(_) => ErrorCategory::Transient,
            ProviderError::Parse(_) => ErrorCategory::Permanent,
            ProviderError::RateLimit(_) => ErrorCategory::ResourceExhausted,
            ProviderError::NotAvailable(_) => ErrorCategory::Permanent,
            ProviderError::Configuration(_) => ErrorCategory::Configuration,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            ProviderError::Connection(_) => Some(Duration::from_secs(2)),
            ProviderError::Request(_) => Some(Duration::from_millis(500)),
            ProviderError::RateLimit(_) => Some(Duration::from_secs(60)),
            _ => None,
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Per-request timeout shared by all provider clients
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Back-off applied before the single retry of a rate-limited request
pub const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(60);
