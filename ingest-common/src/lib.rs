//! # Ingest Common
//!
//! Shared infrastructure for the market-data ingestion worker:
//!
//! - **Error classification**: errors self-describe their retry
//!   characteristics so callers can apply generic retry logic
//! - **Logging**: standardized `tracing` initialisation used by every
//!   binary in the workspace

pub mod error;
pub mod logging;

pub use error::{retry_with_backoff, ErrorCategory, ErrorClassification};
pub use logging::{init_logging, LogConfig, LogFormat, TimestampFormat};
