//! Batched, retrying writer for the time-series store.
//!
//! Initialisation is lazy: the first write fetches the database token from
//! the secret store and builds the HTTP client; subsequent writes reuse it.
//! `close()` releases the client and reverts to uninitialised.
//!
//! The store upserts by `(measurement, tag-set, timestamp)`; callers rely
//! on that to overwrite provisional bars with authoritative ones.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use ingest_common::{retry_with_backoff, ErrorCategory, ErrorClassification};

use super::point::{
    daily_point, fundamentals_point, news_point, quote_point, DataPoint,
};
use crate::schema::{DailyRecord, FundamentalsRecord, NewsRecord, QuoteRecord};
use crate::secrets::SecretsClient;

/// Points per write request
const WRITE_BATCH_SIZE: usize = 1000;
/// Attempts per batch
const WRITE_ATTEMPTS: u32 = 3;
/// Base delay between attempts; attempt `n` waits `n * base`
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
/// Per-request timeout
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum WriterError {
    #[error("Time-series store is not configured")]
    NotConfigured,

    #[error("Time-series store rejected credentials: {0}")]
    Auth(String),

    #[error("Write rejected: {0}")]
    Rejected(String),

    #[error("Write failed: {0}")]
    Transient(String),

    #[error("Secret resolution failed: {0}")]
    Secrets(#[from] crate::secrets::SecretsError),
}

impl ErrorClassification for WriterError {
    fn category(&self) -> ErrorCategory {
        match self {
            WriterError::NotConfigured => ErrorCategory::Configuration,
            WriterError::Auth(_) => ErrorCategory::Configuration,
            WriterError::Rejected(_) => ErrorCategory::Permanent,
            WriterError::Transient(_) => ErrorCategory::Transient,
            WriterError::Secrets(e) => e.category(),
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            WriterError::Transient(_) => Some(RETRY_BASE_DELAY),
            _ => None,
        }
    }
}

/// Connection settings for the store
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub endpoint: String,
    pub port: u16,
    pub database: String,
    pub secret_arn: String,
}

impl StoreSettings {
    pub fn is_configured(&self) -> bool {
        !self.endpoint.is_empty()
    }
}

struct Inner {
    http: reqwest::Client,
    write_url: String,
    token: String,
}

/// Writer for all four measurements.
pub struct TsWriter {
    settings: StoreSettings,
    secrets: Arc<SecretsClient>,
    inner: RwLock<Option<Inner>>,
}

impl TsWriter {
    pub fn new(settings: StoreSettings, secrets: Arc<SecretsClient>) -> Self {
        Self {
            settings,
            secrets,
            inner: RwLock::new(None),
        }
    }

    /// Whether the store endpoint is configured at all.
    pub fn is_configured(&self) -> bool {
        self.settings.is_configured()
    }

    /// Whether a live client currently exists.
    pub async fn is_initialized(&self) -> bool {
        self.inner.read().await.is_some()
    }

    async fn ensure_initialized(&self) -> Result<(), WriterError> {
        if !self.settings.is_configured() {
            return Err(WriterError::NotConfigured);
        }
        if self.inner.read().await.is_some() {
            return Ok(());
        }

        let mut guard = self.inner.write().await;
        if guard.is_some() {
            return Ok(());
        }

        let token = self
            .secrets
            .database_token(&self.settings.secret_arn)
            .await?;
        let http = reqwest::Client::builder()
            .timeout(WRITE_TIMEOUT)
            .build()
            .map_err(|e| WriterError::Transient(e.to_string()))?;
        let write_url = format!(
            "{}:{}/api/v3/write_lp?db={}&precision=nanosecond",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.port,
            self.settings.database
        );

        info!("Time-series writer connected to {}", self.settings.endpoint);
        *guard = Some(Inner {
            http,
            write_url,
            token,
        });
        Ok(())
    }

    /// Release the client and revert to uninitialised.
    pub async fn close(&self) {
        let mut guard = self.inner.write().await;
        if guard.take().is_some() {
            info!("Time-series writer closed");
        }
    }

    /// Write minute bars. Invalid bars are dropped with a warning; the
    /// number of bars actually written is returned.
    pub async fn write_quotes(&self, bars: &[QuoteRecord]) -> Result<usize, WriterError> {
        let points: Vec<DataPoint> = bars
            .iter()
            .filter(|bar| {
                if bar.is_valid() {
                    true
                } else {
                    warn!("Dropping invalid bar for {} at {}", bar.ticker, bar.time);
                    false
                }
            })
            .map(quote_point)
            .collect();
        let written = points.len();
        self.write_points(points).await?;
        Ok(written)
    }

    /// Write daily bars.
    pub async fn write_daily(&self, rows: &[DailyRecord]) -> Result<usize, WriterError> {
        let points: Vec<DataPoint> = rows
            .iter()
            .filter(|row| {
                if row.is_valid() {
                    true
                } else {
                    warn!("Dropping invalid daily bar for {} on {}", row.ticker, row.date);
                    false
                }
            })
            .map(daily_point)
            .collect();
        let written = points.len();
        self.write_points(points).await?;
        Ok(written)
    }

    /// Write news metadata records.
    pub async fn write_news(&self, items: &[NewsRecord]) -> Result<usize, WriterError> {
        let points: Vec<DataPoint> = items.iter().map(news_point).collect();
        let written = points.len();
        self.write_points(points).await?;
        Ok(written)
    }

    /// Write fundamentals records.
    pub async fn write_fundamentals(
        &self,
        rows: &[FundamentalsRecord],
    ) -> Result<usize, WriterError> {
        let points: Vec<DataPoint> = rows.iter().map(fundamentals_point).collect();
        let written = points.len();
        self.write_points(points).await?;
        Ok(written)
    }

    async fn write_points(&self, points: Vec<DataPoint>) -> Result<(), WriterError> {
        if points.is_empty() {
            return Ok(());
        }
        self.ensure_initialized().await?;

        for chunk in points.chunks(WRITE_BATCH_SIZE) {
            let body: String = chunk
                .iter()
                .map(DataPoint::to_line)
                .collect::<Vec<_>>()
                .join("\n");

            let result = retry_with_backoff(
                || self.send_batch(&body),
                WRITE_ATTEMPTS,
                RETRY_BASE_DELAY,
            )
            .await;

            if let Err(e) = result {
                if matches!(e, WriterError::Auth(_)) {
                    // Bad credentials will not recover on the same client.
                    self.close().await;
                }
                return Err(e);
            }
            debug!("Wrote batch of {} points", chunk.len());
        }
        Ok(())
    }

    async fn send_batch(&self, body: &str) -> Result<(), WriterError> {
        let guard = self.inner.read().await;
        let inner = guard.as_ref().ok_or(WriterError::NotConfigured)?;

        let response = inner
            .http
            .post(&inner.write_url)
            .bearer_auth(&inner.token)
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| WriterError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let detail = response.text().await.unwrap_or_default();
        match status.as_u16() {
            401 | 403 => Err(WriterError::Auth(detail)),
            400 | 422 => Err(WriterError::Rejected(detail)),
            _ => Err(WriterError::Transient(format!("HTTP {status}: {detail}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(WriterError::Transient("reset".into()).is_transient());
        assert!(WriterError::Rejected("bad line".into()).is_permanent());
        assert!(!WriterError::Auth("denied".into()).is_transient());
        assert_eq!(
            WriterError::NotConfigured.category(),
            ErrorCategory::Configuration
        );
    }

    #[test]
    fn test_store_settings_configured() {
        let settings = StoreSettings {
            endpoint: String::new(),
            port: 8181,
            database: "market_data".to_string(),
            secret_arn: String::new(),
        };
        assert!(!settings.is_configured());

        let settings = StoreSettings {
            endpoint: "http://influx".to_string(),
            ..settings
        };
        assert!(settings.is_configured());
    }
}
