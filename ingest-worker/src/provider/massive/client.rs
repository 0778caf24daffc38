//! REST client for the Massive API

use chrono::{DateTime, NaiveDate, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::market::MarketStatus;
use crate::provider::{ProviderError, ProviderResult, HTTP_TIMEOUT, RATE_LIMIT_BACKOFF};

use super::types::{
    AggsResponse, FinancialsResponse, FinancialsResult, MarketStatusResponse, NewsResponse,
    NewsResult, SnapshotResponse, SnapshotTicker,
};

/// Client for the delayed consolidated-tape REST API.
///
/// All requests carry the API key as a query parameter and share a 10 s
/// timeout. A rate-limited request sleeps out the window and is retried
/// exactly once.
pub struct MassiveClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl MassiveClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> ProviderResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Configuration(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    /// Current-day summary for every US ticker.
    pub async fn full_snapshot(&self) -> ProviderResult<Vec<SnapshotTicker>> {
        let response: SnapshotResponse = self
            .get_json("/v2/snapshot/locale/us/markets/stocks/tickers", &[])
            .await?;
        Ok(response.into_tickers())
    }

    /// One daily bar per ticker for a trading date.
    pub async fn grouped_daily(&self, date: NaiveDate) -> ProviderResult<Vec<super::AggBar>> {
        let path = format!("/v2/aggs/grouped/locale/us/market/stocks/{date}");
        let response: AggsResponse = self.get_json(&path, &[("adjusted", "true")]).await?;
        Ok(response.results.unwrap_or_default())
    }

    /// 1-minute aggregates for a ticker over `[from, to]`.
    pub async fn minute_range(
        &self,
        ticker: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> ProviderResult<Vec<super::AggBar>> {
        let path = format!(
            "/v2/aggs/ticker/{ticker}/range/1/minute/{}/{}",
            from.timestamp_millis(),
            to.timestamp_millis()
        );
        let limit = limit.to_string();
        let response: AggsResponse = self
            .get_json(&path, &[("adjusted", "true"), ("sort", "asc"), ("limit", &limit)])
            .await?;
        Ok(response.results.unwrap_or_default())
    }

    /// Daily aggregates for a ticker over `[from, to]`.
    pub async fn day_range(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> ProviderResult<Vec<super::AggBar>> {
        let path = format!("/v2/aggs/ticker/{ticker}/range/1/day/{from}/{to}");
        let response: AggsResponse = self
            .get_json(&path, &[("adjusted", "true"), ("sort", "asc")])
            .await?;
        Ok(response.results.unwrap_or_default())
    }

    /// Most recent news for a ticker.
    pub async fn ticker_news(&self, ticker: &str, limit: usize) -> ProviderResult<Vec<NewsResult>> {
        let limit = limit.to_string();
        let response: NewsResponse = self
            .get_json(
                "/v2/reference/news",
                &[
                    ("ticker", ticker),
                    ("limit", &limit),
                    ("sort", "published_utc"),
                    ("order", "desc"),
                ],
            )
            .await?;
        Ok(response.results.unwrap_or_default())
    }

    /// Reported financials for a ticker.
    ///
    /// A 403/404 on this endpoint means the ticker has no coverage on the
    /// current plan and is translated to [`ProviderError::NotAvailable`]
    /// for the caller to skip. Only financials gets this treatment; the
    /// other endpoints surface those statuses as request failures.
    pub async fn financials(
        &self,
        ticker: &str,
        limit: usize,
    ) -> ProviderResult<Vec<FinancialsResult>> {
        let limit = limit.to_string();
        let response: FinancialsResponse = match self
            .get_json("/vX/reference/financials", &[("ticker", ticker), ("limit", &limit)])
            .await
        {
            Ok(response) => response,
            Err(ProviderError::Request(message))
                if message.starts_with("HTTP 403") || message.starts_with("HTTP 404") =>
            {
                return Err(ProviderError::NotAvailable(message));
            }
            Err(e) => return Err(e),
        };
        Ok(response.results.unwrap_or_default())
    }

    /// Current market status from the authoritative endpoint.
    pub async fn market_status(&self) -> ProviderResult<MarketStatus> {
        let response: MarketStatusResponse = self.get_json("/v1/marketstatus/now", &[]).await?;
        Ok(MarketStatus {
            is_open: response.market == "open",
            early_hours: response.market == "extended-hours"
                && response.early_hours.unwrap_or(false),
            after_hours: response.market == "extended-hours"
                && response.after_hours.unwrap_or(false),
        })
    }

    /// GET with the shared 429 policy: back off once, retry once, then
    /// surface.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> ProviderResult<T> {
        match self.request(path, params).await {
            Err(ProviderError::RateLimit(message)) => {
                warn!(
                    "Rate limited on {}, backing off {:?} before one retry: {}",
                    path, RATE_LIMIT_BACKOFF, message
                );
                tokio::time::sleep(RATE_LIMIT_BACKOFF).await;
                match self.request(path, params).await {
                    Err(ProviderError::RateLimit(message)) => {
                        Err(ProviderError::Request(format!("still rate limited: {message}")))
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> ProviderResult<T> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        debug!("GET {}", path);

        let mut request = self.http.get(&url).query(&[("apiKey", self.api_key.as_str())]);
        if !params.is_empty() {
            request = request.query(params);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let status = response.status();
        match status {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED => {
                return Err(ProviderError::Authentication(format!("HTTP 401 on {path}")))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(ProviderError::RateLimit(format!("HTTP 429 on {path}")))
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                return Err(ProviderError::Request(format!("HTTP {status} on {path}: {body}")));
            }
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Parse(format!("{path}: {e}")))
    }
}
