//! REST client for Alpaca market data

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use tracing::debug;

use crate::provider::{ProviderError, ProviderResult, HTTP_TIMEOUT, RATE_LIMIT_BACKOFF};
use crate::schema::QuoteRecord;

use super::types::BarsResponse;

/// Page size for the bars endpoint
const PAGE_LIMIT: usize = 10_000;

/// Client for the fast-feed REST API.
///
/// Credentials travel in headers; requests share a 10 s timeout and the
/// same single-retry 429 policy as the delayed client.
pub struct AlpacaClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl AlpacaClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> ProviderResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Configuration(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        })
    }

    /// 1-minute IEX bars for `[from, to]`, normalized, following
    /// pagination to the end of the window.
    pub async fn minute_bars(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ProviderResult<Vec<QuoteRecord>> {
        let mut bars = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let response = self
                .bars_page(symbol, from, to, page_token.as_deref())
                .await?;

            for bar in response.bars.unwrap_or_default() {
                if let Some(quote) = bar.to_quote(symbol) {
                    bars.push(quote);
                }
            }

            match response.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(bars)
    }

    async fn bars_page(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> ProviderResult<BarsResponse> {
        match self.request_page(symbol, from, to, page_token).await {
            Err(ProviderError::RateLimit(message)) => {
                debug!("Rate limited fetching bars for {symbol}, retrying once: {message}");
                tokio::time::sleep(RATE_LIMIT_BACKOFF).await;
                match self.request_page(symbol, from, to, page_token).await {
                    Err(ProviderError::RateLimit(message)) => {
                        Err(ProviderError::Request(format!("still rate limited: {message}")))
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn request_page(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> ProviderResult<BarsResponse> {
        let url = format!(
            "{}/v2/stocks/{symbol}/bars",
            self.base_url.trim_end_matches('/')
        );
        debug!("GET bars {} [{} .. {}]", symbol, from, to);

        let limit = PAGE_LIMIT.to_string();
        let from = from.to_rfc3339();
        let to = to.to_rfc3339();
        let mut params: Vec<(&str, &str)> = vec![
            ("timeframe", "1Min"),
            ("feed", "iex"),
            ("adjustment", "raw"),
            ("limit", &limit),
            ("start", &from),
            ("end", &to),
        ];
        if let Some(token) = page_token {
            params.push(("page_token", token));
        }

        let response = self
            .http
            .get(&url)
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.api_secret)
            .query(&params)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let status = response.status();
        match status {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(ProviderError::Authentication(format!("HTTP {status} on bars")))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(ProviderError::RateLimit("HTTP 429 on bars".to_string()))
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                return Err(ProviderError::Request(format!("HTTP {status} on bars: {body}")));
            }
        }

        response
            .json::<BarsResponse>()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))
    }
}
