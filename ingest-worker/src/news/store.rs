//! News store: object-store bodies plus time-series metadata records

use std::sync::Arc;
use std::time::Duration;

use aws_sdk_s3::primitives::ByteStream;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::provider::massive::NewsInsight;
use crate::schema::NewsRecord;
use crate::storage::{sanitize_field_text, TsWriter, WriterError, OBJECT_META_CAP};

use super::extract::extract_article_text;

/// Article fetch timeout
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Extracted content shorter than this is treated as boilerplate
const MIN_CONTENT_LEN: usize = 100;
/// Extracted content cap
const MAX_CONTENT_LEN: usize = 50_000;

#[derive(Error, Debug)]
pub enum NewsError {
    #[error("Article fetch failed: {0}")]
    Fetch(String),

    #[error("Object upload failed: {0}")]
    Upload(String),

    #[error(transparent)]
    Write(#[from] WriterError),
}

/// A news record together with every per-ticker insight the upstream
/// attached. The record keeps only the primary ticker's insight; the rest
/// are preserved in the object-store body.
#[derive(Debug, Clone)]
pub struct NewsItem {
    pub record: NewsRecord,
    pub insights: Vec<NewsInsight>,
}

impl From<NewsRecord> for NewsItem {
    fn from(record: NewsRecord) -> Self {
        Self {
            record,
            insights: Vec::new(),
        }
    }
}

/// Persists news items: body to the object store (when configured),
/// metadata via the time-series writer.
pub struct NewsStore {
    http: reqwest::Client,
    s3: Option<aws_sdk_s3::Client>,
    bucket: String,
    writer: Arc<TsWriter>,
}

impl NewsStore {
    /// Build the store. An empty bucket disables the object-store path;
    /// metadata records are still written.
    pub async fn connect(region: &str, bucket: &str, writer: Arc<TsWriter>) -> Self {
        let s3 = if bucket.is_empty() {
            info!("Object store not configured; news bodies will not be persisted");
            None
        } else {
            let config = aws_config::from_env()
                .region(aws_config::Region::new(region.to_string()))
                .load()
                .await;
            Some(aws_sdk_s3::Client::new(&config))
        };

        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
                 Chrome/120.0 Safari/537.36",
            )
            .build()
            .unwrap_or_default();

        Self {
            http,
            s3,
            bucket: bucket.to_string(),
            writer,
        }
    }

    /// Object key for a record: `raw/news/<ticker>/<YYYY-MM-DD>/<id>.json`.
    pub fn object_key(record: &NewsRecord) -> String {
        format!(
            "raw/news/{}/{}/{}.json",
            record.ticker,
            record.time.format("%Y-%m-%d"),
            record.id
        )
    }

    /// Persist a batch. Item failures are logged and skipped; the number
    /// of metadata records written is returned.
    pub async fn save_news(&self, items: Vec<NewsItem>, fetch_content: bool) -> usize {
        let mut written = 0;
        for item in items {
            let ticker = item.record.ticker.clone();
            let id = item.record.id.clone();
            match self.save_item(item, fetch_content).await {
                Ok(()) => written += 1,
                Err(e) => warn!("Skipping news item {} for {}: {}", id, ticker, e),
            }
        }
        written
    }

    async fn save_item(&self, item: NewsItem, fetch_content: bool) -> Result<(), NewsError> {
        let mut record = item.record;

        if let Some(s3) = &self.s3 {
            let content = if fetch_content {
                self.fetch_content(&record.url).await
            } else {
                None
            };
            let key = Self::object_key(&record);
            self.upload_body(s3, &key, &record, &item.insights, content.as_deref())
                .await?;
            record.s3_path = Some(key);
        }

        // Per-record write: one unwritable record must not take down the
        // rest of the batch.
        self.writer.write_news(std::slice::from_ref(&record)).await?;
        Ok(())
    }

    /// Fetch and extract the article text. Failures and boilerplate-length
    /// extractions yield `None`; the body is still uploaded without
    /// content.
    async fn fetch_content(&self, url: &str) -> Option<String> {
        let response = match self.http.get(url).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!("Article fetch for {} returned HTTP {}", url, r.status());
                return None;
            }
            Err(e) => {
                debug!("Article fetch for {} failed: {}", url, e);
                return None;
            }
        };

        let html = response.text().await.ok()?;
        let mut text = extract_article_text(&html);
        if text.len() < MIN_CONTENT_LEN {
            debug!("Extracted content too short ({} chars) for {}", text.len(), url);
            return None;
        }
        if text.len() > MAX_CONTENT_LEN {
            text.truncate(MAX_CONTENT_LEN);
        }
        Some(text)
    }

    async fn upload_body(
        &self,
        s3: &aws_sdk_s3::Client,
        key: &str,
        record: &NewsRecord,
        insights: &[NewsInsight],
        content: Option<&str>,
    ) -> Result<(), NewsError> {
        let mut body = json!({
            "id": record.id,
            "ticker": record.ticker,
            "time": record.time.to_rfc3339(),
            "title": record.title,
            "url": record.url,
            "source": record.source,
            "author": record.author,
            "description": record.description,
            "imageUrl": record.image_url,
            "keywords": record.keywords,
            "tickers": record.tickers,
            "insights": insights,
        });
        if let Some(content) = content {
            body["content"] = json!(content);
        }

        let bytes = serde_json::to_vec(&body).map_err(|e| NewsError::Upload(e.to_string()))?;

        s3.put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type("application/json")
            .metadata("news-id", sanitize_metadata(&record.id))
            .metadata("ticker", sanitize_metadata(&record.ticker))
            .metadata("source", sanitize_metadata(&record.source))
            .metadata("published-at", sanitize_metadata(&record.time.to_rfc3339()))
            .metadata(
                "sentiment",
                sanitize_metadata(record.sentiment.map(|s| s.as_str()).unwrap_or("none")),
            )
            .metadata("has-content", if content.is_some() { "true" } else { "false" })
            .send()
            .await
            .map_err(|e| NewsError::Upload(e.to_string()))?;

        debug!("Uploaded news body {}", key);
        Ok(())
    }
}

/// Object metadata must be ASCII; replace anything else and cap the
/// length.
fn sanitize_metadata(value: &str) -> String {
    let ascii: String = value
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '_' })
        .collect();
    sanitize_field_text(&ascii, OBJECT_META_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Market;
    use chrono::TimeZone;

    fn record() -> NewsRecord {
        NewsRecord {
            id: "n1".to_string(),
            ticker: "AAPL".to_string(),
            market: Market::US,
            time: chrono::Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap(),
            title: "t".to_string(),
            url: "https://x/y".to_string(),
            source: "S".to_string(),
            author: None,
            description: None,
            image_url: None,
            keywords: vec![],
            tickers: vec![],
            sentiment: None,
            sentiment_reasoning: None,
            s3_path: None,
        }
    }

    #[test]
    fn test_object_key_layout() {
        assert_eq!(
            NewsStore::object_key(&record()),
            "raw/news/AAPL/2025-01-15/n1.json"
        );
    }

    #[test]
    fn test_sanitize_metadata() {
        assert_eq!(sanitize_metadata("plain"), "plain");
        assert_eq!(sanitize_metadata("Bör\u{202e}se"), "B_r_se");
        assert_eq!(sanitize_metadata(&"x".repeat(500)).len(), 200);
    }
}
