//! Normalized market data types
//!
//! These types represent the canonical format for all ingested data.
//! Provider-specific data is normalized to these types before storage.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Market identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Market {
    #[default]
    US,
    CN,
    HK,
}

impl Market {
    /// Tag value used in the time-series store
    pub fn as_str(&self) -> &'static str {
        match self {
            Market::US => "US",
            Market::CN => "CN",
            Market::HK => "HK",
        }
    }
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized 1-minute OHLCV bar
///
/// Identity in the store is `(ticker, market, time)`; a later write with
/// the same identity overwrites the earlier one. `time` is the bar start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuoteRecord {
    /// Bar start timestamp
    pub time: DateTime<Utc>,
    /// Uppercase symbol
    pub ticker: String,
    /// Market the symbol trades on
    pub market: Market,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
    /// Volume-weighted average price, when the producer supplies it
    pub vwap: Option<Decimal>,
    /// Trade count within the bar
    pub trades: Option<i64>,
}

impl QuoteRecord {
    /// A bar without a real timestamp or with zeroed prices carries no
    /// information and must not reach the store.
    pub fn is_valid(&self) -> bool {
        self.time.timestamp() > 0 && !self.open.is_zero() && !self.close.is_zero()
    }
}

/// Normalized daily bar
///
/// Identity is `(ticker, market, date)`. Written intraday by the snapshot
/// job (best effort) and rewritten by the end-of-day grouped query
/// (authoritative).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyRecord {
    /// Trading date (stored at midnight UTC)
    pub date: NaiveDate,
    pub ticker: String,
    pub market: Market,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
    pub vwap: Option<Decimal>,
    pub change: Option<Decimal>,
    pub change_percent: Option<Decimal>,
    pub previous_close: Option<Decimal>,
}

impl DailyRecord {
    /// Derive `change` / `change_percent` from open and close when the
    /// producer did not supply them.
    pub fn with_derived_change(mut self) -> Self {
        if self.change.is_none() {
            self.change = Some(self.close - self.open);
        }
        if self.change_percent.is_none() && !self.open.is_zero() {
            let change = self.change.unwrap_or(self.close - self.open);
            self.change_percent = Some(change / self.open * Decimal::from(100));
        }
        self
    }

    pub fn is_valid(&self) -> bool {
        !self.open.is_zero() && !self.close.is_zero()
    }
}

/// News sentiment, per the primary ticker's insight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "positive" => Some(Sentiment::Positive),
            "negative" => Some(Sentiment::Negative),
            "neutral" => Some(Sentiment::Neutral),
            _ => None,
        }
    }
}

/// News item metadata
///
/// Identity is `(id, ticker)`. The article body lives in the object store
/// at `s3_path`; the time-series record carries metadata only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsRecord {
    /// Upstream article id
    pub id: String,
    /// Primary ticker this record is filed under
    pub ticker: String,
    pub market: Market,
    /// Published timestamp
    pub time: DateTime<Utc>,
    pub title: String,
    pub url: String,
    /// Publisher name
    pub source: String,
    pub author: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub keywords: Vec<String>,
    /// All tickers the article mentions
    pub tickers: Vec<String>,
    pub sentiment: Option<Sentiment>,
    pub sentiment_reasoning: Option<String>,
    /// Object-store key of the uploaded body, set after upload
    pub s3_path: Option<String>,
}

/// Reporting period granularity for fundamentals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Quarterly,
    Annual,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Quarterly => "quarterly",
            PeriodType::Annual => "annual",
        }
    }
}

/// Quarterly/annual fundamentals
///
/// Identity is `(ticker, market, period_type, end_date)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundamentalsRecord {
    pub ticker: String,
    pub market: Market,
    pub period_type: PeriodType,
    /// Period end date
    pub end_date: NaiveDate,
    pub start_date: Option<NaiveDate>,
    pub filing_date: Option<NaiveDate>,
    pub fiscal_period: Option<String>,
    pub fiscal_year: Option<String>,
    pub company_name: Option<String>,

    // Income statement
    pub revenues: Option<Decimal>,
    pub cost_of_revenue: Option<Decimal>,
    pub gross_profit: Option<Decimal>,
    pub operating_expenses: Option<Decimal>,
    pub operating_income: Option<Decimal>,
    pub net_income: Option<Decimal>,
    pub eps_basic: Option<Decimal>,
    pub eps_diluted: Option<Decimal>,

    // Balance sheet
    pub total_assets: Option<Decimal>,
    pub total_liabilities: Option<Decimal>,
    pub total_equity: Option<Decimal>,
    pub current_assets: Option<Decimal>,
    pub current_liabilities: Option<Decimal>,
    pub long_term_debt: Option<Decimal>,

    // Cash flow
    pub operating_cash_flow: Option<Decimal>,
    pub investing_cash_flow: Option<Decimal>,
    pub financing_cash_flow: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn bar(open: Decimal, close: Decimal, epoch_secs: i64) -> QuoteRecord {
        QuoteRecord {
            time: Utc.timestamp_opt(epoch_secs, 0).unwrap(),
            ticker: "AAPL".to_string(),
            market: Market::US,
            open,
            high: dec!(101),
            low: dec!(99.5),
            close,
            volume: 12345,
            vwap: None,
            trades: None,
        }
    }

    #[test]
    fn test_quote_validity() {
        assert!(bar(dec!(100), dec!(100.8), 1_736_950_000).is_valid());
        assert!(!bar(dec!(0), dec!(100.8), 1_736_950_000).is_valid());
        assert!(!bar(dec!(100), dec!(0), 1_736_950_000).is_valid());
        assert!(!bar(dec!(100), dec!(100.8), 0).is_valid());
    }

    #[test]
    fn test_daily_derived_change() {
        let daily = DailyRecord {
            date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            ticker: "NVDA".to_string(),
            market: Market::US,
            open: dec!(100),
            high: dec!(110),
            low: dec!(95),
            close: dec!(105),
            volume: 1_000_000,
            vwap: None,
            change: None,
            change_percent: None,
            previous_close: None,
        }
        .with_derived_change();

        assert_eq!(daily.change, Some(dec!(5)));
        assert_eq!(daily.change_percent, Some(dec!(5)));
    }

    #[test]
    fn test_daily_change_not_overwritten() {
        let daily = DailyRecord {
            date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            ticker: "NVDA".to_string(),
            market: Market::US,
            open: dec!(100),
            high: dec!(110),
            low: dec!(95),
            close: dec!(105),
            volume: 1_000_000,
            vwap: None,
            change: Some(dec!(4.2)),
            change_percent: Some(dec!(4.2)),
            previous_close: Some(dec!(100.8)),
        }
        .with_derived_change();

        assert_eq!(daily.change, Some(dec!(4.2)));
        assert_eq!(daily.change_percent, Some(dec!(4.2)));
    }

    #[test]
    fn test_sentiment_parse() {
        assert_eq!(Sentiment::parse("positive"), Some(Sentiment::Positive));
        assert_eq!(Sentiment::parse("neutral"), Some(Sentiment::Neutral));
        assert_eq!(Sentiment::parse("bullish"), None);
    }
}
