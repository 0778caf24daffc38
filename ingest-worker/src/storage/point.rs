//! Point normalization and line-protocol encoding
//!
//! Tag values participate in point identity, so they are sanitized
//! aggressively: backslashes stripped, separator characters replaced with
//! underscores, length capped. Field text is capped and cleared of control
//! characters but otherwise preserved.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::schema::{DailyRecord, FundamentalsRecord, NewsRecord, QuoteRecord};

/// Minute-bar measurement
pub const MEASUREMENT_QUOTES: &str = "stock_quotes_raw";
/// Daily-bar measurement
pub const MEASUREMENT_DAILY: &str = "stock_quotes_aggregated";
/// News metadata measurement
pub const MEASUREMENT_NEWS: &str = "news";
/// Fundamentals measurement
pub const MEASUREMENT_FUNDAMENTALS: &str = "fundamentals";

/// Cap for general string fields
pub const GENERAL_TEXT_CAP: usize = 10_000;
/// Cap for strings destined for object-store metadata
pub const OBJECT_META_CAP: usize = 200;
/// Cap for tag values
const TAG_VALUE_CAP: usize = 256;

/// A field value in a point
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Decimal(Decimal),
    Integer(i64),
    Text(String),
    Boolean(bool),
}

impl FieldValue {
    fn encode(&self, out: &mut String) {
        match self {
            FieldValue::Decimal(d) => out.push_str(&d.to_string()),
            FieldValue::Integer(i) => {
                out.push_str(&i.to_string());
                out.push('i');
            }
            FieldValue::Text(s) => {
                out.push('"');
                for c in s.chars() {
                    if c == '"' || c == '\\' {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out.push('"');
            }
            FieldValue::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
        }
    }
}

/// One write-ready point
#[derive(Debug, Clone)]
pub struct DataPoint {
    pub measurement: &'static str,
    /// Sorted tag set; together with measurement and timestamp this is the
    /// point's identity
    pub tags: BTreeMap<&'static str, String>,
    pub fields: BTreeMap<&'static str, FieldValue>,
    pub timestamp: DateTime<Utc>,
}

impl DataPoint {
    /// Encode as one line-protocol line (nanosecond precision).
    pub fn to_line(&self) -> String {
        let mut line = String::with_capacity(128);
        line.push_str(self.measurement);
        for (key, value) in &self.tags {
            line.push(',');
            line.push_str(key);
            line.push('=');
            line.push_str(value);
        }
        line.push(' ');
        let mut first = true;
        for (key, value) in &self.fields {
            if !first {
                line.push(',');
            }
            first = false;
            line.push_str(key);
            line.push('=');
            value.encode(&mut line);
        }
        line.push(' ');
        line.push_str(
            &self
                .timestamp
                .timestamp_nanos_opt()
                .unwrap_or_else(|| self.timestamp.timestamp() * 1_000_000_000)
                .to_string(),
        );
        line
    }
}

/// Sanitize a tag value: strip backslashes, replace separator characters
/// with underscores, cap the length.
pub fn sanitize_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len().min(TAG_VALUE_CAP));
    for c in value.chars() {
        if out.len() + c.len_utf8() > TAG_VALUE_CAP {
            break;
        }
        match c {
            '\\' => {}
            ',' | '=' | ' ' | '\n' | '\r' => out.push('_'),
            _ => out.push(c),
        }
    }
    out
}

/// Sanitize field text: control characters become spaces, length capped.
pub fn sanitize_field_text(value: &str, cap: usize) -> String {
    let mut out = String::with_capacity(value.len().min(cap));
    for c in value.chars() {
        if out.len() + c.len_utf8() > cap {
            break;
        }
        if c.is_control() {
            out.push(' ');
        } else {
            out.push(c);
        }
    }
    out
}

fn text_field(value: &str) -> FieldValue {
    FieldValue::Text(sanitize_field_text(value, GENERAL_TEXT_CAP))
}

/// Normalize a minute bar.
pub fn quote_point(bar: &QuoteRecord) -> DataPoint {
    let mut tags = BTreeMap::new();
    tags.insert("ticker", sanitize_tag_value(&bar.ticker));
    tags.insert("market", bar.market.as_str().to_string());

    let mut fields = BTreeMap::new();
    fields.insert("open", FieldValue::Decimal(bar.open));
    fields.insert("high", FieldValue::Decimal(bar.high));
    fields.insert("low", FieldValue::Decimal(bar.low));
    fields.insert("close", FieldValue::Decimal(bar.close));
    fields.insert("volume", FieldValue::Integer(bar.volume));
    if let Some(vwap) = bar.vwap {
        fields.insert("vwap", FieldValue::Decimal(vwap));
    }
    if let Some(trades) = bar.trades {
        fields.insert("trades", FieldValue::Integer(trades));
    }

    DataPoint {
        measurement: MEASUREMENT_QUOTES,
        tags,
        fields,
        timestamp: bar.time,
    }
}

/// Normalize a daily bar; `change`/`change_percent` are derived when
/// absent.
pub fn daily_point(row: &DailyRecord) -> DataPoint {
    let row = row.clone().with_derived_change();

    let mut tags = BTreeMap::new();
    tags.insert("ticker", sanitize_tag_value(&row.ticker));
    tags.insert("market", row.market.as_str().to_string());

    let mut fields = BTreeMap::new();
    fields.insert("open", FieldValue::Decimal(row.open));
    fields.insert("high", FieldValue::Decimal(row.high));
    fields.insert("low", FieldValue::Decimal(row.low));
    fields.insert("close", FieldValue::Decimal(row.close));
    fields.insert("volume", FieldValue::Integer(row.volume));
    if let Some(vwap) = row.vwap {
        fields.insert("vwap", FieldValue::Decimal(vwap));
    }
    if let Some(change) = row.change {
        fields.insert("change", FieldValue::Decimal(change));
    }
    if let Some(pct) = row.change_percent {
        fields.insert("change_percent", FieldValue::Decimal(pct));
    }
    if let Some(prev) = row.previous_close {
        fields.insert("previous_close", FieldValue::Decimal(prev));
    }

    DataPoint {
        measurement: MEASUREMENT_DAILY,
        tags,
        fields,
        timestamp: row
            .date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or_else(Utc::now),
    }
}

/// Normalize a news record. The body text never travels here; the object
/// store is its single source of truth and the point carries metadata
/// plus the back-reference.
pub fn news_point(item: &NewsRecord) -> DataPoint {
    let mut tags = BTreeMap::new();
    tags.insert("ticker", sanitize_tag_value(&item.ticker));
    tags.insert("market", item.market.as_str().to_string());
    tags.insert("source", sanitize_tag_value(&item.source));

    let mut fields = BTreeMap::new();
    fields.insert("id", text_field(&item.id));
    fields.insert("title", text_field(&item.title));
    fields.insert("url", text_field(&item.url));
    if let Some(author) = &item.author {
        fields.insert("author", text_field(author));
    }
    if let Some(description) = &item.description {
        fields.insert("description", text_field(description));
    }
    if let Some(image_url) = &item.image_url {
        fields.insert("image_url", text_field(image_url));
    }
    if !item.keywords.is_empty() {
        fields.insert("keywords", text_field(&item.keywords.join(",")));
    }
    if !item.tickers.is_empty() {
        fields.insert("tickers", text_field(&item.tickers.join(",")));
    }
    if let Some(sentiment) = item.sentiment {
        fields.insert("sentiment", FieldValue::Text(sentiment.as_str().to_string()));
    }
    if let Some(reasoning) = &item.sentiment_reasoning {
        fields.insert("sentiment_reasoning", text_field(reasoning));
    }
    if let Some(s3_path) = &item.s3_path {
        fields.insert("s3_path", text_field(s3_path));
    }

    DataPoint {
        measurement: MEASUREMENT_NEWS,
        tags,
        fields,
        timestamp: item.time,
    }
}

/// Normalize a fundamentals record.
pub fn fundamentals_point(row: &FundamentalsRecord) -> DataPoint {
    let mut tags = BTreeMap::new();
    tags.insert("ticker", sanitize_tag_value(&row.ticker));
    tags.insert("market", row.market.as_str().to_string());
    tags.insert("periodType", row.period_type.as_str().to_string());

    let mut fields = BTreeMap::new();
    if let Some(d) = row.start_date {
        fields.insert("start_date", FieldValue::Text(d.to_string()));
    }
    if let Some(d) = row.filing_date {
        fields.insert("filing_date", FieldValue::Text(d.to_string()));
    }
    if let Some(p) = &row.fiscal_period {
        fields.insert("fiscal_period", text_field(p));
    }
    if let Some(y) = &row.fiscal_year {
        fields.insert("fiscal_year", text_field(y));
    }
    if let Some(name) = &row.company_name {
        fields.insert("company_name", text_field(name));
    }

    let scalars: [(&'static str, Option<Decimal>); 17] = [
        ("revenues", row.revenues),
        ("cost_of_revenue", row.cost_of_revenue),
        ("gross_profit", row.gross_profit),
        ("operating_expenses", row.operating_expenses),
        ("operating_income", row.operating_income),
        ("net_income", row.net_income),
        ("eps_basic", row.eps_basic),
        ("eps_diluted", row.eps_diluted),
        ("total_assets", row.total_assets),
        ("total_liabilities", row.total_liabilities),
        ("total_equity", row.total_equity),
        ("current_assets", row.current_assets),
        ("current_liabilities", row.current_liabilities),
        ("long_term_debt", row.long_term_debt),
        ("operating_cash_flow", row.operating_cash_flow),
        ("investing_cash_flow", row.investing_cash_flow),
        ("financing_cash_flow", row.financing_cash_flow),
    ];
    for (key, value) in scalars {
        if let Some(v) = value {
            fields.insert(key, FieldValue::Decimal(v));
        }
    }

    DataPoint {
        measurement: MEASUREMENT_FUNDAMENTALS,
        tags,
        fields,
        timestamp: row
            .end_date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or_else(Utc::now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Market;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn sample_bar() -> QuoteRecord {
        QuoteRecord {
            time: Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap(),
            ticker: "AAPL".to_string(),
            market: Market::US,
            open: dec!(100.02),
            high: dec!(101.00),
            low: dec!(99.48),
            close: dec!(100.82),
            volume: 12400,
            vwap: Some(dec!(100.5)),
            trades: Some(98),
        }
    }

    #[test]
    fn test_sanitize_tag_value() {
        assert_eq!(sanitize_tag_value("AAPL"), "AAPL");
        assert_eq!(sanitize_tag_value("a b,c=d"), "a_b_c_d");
        assert_eq!(sanitize_tag_value("back\\slash"), "backslash");
        assert_eq!(sanitize_tag_value("line\nbreak\r"), "line_break_");

        let long = "X".repeat(500);
        assert_eq!(sanitize_tag_value(&long).len(), 256);
    }

    #[test]
    fn test_sanitize_field_text() {
        assert_eq!(sanitize_field_text("plain", 100), "plain");
        assert_eq!(sanitize_field_text("a\tb\x00c", 100), "a b c");
        assert_eq!(sanitize_field_text("abcdef", 3), "abc");
    }

    #[test]
    fn test_quote_point_line() {
        let line = quote_point(&sample_bar()).to_line();

        assert!(line.starts_with("stock_quotes_raw,market=US,ticker=AAPL "));
        assert!(line.contains("open=100.02"));
        assert!(line.contains("close=100.82"));
        assert!(line.contains("volume=12400i"));
        assert!(line.contains("vwap=100.5"));
        assert!(line.contains("trades=98i"));
        assert!(line.ends_with(" 1736942400000000000"));
    }

    #[test]
    fn test_identical_identity_produces_identical_series_key() {
        // Two bars sharing (ticker, market, time) must map to the same
        // measurement + tag-set + timestamp so the later write overwrites
        // the earlier one.
        let fast = sample_bar();
        let mut delayed = sample_bar();
        delayed.open = dec!(100.00);
        delayed.volume = 12345;

        let a = quote_point(&fast);
        let b = quote_point(&delayed);
        assert_eq!(a.measurement, b.measurement);
        assert_eq!(a.tags, b.tags);
        assert_eq!(a.timestamp, b.timestamp);
        assert_ne!(a.fields, b.fields);
    }

    #[test]
    fn test_news_point_tags_and_optional_fields() {
        let item = NewsRecord {
            id: "n1".to_string(),
            ticker: "AAPL".to_string(),
            market: Market::US,
            time: Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap(),
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
        };

        let point = news_point(&item);
        assert_eq!(point.measurement, "news");
        assert_eq!(point.tags.get("ticker").unwrap(), "AAPL");
        assert_eq!(point.tags.get("market").unwrap(), "US");
        assert_eq!(point.tags.get("source").unwrap(), "S");
        assert!(!point.fields.contains_key("s3_path"));
        assert!(!point.fields.contains_key("author"));
    }

    #[test]
    fn test_text_field_escaping() {
        let mut out = String::new();
        FieldValue::Text("say \"hi\" \\ bye".to_string()).encode(&mut out);
        assert_eq!(out, "\"say \\\"hi\\\" \\\\ bye\"");
    }

    #[test]
    fn test_daily_point_midnight_timestamp() {
        let row = DailyRecord {
            date: chrono::NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            ticker: "NVDA".to_string(),
            market: Market::US,
            open: dec!(100),
            high: dec!(110),
            low: dec!(95),
            close: dec!(105),
            volume: 42,
            vwap: None,
            change: None,
            change_percent: None,
            previous_close: None,
        };
        let point = daily_point(&row);
        assert_eq!(point.measurement, "stock_quotes_aggregated");
        assert_eq!(
            point.timestamp,
            Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap()
        );
        // Derived at normalization time
        assert_eq!(point.fields.get("change"), Some(&FieldValue::Decimal(dec!(5))));
    }
}
