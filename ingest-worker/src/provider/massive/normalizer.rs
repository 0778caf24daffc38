//! Normalization from Massive wire types to canonical records

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::warn;

use crate::schema::{
    DailyRecord, FundamentalsRecord, Market, NewsRecord, PeriodType, QuoteRecord, Sentiment,
};

use super::types::{AggBar, AmEvent, FinancialsResult, NewsResult, SnapshotTicker};

fn millis_to_utc(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

fn volume_to_i64(volume: Option<Decimal>) -> i64 {
    volume.and_then(|v| v.round().to_i64()).unwrap_or(0)
}

/// Aggregate bar → minute record. Returns `None` (with a warning) when a
/// required field is missing.
pub fn agg_to_quote(ticker: &str, bar: &AggBar) -> Option<QuoteRecord> {
    let (Some(start_ms), Some(open), Some(close)) = (bar.start_ms, bar.open, bar.close) else {
        warn!("Dropping incomplete minute bar for {}", ticker);
        return None;
    };
    let time = millis_to_utc(start_ms)?;

    Some(QuoteRecord {
        time,
        ticker: ticker.to_string(),
        market: Market::US,
        open,
        high: bar.high.unwrap_or(open.max(close)),
        low: bar.low.unwrap_or(open.min(close)),
        close,
        volume: volume_to_i64(bar.volume),
        vwap: bar.vwap,
        trades: bar.trades,
    })
}

/// Grouped/daily aggregate bar → daily record for a known trading date.
pub fn agg_to_daily(ticker: &str, date: NaiveDate, bar: &AggBar) -> Option<DailyRecord> {
    let (Some(open), Some(close)) = (bar.open, bar.close) else {
        warn!("Dropping incomplete daily bar for {}", ticker);
        return None;
    };

    Some(
        DailyRecord {
            date,
            ticker: ticker.to_string(),
            market: Market::US,
            open,
            high: bar.high.unwrap_or(open.max(close)),
            low: bar.low.unwrap_or(open.min(close)),
            close,
            volume: volume_to_i64(bar.volume),
            vwap: bar.vwap,
            change: None,
            change_percent: None,
            previous_close: None,
        }
        .with_derived_change(),
    )
}

/// Daily-range aggregate bar → daily record, deriving the date from the
/// bar's own start timestamp.
pub fn agg_to_daily_from_ts(ticker: &str, bar: &AggBar) -> Option<DailyRecord> {
    let date = bar.start_ms.and_then(millis_to_utc)?.date_naive();
    agg_to_daily(ticker, date, bar)
}

/// Snapshot entry → intraday best-effort daily record.
pub fn snapshot_to_daily(entry: &SnapshotTicker, date: NaiveDate) -> Option<DailyRecord> {
    let day = entry.day.as_ref()?;
    let (Some(open), Some(close)) = (day.open, day.close) else {
        return None;
    };
    if open.is_zero() && close.is_zero() {
        // The snapshot includes symbols that have not traded today.
        return None;
    }

    Some(
        DailyRecord {
            date,
            ticker: entry.ticker.clone(),
            market: Market::US,
            open,
            high: day.high.unwrap_or(open.max(close)),
            low: day.low.unwrap_or(open.min(close)),
            close,
            volume: volume_to_i64(day.volume),
            vwap: day.vwap,
            change: entry.todays_change,
            change_percent: entry.todays_change_percent,
            previous_close: entry.prev_day.as_ref().and_then(|d| d.close),
        }
        .with_derived_change(),
    )
}

/// Streaming aggregate-minute event → minute record.
pub fn am_to_quote(event: &AmEvent) -> Option<QuoteRecord> {
    let (Some(start_ms), Some(open), Some(close)) = (event.start_ms, event.open, event.close)
    else {
        warn!("Dropping incomplete aggregate-minute event for {}", event.sym);
        return None;
    };
    let time = millis_to_utc(start_ms)?;

    Some(QuoteRecord {
        time,
        ticker: event.sym.clone(),
        market: Market::US,
        open,
        high: event.high.unwrap_or(open.max(close)),
        low: event.low.unwrap_or(open.min(close)),
        close,
        volume: volume_to_i64(event.volume),
        vwap: event.vwap,
        trades: event.trades,
    })
}

/// News item → metadata record for `ticker`.
///
/// Only the insight for the primary ticker lands in the record; the
/// remaining insights stay in the object-store body.
pub fn news_to_record(item: &NewsResult, ticker: &str) -> Option<NewsRecord> {
    let time = DateTime::parse_from_rfc3339(&item.published_utc)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()?;

    let insight = item
        .insights
        .as_ref()
        .and_then(|insights| insights.iter().find(|i| i.ticker == ticker));

    Some(NewsRecord {
        id: item.id.clone(),
        ticker: ticker.to_string(),
        market: Market::US,
        time,
        title: item.title.clone(),
        url: item.article_url.clone(),
        source: item
            .publisher
            .as_ref()
            .and_then(|p| p.name.clone())
            .unwrap_or_else(|| "unknown".to_string()),
        author: item.author.clone(),
        description: item.description.clone(),
        image_url: item.image_url.clone(),
        keywords: item.keywords.clone().unwrap_or_default(),
        tickers: item.tickers.clone().unwrap_or_default(),
        sentiment: insight
            .and_then(|i| i.sentiment.as_deref())
            .and_then(Sentiment::parse),
        sentiment_reasoning: insight.and_then(|i| i.sentiment_reasoning.clone()),
        s3_path: None,
    })
}

/// Reported period → fundamentals record.
pub fn financials_to_record(ticker: &str, result: &FinancialsResult) -> Option<FundamentalsRecord> {
    let end_date = result
        .end_date
        .as_deref()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())?;
    let parse_date =
        |value: &Option<String>| -> Option<NaiveDate> {
            value
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        };

    let period_type = match result.timeframe.as_deref() {
        Some("annual") => PeriodType::Annual,
        _ => PeriodType::Quarterly,
    };

    let statements = result.financials.clone().unwrap_or_default();
    let income = statements.income_statement.unwrap_or_default();
    let balance = statements.balance_sheet.unwrap_or_default();
    let cash_flow = statements.cash_flow_statement.unwrap_or_default();
    let value = |map: &std::collections::HashMap<String, super::types::FinancialValue>,
                 key: &str| map.get(key).and_then(|v| v.value);

    Some(FundamentalsRecord {
        ticker: ticker.to_string(),
        market: Market::US,
        period_type,
        end_date,
        start_date: parse_date(&result.start_date),
        filing_date: parse_date(&result.filing_date),
        fiscal_period: result.fiscal_period.clone(),
        fiscal_year: result.fiscal_year.clone(),
        company_name: result.company_name.clone(),

        revenues: value(&income, "revenues"),
        cost_of_revenue: value(&income, "cost_of_revenue"),
        gross_profit: value(&income, "gross_profit"),
        operating_expenses: value(&income, "operating_expenses"),
        operating_income: value(&income, "operating_income_loss"),
        net_income: value(&income, "net_income_loss"),
        eps_basic: value(&income, "basic_earnings_per_share"),
        eps_diluted: value(&income, "diluted_earnings_per_share"),

        total_assets: value(&balance, "assets"),
        total_liabilities: value(&balance, "liabilities"),
        total_equity: value(&balance, "equity"),
        current_assets: value(&balance, "current_assets"),
        current_liabilities: value(&balance, "current_liabilities"),
        long_term_debt: value(&balance, "long_term_debt"),

        operating_cash_flow: value(&cash_flow, "net_cash_flow_from_operating_activities"),
        investing_cash_flow: value(&cash_flow, "net_cash_flow_from_investing_activities"),
        financing_cash_flow: value(&cash_flow, "net_cash_flow_from_financing_activities"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use rust_decimal_macros::dec;

    #[test]
    fn test_am_to_quote_maps_all_fields() {
        let frame = r#"{"ev":"AM","sym":"AAPL","s":1736942400000,"o":100.02,"h":101.0,"l":99.48,"c":100.82,"v":12400,"vw":100.5,"z":98}"#;
        let messages = super::super::parse_ws_frame(frame).unwrap();
        let super::super::WsMessage::AggregateMinute(am) = &messages[0] else {
            panic!("expected AM event");
        };

        let quote = am_to_quote(am).unwrap();
        assert_eq!(quote.ticker, "AAPL");
        assert_eq!(quote.time.hour(), 12);
        assert_eq!(quote.open, dec!(100.02));
        assert_eq!(quote.close, dec!(100.82));
        assert_eq!(quote.volume, 12400);
        assert_eq!(quote.vwap, Some(dec!(100.5)));
        assert_eq!(quote.trades, Some(98));
    }

    #[test]
    fn test_am_to_quote_drops_incomplete() {
        let am = AmEvent {
            sym: "AAPL".to_string(),
            start_ms: Some(1736942400000),
            open: None,
            high: None,
            low: None,
            close: Some(dec!(1)),
            volume: None,
            vwap: None,
            trades: None,
        };
        assert!(am_to_quote(&am).is_none());
    }

    #[test]
    fn test_snapshot_skips_untraded_symbols() {
        let entry: SnapshotTicker = serde_json::from_str(
            r#"{"ticker":"QUIET","day":{"o":0,"h":0,"l":0,"c":0,"v":0}}"#,
        )
        .unwrap();
        assert!(snapshot_to_daily(&entry, NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()).is_none());
    }

    #[test]
    fn test_snapshot_to_daily() {
        let entry: SnapshotTicker = serde_json::from_str(
            r#"{"ticker":"AAPL","day":{"o":100,"h":102,"l":99,"c":101,"v":5000000,"vw":100.7},
                "todaysChange":1.0,"todaysChangePerc":1.0,"prevDay":{"c":100}}"#,
        )
        .unwrap();
        let daily =
            snapshot_to_daily(&entry, NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()).unwrap();
        assert_eq!(daily.ticker, "AAPL");
        assert_eq!(daily.previous_close, Some(dec!(100)));
        assert_eq!(daily.change, Some(dec!(1.0)));
    }

    #[test]
    fn test_news_primary_insight_only() {
        let item: NewsResult = serde_json::from_str(
            r#"{"id":"n1","publisher":{"name":"Newswire"},"title":"Chips rally",
                "published_utc":"2025-01-15T10:00:00Z","article_url":"https://x/y",
                "tickers":["NVDA","AMD"],
                "insights":[
                  {"ticker":"NVDA","sentiment":"positive","sentiment_reasoning":"strong guide"},
                  {"ticker":"AMD","sentiment":"negative"}
                ]}"#,
        )
        .unwrap();

        let record = news_to_record(&item, "NVDA").unwrap();
        assert_eq!(record.sentiment, Some(Sentiment::Positive));
        assert_eq!(record.sentiment_reasoning.as_deref(), Some("strong guide"));
        assert_eq!(record.source, "Newswire");
        assert_eq!(record.tickers, vec!["NVDA", "AMD"]);

        let record = news_to_record(&item, "AMD").unwrap();
        assert_eq!(record.sentiment, Some(Sentiment::Negative));
        assert!(record.sentiment_reasoning.is_none());
    }

    #[test]
    fn test_financials_to_record() {
        let result: FinancialsResult = serde_json::from_str(
            r#"{"end_date":"2024-12-28","start_date":"2024-09-29","filing_date":"2025-01-31",
                "timeframe":"quarterly","fiscal_period":"Q1","fiscal_year":"2025",
                "company_name":"Apple Inc.",
                "financials":{
                  "income_statement":{
                    "revenues":{"value":124300000000},
                    "net_income_loss":{"value":36330000000},
                    "basic_earnings_per_share":{"value":2.41}
                  },
                  "balance_sheet":{
                    "assets":{"value":344085000000},
                    "liabilities":{"value":277327000000}
                  },
                  "cash_flow_statement":{
                    "net_cash_flow_from_operating_activities":{"value":29935000000}
                  }
                }}"#,
        )
        .unwrap();

        let record = financials_to_record("AAPL", &result).unwrap();
        assert_eq!(record.period_type, PeriodType::Quarterly);
        assert_eq!(
            record.end_date,
            NaiveDate::from_ymd_opt(2024, 12, 28).unwrap()
        );
        assert_eq!(record.revenues, Some(dec!(124300000000)));
        assert_eq!(record.eps_basic, Some(dec!(2.41)));
        assert_eq!(record.total_assets, Some(dec!(344085000000)));
        assert_eq!(record.operating_cash_flow, Some(dec!(29935000000)));
        assert!(record.gross_profit.is_none());
    }

    #[test]
    fn test_financials_requires_end_date() {
        let result: FinancialsResult =
            serde_json::from_str(r#"{"end_date":null,"timeframe":"quarterly"}"#).unwrap();
        assert!(financials_to_record("AAPL", &result).is_none());
    }
}
