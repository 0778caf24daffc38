//! Wire types for the Massive REST and WebSocket APIs

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Aggregate bar as returned by the aggs endpoints.
///
/// `T` (ticker) is only present in grouped responses.
#[derive(Debug, Clone, Deserialize)]
pub struct AggBar {
    #[serde(rename = "T", default)]
    pub ticker: Option<String>,
    /// Bar start, Unix milliseconds
    #[serde(rename = "t")]
    pub start_ms: Option<i64>,
    #[serde(rename = "o")]
    pub open: Option<Decimal>,
    #[serde(rename = "h")]
    pub high: Option<Decimal>,
    #[serde(rename = "l")]
    pub low: Option<Decimal>,
    #[serde(rename = "c")]
    pub close: Option<Decimal>,
    #[serde(rename = "v")]
    pub volume: Option<Decimal>,
    #[serde(rename = "vw")]
    pub vwap: Option<Decimal>,
    #[serde(rename = "n")]
    pub trades: Option<i64>,
}

/// Envelope of the aggs endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct AggsResponse {
    #[serde(default)]
    pub results: Option<Vec<AggBar>>,
}

/// One ticker entry in the full-market snapshot
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotTicker {
    pub ticker: String,
    #[serde(default)]
    pub day: Option<AggBar>,
    #[serde(rename = "todaysChange", default)]
    pub todays_change: Option<Decimal>,
    #[serde(rename = "todaysChangePerc", default)]
    pub todays_change_percent: Option<Decimal>,
    #[serde(rename = "prevDay", default)]
    pub prev_day: Option<AggBar>,
}

/// Snapshot envelope; older deployments return `tickers`, newer `results`.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotResponse {
    #[serde(default)]
    pub tickers: Option<Vec<SnapshotTicker>>,
    #[serde(default)]
    pub results: Option<Vec<SnapshotTicker>>,
}

impl SnapshotResponse {
    pub fn into_tickers(self) -> Vec<SnapshotTicker> {
        self.tickers.or(self.results).unwrap_or_default()
    }
}

/// Publisher block of a news item
#[derive(Debug, Clone, Deserialize)]
pub struct NewsPublisher {
    #[serde(default)]
    pub name: Option<String>,
}

/// Per-ticker sentiment insight attached to a news item
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NewsInsight {
    pub ticker: String,
    #[serde(default)]
    pub sentiment: Option<String>,
    #[serde(default)]
    pub sentiment_reasoning: Option<String>,
}

/// One news item
#[derive(Debug, Clone, Deserialize)]
pub struct NewsResult {
    pub id: String,
    #[serde(default)]
    pub publisher: Option<NewsPublisher>,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    /// RFC 3339 published timestamp
    pub published_utc: String,
    pub article_url: String,
    #[serde(default)]
    pub tickers: Option<Vec<String>>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
    #[serde(default)]
    pub insights: Option<Vec<NewsInsight>>,
}

/// News envelope
#[derive(Debug, Clone, Deserialize)]
pub struct NewsResponse {
    #[serde(default)]
    pub results: Option<Vec<NewsResult>>,
}

/// One financial line item: only the value matters here
#[derive(Debug, Clone, Deserialize)]
pub struct FinancialValue {
    #[serde(default)]
    pub value: Option<Decimal>,
}

/// The three statements, keyed by upstream concept name
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FinancialStatements {
    #[serde(default)]
    pub income_statement: Option<HashMap<String, FinancialValue>>,
    #[serde(default)]
    pub balance_sheet: Option<HashMap<String, FinancialValue>>,
    #[serde(default)]
    pub cash_flow_statement: Option<HashMap<String, FinancialValue>>,
}

/// One reported period
#[derive(Debug, Clone, Deserialize)]
pub struct FinancialsResult {
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub filing_date: Option<String>,
    /// "quarterly" or "annual"
    #[serde(default)]
    pub timeframe: Option<String>,
    #[serde(default)]
    pub fiscal_period: Option<String>,
    #[serde(default)]
    pub fiscal_year: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub financials: Option<FinancialStatements>,
}

/// Financials envelope
#[derive(Debug, Clone, Deserialize)]
pub struct FinancialsResponse {
    #[serde(default)]
    pub results: Option<Vec<FinancialsResult>>,
}

/// Market status payload
#[derive(Debug, Clone, Deserialize)]
pub struct MarketStatusResponse {
    /// "open", "closed", or "extended-hours"
    pub market: String,
    #[serde(rename = "afterHours", default)]
    pub after_hours: Option<bool>,
    #[serde(rename = "earlyHours", default)]
    pub early_hours: Option<bool>,
}

/// Client-to-server control message on the streaming channel
#[derive(Debug, Clone, Serialize)]
pub struct WsAction {
    pub action: String,
    pub params: String,
}

impl WsAction {
    pub fn auth(key: &str) -> Self {
        Self {
            action: "auth".to_string(),
            params: key.to_string(),
        }
    }

    /// Subscribe to aggregate-minute channels for the given tickers.
    pub fn subscribe_minutes(tickers: &[String]) -> Self {
        Self {
            action: "subscribe".to_string(),
            params: tickers
                .iter()
                .map(|t| format!("AM.{t}"))
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    pub fn unsubscribe_minutes(tickers: &[String]) -> Self {
        Self {
            action: "unsubscribe".to_string(),
            params: tickers
                .iter()
                .map(|t| format!("AM.{t}"))
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// Server-to-client streaming message
///
/// The server may send a single object or an array of them; the feed
/// normalizes to a vec before dispatch.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "ev")]
pub enum WsMessage {
    /// Connection / auth status
    #[serde(rename = "status")]
    Status {
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    /// Aggregate-minute bar
    #[serde(rename = "AM")]
    AggregateMinute(AmEvent),
    #[serde(other)]
    Other,
}

/// Aggregate-minute event payload
#[derive(Debug, Clone, Deserialize)]
pub struct AmEvent {
    /// Ticker symbol
    pub sym: String,
    /// Bar start, Unix milliseconds
    #[serde(rename = "s")]
    pub start_ms: Option<i64>,
    #[serde(rename = "o")]
    pub open: Option<Decimal>,
    #[serde(rename = "h")]
    pub high: Option<Decimal>,
    #[serde(rename = "l")]
    pub low: Option<Decimal>,
    #[serde(rename = "c")]
    pub close: Option<Decimal>,
    #[serde(rename = "v")]
    pub volume: Option<Decimal>,
    #[serde(rename = "vw")]
    pub vwap: Option<Decimal>,
    /// Trade count within the bar
    #[serde(rename = "z")]
    pub trades: Option<i64>,
}

/// Parse one frame into messages, accepting both single objects and
/// arrays.
pub fn parse_ws_frame(text: &str) -> Result<Vec<WsMessage>, serde_json::Error> {
    if text.trim_start().starts_with('[') {
        serde_json::from_str::<Vec<WsMessage>>(text)
    } else {
        serde_json::from_str::<WsMessage>(text).map(|m| vec![m])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_agg_response() {
        let json = r#"{"results":[{"T":"AAPL","t":1736942400000,"o":100.02,"h":101.0,"l":99.48,"c":100.82,"v":12400,"vw":100.5,"n":98}],"resultsCount":1}"#;
        let parsed: AggsResponse = serde_json::from_str(json).unwrap();
        let bars = parsed.results.unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].ticker.as_deref(), Some("AAPL"));
        assert_eq!(bars[0].open, Some(dec!(100.02)));
        assert_eq!(bars[0].trades, Some(98));
    }

    #[test]
    fn test_snapshot_accepts_both_keys() {
        let with_tickers = r#"{"tickers":[{"ticker":"AAPL","day":{"o":1,"h":2,"l":0.5,"c":1.5,"v":100}}]}"#;
        let with_results = r#"{"results":[{"ticker":"NVDA","day":{"o":1,"h":2,"l":0.5,"c":1.5,"v":100}}]}"#;

        let a: SnapshotResponse = serde_json::from_str(with_tickers).unwrap();
        let b: SnapshotResponse = serde_json::from_str(with_results).unwrap();
        assert_eq!(a.into_tickers()[0].ticker, "AAPL");
        assert_eq!(b.into_tickers()[0].ticker, "NVDA");
    }

    #[test]
    fn test_parse_ws_status_frame() {
        let frame = r#"[{"ev":"status","status":"auth_success","message":"authenticated"}]"#;
        let messages = parse_ws_frame(frame).unwrap();
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            WsMessage::Status { status, .. } => {
                assert_eq!(status.as_deref(), Some("auth_success"))
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_parse_ws_am_frame() {
        let frame = r#"{"ev":"AM","sym":"AAPL","s":1736943300000,"o":100.02,"h":101.0,"l":99.48,"c":100.82,"v":12400,"vw":100.5,"z":98}"#;
        let messages = parse_ws_frame(frame).unwrap();
        match &messages[0] {
            WsMessage::AggregateMinute(am) => {
                assert_eq!(am.sym, "AAPL");
                assert_eq!(am.close, Some(dec!(100.82)));
                assert_eq!(am.trades, Some(98));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_parse_ws_unknown_event() {
        let frame = r#"{"ev":"T","sym":"AAPL","p":100.5}"#;
        let messages = parse_ws_frame(frame).unwrap();
        assert!(matches!(messages[0], WsMessage::Other));
    }

    #[test]
    fn test_subscribe_params() {
        let action =
            WsAction::subscribe_minutes(&["AAPL".to_string(), "TSLA".to_string()]);
        assert_eq!(action.action, "subscribe");
        assert_eq!(action.params, "AM.AAPL,AM.TSLA");
    }
}
