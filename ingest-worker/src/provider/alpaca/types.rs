//! Wire types for the Alpaca market-data REST and streaming APIs

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::schema::{Market, QuoteRecord};

/// One bar from the REST bars endpoint or the streaming `b` event.
#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaBar {
    /// Bar start, RFC 3339
    #[serde(rename = "t")]
    pub time: Option<DateTime<Utc>>,
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
    #[serde(rename = "n")]
    pub trades: Option<i64>,
}

impl AlpacaBar {
    /// Normalize to a minute record; `None` (with a warning) when a
    /// required field is missing.
    pub fn to_quote(&self, ticker: &str) -> Option<QuoteRecord> {
        let (Some(time), Some(open), Some(close)) = (self.time, self.open, self.close) else {
            warn!("Dropping incomplete bar for {}", ticker);
            return None;
        };

        Some(QuoteRecord {
            time,
            ticker: ticker.to_string(),
            market: Market::US,
            open,
            high: self.high.unwrap_or(open.max(close)),
            low: self.low.unwrap_or(open.min(close)),
            close,
            volume: self
                .volume
                .and_then(|v| v.round().to_i64())
                .unwrap_or(0),
            vwap: self.vwap,
            trades: self.trades,
        })
    }
}

/// Envelope of the paginated bars endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct BarsResponse {
    #[serde(default)]
    pub bars: Option<Vec<AlpacaBar>>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Client-to-server control messages on the stream
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum StreamAction {
    Auth { key: String, secret: String },
    Subscribe { bars: Vec<String> },
    Unsubscribe { bars: Vec<String> },
}

/// Server-to-client stream messages, always delivered as an array.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "T")]
pub enum StreamMessage {
    /// Connection / auth acknowledgements (`msg` is `connected` or
    /// `authenticated`)
    #[serde(rename = "success")]
    Success {
        #[serde(default)]
        msg: Option<String>,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        code: Option<i64>,
        #[serde(default)]
        msg: Option<String>,
    },
    /// Echo of the current subscription set
    #[serde(rename = "subscription")]
    Subscription {
        #[serde(default)]
        bars: Option<Vec<String>>,
    },
    /// Minute bar
    #[serde(rename = "b")]
    Bar {
        #[serde(rename = "S")]
        symbol: String,
        #[serde(flatten)]
        bar: AlpacaBar,
    },
    #[serde(other)]
    Other,
}

/// Authentication failures use a dedicated code so the feed can stop
/// reconnecting instead of burning its backoff budget.
pub const AUTH_FAILED_CODE: i64 = 402;

/// Parse one stream frame (an array of messages).
pub fn parse_stream_frame(text: &str) -> Result<Vec<StreamMessage>, serde_json::Error> {
    if text.trim_start().starts_with('[') {
        serde_json::from_str::<Vec<StreamMessage>>(text)
    } else {
        serde_json::from_str::<StreamMessage>(text).map(|m| vec![m])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_bar_to_quote() {
        let bar: AlpacaBar = serde_json::from_str(
            r#"{"t":"2025-01-15T12:00:00Z","o":100,"h":101,"l":99.5,"c":100.8,"v":12345,"vw":100.4,"n":77}"#,
        )
        .unwrap();
        let quote = bar.to_quote("AAPL").unwrap();
        assert_eq!(quote.ticker, "AAPL");
        assert_eq!(quote.open, dec!(100));
        assert_eq!(quote.close, dec!(100.8));
        assert_eq!(quote.volume, 12345);
        assert_eq!(quote.trades, Some(77));
    }

    #[test]
    fn test_bar_missing_close_dropped() {
        let bar: AlpacaBar =
            serde_json::from_str(r#"{"t":"2025-01-15T12:00:00Z","o":100}"#).unwrap();
        assert!(bar.to_quote("AAPL").is_none());
    }

    #[test]
    fn test_parse_stream_auth_flow() {
        let frame = r#"[{"T":"success","msg":"connected"}]"#;
        let messages = parse_stream_frame(frame).unwrap();
        assert!(matches!(
            &messages[0],
            StreamMessage::Success { msg } if msg.as_deref() == Some("connected")
        ));

        let frame = r#"[{"T":"error","code":402,"msg":"auth failed"}]"#;
        let messages = parse_stream_frame(frame).unwrap();
        assert!(matches!(
            &messages[0],
            StreamMessage::Error { code: Some(402), .. }
        ));
    }

    #[test]
    fn test_parse_stream_bar() {
        let frame = r#"[{"T":"b","S":"TSLA","t":"2025-01-15T14:29:00Z","o":250,"h":251,"l":249,"c":250.5,"v":900}]"#;
        let messages = parse_stream_frame(frame).unwrap();
        match &messages[0] {
            StreamMessage::Bar { symbol, bar } => {
                assert_eq!(symbol, "TSLA");
                assert_eq!(bar.close, Some(dec!(250.5)));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_subscribe_action_json() {
        let action = StreamAction::Subscribe {
            bars: vec!["AAPL".to_string()],
        };
        let json = serde_json::to_string(&action).unwrap();
        assert_eq!(json, r#"{"action":"subscribe","bars":["AAPL"]}"#);
    }
}
