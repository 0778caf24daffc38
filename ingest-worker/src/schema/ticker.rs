//! Ticker classification and filtering
//!
//! Bulk all-tickers jobs run their output through a [`TickerFilter`]
//! before writing; watchlist tickers are never filtered.

use serde::{Deserialize, Serialize};

/// Filter policy applied before bulk writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TickerFilter {
    /// Everything the upstream returns
    All,
    /// 1-5 uppercase letters (mainboard listings)
    Mainboard,
    /// Mainboard minus warrants, units, and rights
    #[default]
    Common,
}

impl TickerFilter {
    /// Whether `ticker` passes this filter.
    pub fn matches(&self, ticker: &str) -> bool {
        match self {
            TickerFilter::All => true,
            TickerFilter::Mainboard => is_mainboard(ticker),
            TickerFilter::Common => is_common_stock(ticker),
        }
    }

}

/// 1-5 uppercase ASCII letters, nothing else.
fn is_mainboard(ticker: &str) -> bool {
    !ticker.is_empty()
        && ticker.len() <= 5
        && ticker.bytes().all(|b| b.is_ascii_uppercase())
}

/// Mainboard, excluding SPAC derivatives: 5-letter symbols ending in
/// W/U/R and 5-letter symbols ending in WS.
fn is_common_stock(ticker: &str) -> bool {
    if !is_mainboard(ticker) {
        return false;
    }
    let bytes = ticker.as_bytes();
    if bytes.len() == 5 {
        if matches!(bytes[4], b'W' | b'U' | b'R') {
            return false;
        }
    }
    if bytes.len() == 5 && &ticker[3..] == "WS" {
        return false;
    }
    true
}

/// Normalize a user-supplied symbol: trim and uppercase.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mainboard() {
        assert!(TickerFilter::Mainboard.matches("A"));
        assert!(TickerFilter::Mainboard.matches("AAPL"));
        assert!(TickerFilter::Mainboard.matches("GOOGL"));
        assert!(!TickerFilter::Mainboard.matches("BRK.B"));
        assert!(!TickerFilter::Mainboard.matches("aapl"));
        assert!(!TickerFilter::Mainboard.matches("TOOLONG"));
        assert!(!TickerFilter::Mainboard.matches(""));
    }

    #[test]
    fn test_common_excludes_spac_derivatives() {
        // Warrants, units, rights: [A-Z]{4}(W|U|R)
        assert!(!TickerFilter::Common.matches("SPACW"));
        assert!(!TickerFilter::Common.matches("SPACU"));
        assert!(!TickerFilter::Common.matches("SPACR"));
        // [A-Z]{3}WS
        assert!(!TickerFilter::Common.matches("ABCWS"));
        // Ordinary five-letter listings survive
        assert!(TickerFilter::Common.matches("GOOGL"));
        assert!(TickerFilter::Common.matches("AAPL"));
    }

    #[test]
    fn test_common_rejects_non_letters() {
        assert!(!TickerFilter::Common.matches("BRK.B"));
        assert!(!TickerFilter::Common.matches("BF-B"));
    }

    #[test]
    fn test_all_passes_everything() {
        assert!(TickerFilter::All.matches("BRK.B"));
        assert!(TickerFilter::All.matches("SPACW"));
    }

    #[test]
    fn test_filtering_a_grouped_response() {
        let tickers = ["AAPL", "SPACW", "BRK.B", "NVDA"];
        let kept: Vec<&str> = tickers
            .iter()
            .copied()
            .filter(|t| TickerFilter::Common.matches(t))
            .collect();
        assert_eq!(kept, vec!["AAPL", "NVDA"]);
    }

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol(" tsla "), "TSLA");
        assert_eq!(normalize_symbol("NVDA"), "NVDA");
    }
}
