//! End-to-end stitching semantics against an in-memory rendition of the
//! store's upsert-by-identity behavior.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal_macros::dec;

use ingest_worker::provider::massive::{am_to_quote, parse_ws_frame, WsMessage};
use ingest_worker::schema::{Market, QuoteRecord, TickerFilter};
use ingest_worker::stitch;
use ingest_worker::storage::{quote_point, DataPoint, FieldValue};

/// Minimal stand-in for the store: last write wins per
/// (measurement, tag-set, timestamp).
#[derive(Default)]
struct FakeStore {
    points: BTreeMap<String, BTreeMap<&'static str, FieldValue>>,
}

impl FakeStore {
    fn write(&mut self, point: DataPoint) {
        let key = format!(
            "{}|{:?}|{}",
            point.measurement,
            point.tags,
            point.timestamp.timestamp_nanos_opt().unwrap_or_default()
        );
        self.points.insert(key, point.fields);
    }

    fn get(&self, point: &DataPoint) -> Option<&BTreeMap<&'static str, FieldValue>> {
        let key = format!(
            "{}|{:?}|{}",
            point.measurement,
            point.tags,
            point.timestamp.timestamp_nanos_opt().unwrap_or_default()
        );
        self.points.get(&key)
    }
}

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, h, m, s).unwrap()
}

fn fast_bar(time: DateTime<Utc>) -> QuoteRecord {
    QuoteRecord {
        time,
        ticker: "AAPL".to_string(),
        market: Market::US,
        open: dec!(100),
        high: dec!(101),
        low: dec!(99.5),
        close: dec!(100.8),
        volume: 12345,
        vwap: None,
        trades: None,
    }
}

/// A provisional low-latency bar followed by the delayed consolidated bar
/// for the same minute: the read after both writes returns the
/// consolidated values.
#[test]
fn delayed_stream_overwrites_fast_bar() {
    let mut store = FakeStore::default();

    // 12:00:00Z: fast-feed bar arrives and is written as-is.
    let fast = fast_bar(at(12, 0, 0));
    store.write(quote_point(&fast));

    // 12:15:30Z: the aggregate-minute event for the same bar start.
    let frame = r#"{"ev":"AM","sym":"AAPL","s":1736942400000,"o":100.02,"h":101.00,"l":99.48,"c":100.82,"v":12400,"vw":100.5,"z":98}"#;
    let messages = parse_ws_frame(frame).unwrap();
    let WsMessage::AggregateMinute(am) = &messages[0] else {
        panic!("expected aggregate-minute event");
    };
    let delayed = am_to_quote(am).unwrap();
    assert_eq!(delayed.time, fast.time);
    store.write(quote_point(&delayed));

    // One series key, holding the consolidated values.
    assert_eq!(store.points.len(), 1);
    let fields = store.get(&quote_point(&fast)).unwrap();
    assert_eq!(fields.get("open"), Some(&FieldValue::Decimal(dec!(100.02))));
    assert_eq!(fields.get("close"), Some(&FieldValue::Decimal(dec!(100.82))));
    assert_eq!(fields.get("volume"), Some(&FieldValue::Integer(12400)));
    assert_eq!(fields.get("vwap"), Some(&FieldValue::Decimal(dec!(100.5))));
    assert_eq!(fields.get("trades"), Some(&FieldValue::Integer(98)));
}

/// The recent-gap fill clips its response to the window it owns, even
/// when the upstream returns bars from before the requested start.
#[test]
fn recent_backfill_is_reclipped() {
    // 16 bars at 14:14..=14:29 against a 14:30 clock.
    let now = at(14, 30, 0);
    let bars: Vec<QuoteRecord> = (14..30).map(|m| fast_bar(at(14, m, 0))).collect();

    let clipped = stitch::clip_recent(bars, now);
    let times: Vec<DateTime<Utc>> = clipped.iter().map(|b| b.time).collect();

    assert_eq!(times.first().copied(), Some(at(14, 15, 0)));
    assert_eq!(times.last().copied(), Some(at(14, 29, 0)));
    assert!(!times.contains(&at(14, 14, 0)));
}

/// Historical and recent windows cover complementary ranges, so running
/// both backfills produces each minute exactly once per identity.
#[test]
fn history_and_recent_fills_compose_without_gaps() {
    let now = at(14, 30, 0);
    let all: Vec<QuoteRecord> = (0..30).map(|m| fast_bar(at(14, m, 0))).collect();

    let mut store = FakeStore::default();
    for bar in stitch::clip_history(all.clone(), now) {
        store.write(quote_point(&bar));
    }
    for bar in stitch::clip_recent(all, now) {
        store.write(quote_point(&bar));
    }

    // 14:00..=14:29 all present exactly once.
    assert_eq!(store.points.len(), 30);
}

/// Grouped-daily style filtering: SPAC derivatives and non-letter tickers
/// are excluded, watchlist symbols never are.
#[test]
fn bulk_filter_excludes_derivatives_but_not_watchlist() {
    let tickers = ["AAPL", "SPACW", "BRK.B", "NVDA"];
    let kept: Vec<&str> = tickers
        .iter()
        .copied()
        .filter(|t| TickerFilter::Common.matches(t))
        .collect();
    assert_eq!(kept, vec!["AAPL", "NVDA"]);

    // A watchlist entry that would fail the filter still passes the
    // combined predicate used by the bulk jobs.
    let watchlist = ["BRK.B".to_string()];
    let passes =
        |t: &str| TickerFilter::Common.matches(t) || watchlist.contains(&t.to_string());
    assert!(passes("BRK.B"));
    assert!(!passes("SPACW"));
}

/// The rolling correction targets the minute one minute behind the
/// official delay, floored to the bar start, and that identity matches a
/// previously written provisional bar.
#[test]
fn correction_minute_matches_streamed_bar_identity() {
    let streamed = fast_bar(at(14, 14, 0));
    let mut store = FakeStore::default();
    store.write(quote_point(&streamed));

    let target = stitch::correction_minute(at(14, 30, 45));
    assert_eq!(target, streamed.time);

    let mut corrected = fast_bar(target);
    corrected.close = dec!(100.82);
    store.write(quote_point(&corrected));

    assert_eq!(store.points.len(), 1);
    let fields = store.get(&quote_point(&streamed)).unwrap();
    assert_eq!(fields.get("close"), Some(&FieldValue::Decimal(dec!(100.82))));
}
