//! Time-window arithmetic for the bar-stitching pipeline.
//!
//! Three producers write into the same minute measurement and the store
//! resolves collisions by identity overwrite, so correctness reduces to
//! each producer clipping its output to the window it owns:
//!
//! - historical REST backfill owns `time <= now - 15m`
//! - the recent-gap REST fill owns `time in [now - 15m, now]`
//! - the live stream owns the current minute
//! - the per-minute delayed correction rewrites the bar at `now - 16m`
//!
//! The one-minute margin on the correction target keeps the request behind
//! the upstream's official 15-minute delay.

use chrono::{DateTime, Duration, DurationRound, Utc};

use crate::schema::QuoteRecord;

/// Official delay of the consolidated feed.
pub const DELAY_MINUTES: i64 = 15;

/// Extra margin applied when polling the delayed feed for a single minute.
pub const CORRECTION_MARGIN_MINUTES: i64 = 1;

/// Upper bound (inclusive) of the historical backfill window.
pub fn history_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::minutes(DELAY_MINUTES)
}

/// The recent-gap window `[now - 15m, now]`, both ends inclusive.
pub fn recent_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    (now - Duration::minutes(DELAY_MINUTES), now)
}

/// Minute-start timestamp targeted by the rolling delayed correction.
pub fn correction_minute(now: DateTime<Utc>) -> DateTime<Utc> {
    let target = now - Duration::minutes(DELAY_MINUTES + CORRECTION_MARGIN_MINUTES);
    floor_minute(target)
}

/// Truncate a timestamp to the start of its minute.
pub fn floor_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(Duration::minutes(1)).unwrap_or(ts)
}

/// Clip a historical backfill batch to the window it owns.
///
/// Bars newer than `now - 15m` belong to the recent-gap fill and are
/// dropped here.
pub fn clip_history(bars: Vec<QuoteRecord>, now: DateTime<Utc>) -> Vec<QuoteRecord> {
    let cutoff = history_cutoff(now);
    bars.into_iter().filter(|b| b.time <= cutoff).collect()
}

/// Clip a recent-gap batch to `[now - 15m, now]`.
///
/// The upstream occasionally returns bars from before the requested
/// `from`, so the interval is re-applied on the response.
pub fn clip_recent(bars: Vec<QuoteRecord>, now: DateTime<Utc>) -> Vec<QuoteRecord> {
    let (from, to) = recent_window(now);
    bars.into_iter()
        .filter(|b| b.time >= from && b.time <= to)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Market;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn bar_at(time: DateTime<Utc>) -> QuoteRecord {
        QuoteRecord {
            time,
            ticker: "TSLA".to_string(),
            market: Market::US,
            open: dec!(250),
            high: dec!(251),
            low: dec!(249),
            close: dec!(250.5),
            volume: 1000,
            vwap: None,
            trades: None,
        }
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, h, m, s).unwrap()
    }

    #[test]
    fn test_history_cutoff() {
        assert_eq!(history_cutoff(at(14, 30, 0)), at(14, 15, 0));
    }

    #[test]
    fn test_recent_window() {
        let (from, to) = recent_window(at(14, 30, 0));
        assert_eq!(from, at(14, 15, 0));
        assert_eq!(to, at(14, 30, 0));
    }

    #[test]
    fn test_correction_minute_floors_to_bar_start() {
        // 14:30:45 - 16m = 14:14:45, floored to 14:14:00
        assert_eq!(correction_minute(at(14, 30, 45)), at(14, 14, 0));
        assert_eq!(correction_minute(at(14, 30, 0)), at(14, 14, 0));
    }

    #[test]
    fn test_clip_recent_drops_bars_before_window() {
        // 16 bars at 14:14..=14:29 against now = 14:30: the 14:14 bar is
        // outside the owned window and must be dropped.
        let now = at(14, 30, 0);
        let bars: Vec<_> = (14..30).map(|m| bar_at(at(14, m, 0))).collect();
        let clipped = clip_recent(bars, now);

        assert_eq!(clipped.len(), 15);
        assert_eq!(clipped.first().unwrap().time, at(14, 15, 0));
        assert_eq!(clipped.last().unwrap().time, at(14, 29, 0));
    }

    #[test]
    fn test_clip_history_drops_bars_inside_delay_window() {
        let now = at(14, 30, 0);
        let bars = vec![
            bar_at(at(13, 0, 0)),
            bar_at(at(14, 15, 0)),
            bar_at(at(14, 16, 0)),
            bar_at(at(14, 29, 0)),
        ];
        let clipped = clip_history(bars, now);

        assert_eq!(clipped.len(), 2);
        assert!(clipped.iter().all(|b| b.time <= at(14, 15, 0)));
    }

    #[test]
    fn test_windows_partition_the_timeline() {
        // A bar strictly newer than the history cutoff is accepted by the
        // recent window, and vice versa; only the boundary minute is owned
        // by both, which identity overwrite resolves.
        let now = at(14, 30, 0);
        for m in 0..30 {
            let b = bar_at(at(14, m, 0));
            let in_history = !clip_history(vec![b.clone()], now).is_empty();
            let in_recent = !clip_recent(vec![b.clone()], now).is_empty();
            assert!(in_history || in_recent, "minute {m} unowned");
        }
    }
}
