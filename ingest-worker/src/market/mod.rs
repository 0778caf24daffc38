//! Market-hours awareness
//!
//! The authoritative source for the current session is the upstream
//! market-status endpoint; when it is unreachable the worker falls back to
//! time-of-day rules evaluated in the exchange timezone, so DST
//! transitions are handled by the zoned conversion.
//!
//! Session windows (US/Eastern, weekdays):
//! - early hours `[04:00, 09:30)`
//! - regular     `[09:30, 16:00)`
//! - after hours `[16:00, 20:00)`

use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use chrono_tz::America::New_York;
use parking_lot::Mutex;
use tracing::debug;

use crate::provider::massive::MassiveClient;

/// How long a fetched status stays fresh.
const STATUS_CACHE_TTL: StdDuration = StdDuration::from_secs(60);

/// Current session classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MarketStatus {
    pub is_open: bool,
    pub early_hours: bool,
    pub after_hours: bool,
}

impl MarketStatus {
    pub const CLOSED: MarketStatus = MarketStatus {
        is_open: false,
        early_hours: false,
        after_hours: false,
    };
}

/// Classify a UTC instant against the regular session calendar.
///
/// Weekends are closed. Holidays are not modelled here; the authoritative
/// status endpoint covers them and this function is only the fallback.
pub fn classify(now: DateTime<Utc>) -> MarketStatus {
    let local = now.with_timezone(&New_York);

    if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
        return MarketStatus::CLOSED;
    }

    let t = local.time();
    let early_start = NaiveTime::from_hms_opt(4, 0, 0).unwrap();
    let open = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
    let close = NaiveTime::from_hms_opt(16, 0, 0).unwrap();
    let after_end = NaiveTime::from_hms_opt(20, 0, 0).unwrap();

    MarketStatus {
        is_open: t >= open && t < close,
        early_hours: t >= early_start && t < open,
        after_hours: t >= close && t < after_end,
    }
}

/// True while the regular session that contains `now - 15m` was open.
///
/// The delayed consolidated feed keeps emitting bars for fifteen minutes
/// after the close; its connection gate extends past the close by the same
/// margin.
pub fn open_within_delay(now: DateTime<Utc>) -> bool {
    classify(now).is_open || classify(now - Duration::minutes(crate::stitch::DELAY_MINUTES)).is_open
}

/// Cached view of the current market status.
///
/// Consults the upstream status endpoint at most once per TTL window and
/// falls back to [`classify`] when the endpoint is unavailable or not
/// configured.
pub struct MarketClock {
    source: Option<Arc<MassiveClient>>,
    cache: Mutex<Option<(Instant, MarketStatus)>>,
}

impl MarketClock {
    pub fn new(source: Option<Arc<MassiveClient>>) -> Self {
        Self {
            source,
            cache: Mutex::new(None),
        }
    }

    /// Current status, served from cache within the TTL.
    pub async fn status(&self) -> MarketStatus {
        if let Some((fetched, status)) = *self.cache.lock() {
            if fetched.elapsed() < STATUS_CACHE_TTL {
                return status;
            }
        }

        let status = match &self.source {
            Some(client) => match client.market_status().await {
                Ok(status) => status,
                Err(e) => {
                    debug!("Market status endpoint unavailable, using local rules: {}", e);
                    classify(Utc::now())
                }
            },
            None => classify(Utc::now()),
        };

        *self.cache.lock() = Some((Instant::now(), status));
        status
    }

    pub async fn is_open(&self) -> bool {
        self.status().await.is_open
    }
}
