//! Streaming feed connections
//!
//! Both feeds share one lifecycle: an intent flag set by `connect()`, a
//! market-gate check that runs immediately and then every 60 s, an
//! auth-then-subscribe handshake that drains tickers queued while
//! disconnected, and linear-backoff reconnection that gives up after ten
//! attempts or when the gate closes.
//!
//! Subscription state is mutated locally first; wire-level messages are
//! issued only for the diff, and only while authenticated.

mod delayed;
mod fast;
mod state;

pub use delayed::DelayedFeed;
pub use fast::FastFeed;
pub use state::{FeedCommand, FeedShared, FeedStatus};

use std::time::Duration;

/// Gate re-check cadence, connected or not
pub const MARKET_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Base reconnect delay; attempt `n` waits `n * base`
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(5);

/// Reconnect budget per outage
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Handshake step timeout (auth acknowledgement)
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a live connection ended
#[derive(Debug)]
pub(crate) enum ConnectionExit {
    /// Shutdown signal observed
    Shutdown,
    /// The market gate closed; close was intentional, no backoff
    GateClosed,
    /// Credentials rejected; reconnecting is pointless
    AuthFailed(String),
    /// Anything else: socket error, stream end, pong timeout
    Error(String),
}

/// Delay before reconnect attempt `attempt` (1-based), or `None` once the
/// budget is exhausted.
pub fn reconnect_delay(attempt: u32) -> Option<Duration> {
    if attempt > MAX_RECONNECT_ATTEMPTS {
        return None;
    }
    Some(RECONNECT_BASE_DELAY * attempt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delays_are_linear() {
        assert_eq!(reconnect_delay(1), Some(Duration::from_secs(5)));
        assert_eq!(reconnect_delay(2), Some(Duration::from_secs(10)));
        assert_eq!(reconnect_delay(3), Some(Duration::from_secs(15)));
        assert_eq!(reconnect_delay(10), Some(Duration::from_secs(50)));
    }

    #[test]
    fn test_reconnect_budget_exhausts_after_ten() {
        assert!(reconnect_delay(10).is_some());
        assert_eq!(reconnect_delay(11), None);
    }
}
