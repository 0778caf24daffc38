//! Shared connection and subscription state
//!
//! One instance per feed. Mutations are infrequent (seconds apart) and
//! critical sections short, so a plain mutex per set is enough.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::schema::normalize_symbol;

/// Wire-level commands routed into a live connection
#[derive(Debug, Clone)]
pub enum FeedCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

/// Point-in-time feed status for the health surface
#[derive(Debug, Clone, Serialize)]
pub struct FeedStatus {
    pub connected: bool,
    pub subscriptions: Vec<String>,
    pub messages_received: u64,
    pub last_message: Option<DateTime<Utc>>,
}

/// State shared between a feed's handle and its connection task.
#[derive(Default)]
pub struct FeedShared {
    /// Operator intent: `connect()` was called and `disconnect()` was not
    pub should_be_connected: AtomicBool,
    /// A socket is currently open
    pub connected: AtomicBool,
    /// The auth handshake completed on the current socket
    pub authenticated: AtomicBool,
    /// Tickers live on the wire
    active: Mutex<BTreeSet<String>>,
    /// Tickers queued while disconnected, replayed on (re)authentication
    pending: Mutex<BTreeSet<String>>,
    pub messages_received: AtomicU64,
    last_message: Mutex<Option<DateTime<Utc>>>,
}

impl FeedShared {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscribe request. Returns the symbols that were actually
    /// new, uppercased; wire subscribes are issued only for these, and
    /// only when the feed is currently authenticated.
    pub fn queue_subscribe(&self, symbols: &[String]) -> Vec<String> {
        let mut active = self.active.lock();
        let mut pending = self.pending.lock();

        let mut added = Vec::new();
        for symbol in symbols {
            let symbol = normalize_symbol(symbol);
            if symbol.is_empty() || active.contains(&symbol) || pending.contains(&symbol) {
                continue;
            }
            if self.authenticated.load(Ordering::Acquire) {
                active.insert(symbol.clone());
            } else {
                pending.insert(symbol.clone());
            }
            added.push(symbol);
        }
        added
    }

    /// Record an unsubscribe. Returns the symbols that were present.
    pub fn queue_unsubscribe(&self, symbols: &[String]) -> Vec<String> {
        let mut active = self.active.lock();
        let mut pending = self.pending.lock();

        let mut removed = Vec::new();
        for symbol in symbols {
            let symbol = normalize_symbol(symbol);
            let was_active = active.remove(&symbol);
            let was_pending = pending.remove(&symbol);
            if was_active || was_pending {
                removed.push(symbol);
            }
        }
        removed
    }

    /// Union to replay after authentication. Moves everything to active
    /// and clears pending.
    pub fn drain_for_replay(&self) -> Vec<String> {
        let mut active = self.active.lock();
        let mut pending = self.pending.lock();
        active.extend(std::mem::take(&mut *pending));
        active.iter().cloned().collect()
    }

    /// On disconnect the active set falls back to pending so the next
    /// authentication replays it.
    pub fn on_disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        self.authenticated.store(false, Ordering::Release);
        let mut active = self.active.lock();
        let mut pending = self.pending.lock();
        pending.extend(std::mem::take(&mut *active));
    }

    /// All requested tickers, live or queued.
    pub fn subscriptions(&self) -> Vec<String> {
        let active = self.active.lock();
        let pending = self.pending.lock();
        active.union(&pending).cloned().collect()
    }

    pub fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        *self.last_message.lock() = Some(Utc::now());
    }

    pub fn status(&self) -> FeedStatus {
        FeedStatus {
            connected: self.connected.load(Ordering::Acquire),
            subscriptions: self.subscriptions(),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            last_message: *self.last_message.lock(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_is_idempotent_and_diffs() {
        let shared = FeedShared::new();
        shared.authenticated.store(true, Ordering::Release);

        let first = shared.queue_subscribe(&["a".to_string(), "b".to_string()]);
        assert_eq!(first, vec!["A", "B"]);

        let second = shared.queue_subscribe(&["b".to_string(), "c".to_string()]);
        assert_eq!(second, vec!["C"]);

        assert_eq!(shared.subscriptions(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_subscribe_while_unauthenticated_goes_pending() {
        let shared = FeedShared::new();
        let added = shared.queue_subscribe(&["TSLA".to_string()]);
        assert_eq!(added, vec!["TSLA"]);
        assert_eq!(shared.subscriptions(), vec!["TSLA"]);

        // Replay on auth moves it to active
        let replay = shared.drain_for_replay();
        assert_eq!(replay, vec!["TSLA"]);
    }

    #[test]
    fn test_disconnect_moves_active_to_pending() {
        let shared = FeedShared::new();
        shared.authenticated.store(true, Ordering::Release);
        shared.queue_subscribe(&["AAPL".to_string(), "NVDA".to_string()]);

        shared.on_disconnect();
        assert!(!shared.authenticated.load(Ordering::Acquire));
        // Still reported as requested
        assert_eq!(shared.subscriptions(), vec!["AAPL", "NVDA"]);
        // And fully replayed on the next auth
        assert_eq!(shared.drain_for_replay(), vec!["AAPL", "NVDA"]);
    }

    #[test]
    fn test_unsubscribe_clears_both_sets() {
        let shared = FeedShared::new();
        shared.queue_subscribe(&["AAPL".to_string()]);
        shared.authenticated.store(true, Ordering::Release);
        shared.queue_subscribe(&["NVDA".to_string()]);

        let removed = shared.queue_unsubscribe(&["aapl".to_string(), "NVDA".to_string()]);
        assert_eq!(removed, vec!["AAPL", "NVDA"]);
        assert!(shared.subscriptions().is_empty());

        // Unsubscribing again is a no-op
        assert!(shared.queue_unsubscribe(&["AAPL".to_string()]).is_empty());
    }
}
