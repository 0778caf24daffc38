//! Low-latency streaming feed
//!
//! Streams 1-minute IEX bars while the market is in regular hours. Bars
//! are provisional: the delayed consolidated stream overwrites them 15
//! minutes later.
//!
//! Subscribing a new ticker also backfills the last 15 minutes over REST
//! so the provisional window has no gap between "just subscribed" and
//! "first streamed bar".

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::market::MarketClock;
use crate::provider::alpaca::{
    parse_stream_frame, AlpacaClient, StreamAction, StreamMessage, AUTH_FAILED_CODE,
};
use crate::stitch;
use crate::storage::TsWriter;

use super::state::{FeedCommand, FeedShared, FeedStatus};
use super::{
    reconnect_delay, ConnectionExit, HANDSHAKE_TIMEOUT, MARKET_CHECK_INTERVAL,
};

/// Pause between per-symbol REST backfills
const BACKFILL_SYMBOL_DELAY: Duration = Duration::from_millis(300);

/// Streaming connection to the fast feed.
pub struct FastFeed {
    shared: FeedShared,
    stream_url: String,
    api_key: String,
    api_secret: String,
    rest: Arc<AlpacaClient>,
    writer: Arc<TsWriter>,
    clock: Arc<MarketClock>,
    cmd_tx: mpsc::UnboundedSender<FeedCommand>,
    cmd_rx: Mutex<Option<mpsc::UnboundedReceiver<FeedCommand>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FastFeed {
    pub fn new(
        stream_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        rest: Arc<AlpacaClient>,
        writer: Arc<TsWriter>,
        clock: Arc<MarketClock>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        Self {
            shared: FeedShared::new(),
            stream_url: stream_url.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            rest,
            writer,
            clock,
            cmd_tx,
            cmd_rx: Mutex::new(Some(cmd_rx)),
            task: Mutex::new(None),
        }
    }

    /// Declare intent and start the supervisor; the socket opens once the
    /// market is in regular hours.
    pub fn connect(self: &Arc<Self>, shutdown: broadcast::Receiver<()>) {
        self.shared.should_be_connected.store(true, Ordering::Release);
        let Some(cmd_rx) = self.cmd_rx.lock().take() else {
            warn!("Fast feed already started");
            return;
        };
        let feed = Arc::clone(self);
        let handle = tokio::spawn(async move { feed.supervise(cmd_rx, shutdown).await });
        *self.task.lock() = Some(handle);
    }

    pub fn disconnect(&self) {
        self.shared.should_be_connected.store(false, Ordering::Release);
    }

    pub async fn join(&self) {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Subscribe, and backfill the provisional window for tickers that are
    /// actually new.
    pub fn subscribe(self: &Arc<Self>, symbols: &[String]) {
        let added = self.shared.queue_subscribe(symbols);
        if added.is_empty() {
            return;
        }
        info!("Fast feed subscribing to {:?}", added);
        if self.shared.authenticated.load(Ordering::Acquire) {
            let _ = self.cmd_tx.send(FeedCommand::Subscribe(added.clone()));
        }

        let feed = Arc::clone(self);
        tokio::spawn(async move { feed.backfill_recent(added).await });
    }

    pub fn unsubscribe(&self, symbols: &[String]) {
        let removed = self.shared.queue_unsubscribe(symbols);
        if removed.is_empty() {
            return;
        }
        info!("Fast feed unsubscribing from {:?}", removed);
        if self.shared.authenticated.load(Ordering::Acquire) {
            let _ = self.cmd_tx.send(FeedCommand::Unsubscribe(removed));
        }
    }

    pub fn status(&self) -> FeedStatus {
        self.shared.status()
    }

    /// Fill `[now - 15m, now]` over REST for newly subscribed tickers.
    ///
    /// The response is re-clipped to the window: the upstream occasionally
    /// returns bars from before the requested `from`.
    async fn backfill_recent(&self, symbols: Vec<String>) {
        for (i, symbol) in symbols.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(BACKFILL_SYMBOL_DELAY).await;
            }
            let now = Utc::now();
            let (from, to) = stitch::recent_window(now);
            match self.rest.minute_bars(symbol, from, to).await {
                Ok(bars) => {
                    let bars = stitch::clip_recent(bars, now);
                    if bars.is_empty() {
                        debug!("No recent bars to backfill for {}", symbol);
                        continue;
                    }
                    match self.writer.write_quotes(&bars).await {
                        Ok(written) => {
                            info!("Backfilled {} recent bars for {}", written, symbol)
                        }
                        Err(e) => warn!("Recent backfill write failed for {}: {}", symbol, e),
                    }
                }
                Err(e) => warn!("Recent backfill fetch failed for {}: {}", symbol, e),
            }
        }
    }

    /// Regular hours only.
    async fn should_connect(&self) -> bool {
        self.clock.is_open().await
    }

    async fn supervise(
        self: Arc<Self>,
        mut cmd_rx: mpsc::UnboundedReceiver<FeedCommand>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut attempts: u32 = 0;

        loop {
            if !self.shared.should_be_connected.load(Ordering::Acquire) {
                break;
            }

            if !self.should_connect().await {
                attempts = 0;
                debug!("Fast feed gate closed; holding");
                tokio::select! {
                    _ = tokio::time::sleep(MARKET_CHECK_INTERVAL) => continue,
                    _ = shutdown.recv() => break,
                }
            }

            let exit = self.run_connection(&mut cmd_rx, &mut shutdown).await;
            self.shared.on_disconnect();

            match exit {
                ConnectionExit::Shutdown => break,
                ConnectionExit::GateClosed => {
                    attempts = 0;
                    continue;
                }
                ConnectionExit::AuthFailed(message) => {
                    error!("Fast feed authentication failed, not reconnecting: {}", message);
                    break;
                }
                ConnectionExit::Error(message) => {
                    attempts += 1;
                    let Some(delay) = reconnect_delay(attempts) else {
                        error!(
                            "Fast feed exhausted reconnect budget ({} attempts): {}",
                            attempts - 1,
                            message
                        );
                        break;
                    };
                    warn!(
                        "Fast feed connection lost (attempt {}), reconnecting in {:?}: {}",
                        attempts, delay, message
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.recv() => break,
                    }
                    if !self.should_connect().await {
                        attempts = 0;
                    }
                }
            }
        }

        self.shared.on_disconnect();
        info!("Fast feed stopped");
    }

    async fn run_connection(
        &self,
        cmd_rx: &mut mpsc::UnboundedReceiver<FeedCommand>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> ConnectionExit {
        info!("Connecting to fast feed at {}", self.stream_url);
        let (ws, _) = match connect_async(&self.stream_url).await {
            Ok(ok) => ok,
            Err(e) => return ConnectionExit::Error(format!("connect failed: {e}")),
        };
        let (mut write, mut read) = ws.split();

        let auth = StreamAction::Auth {
            key: self.api_key.clone(),
            secret: self.api_secret.clone(),
        };
        if let Err(e) = self.send_action(&mut write, auth).await {
            return ConnectionExit::Error(e);
        }

        // Wait for the authentication acknowledgement; the connection
        // banner arrives first and is skipped.
        let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
        loop {
            let message = tokio::select! {
                message = read.next() => message,
                _ = tokio::time::sleep_until(deadline) => {
                    return ConnectionExit::Error("auth acknowledgement timed out".to_string());
                }
                _ = shutdown.recv() => return ConnectionExit::Shutdown,
            };
            let text = match message {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(_)) => continue,
                Some(Err(e)) => return ConnectionExit::Error(format!("handshake read: {e}")),
                None => return ConnectionExit::Error("stream ended during handshake".to_string()),
            };
            match Self::auth_outcome(&text) {
                Some(Ok(())) => break,
                Some(Err(message)) => return ConnectionExit::AuthFailed(message),
                None => continue,
            }
        }

        let replay = self.shared.drain_for_replay();
        if !replay.is_empty() {
            info!("Fast feed re-subscribing {} tickers", replay.len());
            let action = StreamAction::Subscribe { bars: replay };
            if let Err(e) = self.send_action(&mut write, action).await {
                return ConnectionExit::Error(e);
            }
        }
        while cmd_rx.try_recv().is_ok() {}

        self.shared.connected.store(true, Ordering::Release);
        self.shared.authenticated.store(true, Ordering::Release);
        info!("Fast feed live");

        let mut gate_timer = interval(MARKET_CHECK_INTERVAL);
        gate_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        gate_timer.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    let _ = write.send(Message::Close(None)).await;
                    return ConnectionExit::Shutdown;
                }

                _ = gate_timer.tick() => {
                    if !self.should_connect().await {
                        info!("Market closed; disconnecting fast feed");
                        let _ = write.send(Message::Close(None)).await;
                        return ConnectionExit::GateClosed;
                    }
                }

                command = cmd_rx.recv() => {
                    let Some(command) = command else {
                        return ConnectionExit::Shutdown;
                    };
                    let action = match command {
                        FeedCommand::Subscribe(bars) => StreamAction::Subscribe { bars },
                        FeedCommand::Unsubscribe(bars) => StreamAction::Unsubscribe { bars },
                    };
                    if let Err(e) = self.send_action(&mut write, action).await {
                        return ConnectionExit::Error(e);
                    }
                }

                message = read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(exit) = self.handle_frame(&text).await {
                                return exit;
                            }
                        }
                        // The vendor heartbeat is protocol-level; answering
                        // pings is all the liveness this feed needs.
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return ConnectionExit::Error(format!("closed by server: {frame:?}"));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return ConnectionExit::Error(e.to_string()),
                        None => return ConnectionExit::Error("stream ended".to_string()),
                    }
                }
            }
        }
    }

    fn auth_outcome(text: &str) -> Option<Result<(), String>> {
        let messages = match parse_stream_frame(text) {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Unparseable handshake frame: {}", e);
                return None;
            }
        };
        for message in messages {
            match message {
                StreamMessage::Success { msg } if msg.as_deref() == Some("authenticated") => {
                    return Some(Ok(()));
                }
                StreamMessage::Error { code, msg } => {
                    let reason = msg.unwrap_or_else(|| "authentication rejected".to_string());
                    if code == Some(AUTH_FAILED_CODE) {
                        return Some(Err(reason));
                    }
                    warn!("Fast feed handshake error {:?}: {}", code, reason);
                }
                _ => {}
            }
        }
        None
    }

    async fn send_action<S>(&self, write: &mut S, action: StreamAction) -> Result<(), String>
    where
        S: SinkExt<Message> + Unpin,
        S::Error: std::fmt::Display,
    {
        let json = serde_json::to_string(&action).map_err(|e| e.to_string())?;
        write
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| format!("send failed: {e}"))
    }

    async fn handle_frame(&self, text: &str) -> Option<ConnectionExit> {
        let messages = match parse_stream_frame(text) {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Unparseable frame from fast feed: {}", e);
                return None;
            }
        };

        for message in messages {
            match message {
                StreamMessage::Bar { symbol, bar } => {
                    self.shared.record_message();
                    let Some(quote) = bar.to_quote(&symbol) else {
                        continue;
                    };
                    // Low per-connection volume; single-bar writes keep
                    // per-ticker ordering.
                    if let Err(e) = self.writer.write_quotes(std::slice::from_ref(&quote)).await {
                        warn!("Failed to write fast bar for {}: {}", quote.ticker, e);
                    }
                }
                StreamMessage::Error { code, msg } => {
                    let reason = msg.unwrap_or_default();
                    if code == Some(AUTH_FAILED_CODE) {
                        return Some(ConnectionExit::AuthFailed(reason));
                    }
                    warn!("Fast feed error {:?}: {}", code, reason);
                }
                StreamMessage::Subscription { bars } => {
                    debug!("Fast feed subscription confirmed: {:?}", bars);
                }
                StreamMessage::Success { .. } | StreamMessage::Other => {}
            }
        }
        None
    }
}
