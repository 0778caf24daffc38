//! Delayed consolidated-tape streaming feed
//!
//! Subscribes to aggregate-minute channels. Bars arrive 15 minutes behind
//! the tape but carry authoritative consolidated values; writing them
//! overwrites the fast-feed bar with the same identity.
//!
//! The connection is held from the open until 15 minutes after the close
//! so the delayed tail drains before disconnect. Liveness is enforced by
//! an explicit ping/pong heartbeat.

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

use crate::market::{self, MarketClock};
use crate::provider::massive::{am_to_quote, parse_ws_frame, WsAction, WsMessage};
use crate::storage::TsWriter;

use super::state::{FeedCommand, FeedShared, FeedStatus};
use super::{
    reconnect_delay, ConnectionExit, HANDSHAKE_TIMEOUT, MARKET_CHECK_INTERVAL,
};

/// Heartbeat cadence
const PING_INTERVAL: Duration = Duration::from_secs(30);
/// Pong must arrive within this window or the socket is force-terminated
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Streaming connection to the delayed feed.
pub struct DelayedFeed {
    shared: FeedShared,
    ws_url: String,
    api_key: String,
    writer: Arc<TsWriter>,
    clock: Arc<MarketClock>,
    cmd_tx: mpsc::UnboundedSender<FeedCommand>,
    cmd_rx: Mutex<Option<mpsc::UnboundedReceiver<FeedCommand>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DelayedFeed {
    pub fn new(
        ws_url: impl Into<String>,
        api_key: impl Into<String>,
        writer: Arc<TsWriter>,
        clock: Arc<MarketClock>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        Self {
            shared: FeedShared::new(),
            ws_url: ws_url.into(),
            api_key: api_key.into(),
            writer,
            clock,
            cmd_tx,
            cmd_rx: Mutex::new(Some(cmd_rx)),
            task: Mutex::new(None),
        }
    }

    /// Declare intent to be connected and start the supervisor. The
    /// socket itself opens only once the market gate allows it.
    pub fn connect(self: &Arc<Self>, shutdown: broadcast::Receiver<()>) {
        self.shared.should_be_connected.store(true, Ordering::Release);
        let Some(cmd_rx) = self.cmd_rx.lock().take() else {
            warn!("Delayed feed already started");
            return;
        };
        let feed = Arc::clone(self);
        let handle = tokio::spawn(async move { feed.supervise(cmd_rx, shutdown).await });
        *self.task.lock() = Some(handle);
    }

    /// Drop intent; the supervisor exits on the shutdown signal.
    pub fn disconnect(&self) {
        self.shared.should_be_connected.store(false, Ordering::Release);
    }

    /// Await supervisor exit during shutdown.
    pub async fn join(&self) {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn subscribe(&self, symbols: &[String]) {
        let added = self.shared.queue_subscribe(symbols);
        if added.is_empty() {
            return;
        }
        info!("Delayed feed subscribing to {:?}", added);
        if self.shared.authenticated.load(Ordering::Acquire) {
            let _ = self.cmd_tx.send(FeedCommand::Subscribe(added));
        }
    }

    pub fn unsubscribe(&self, symbols: &[String]) {
        let removed = self.shared.queue_unsubscribe(symbols);
        if removed.is_empty() {
            return;
        }
        info!("Delayed feed unsubscribing from {:?}", removed);
        if self.shared.authenticated.load(Ordering::Acquire) {
            let _ = self.cmd_tx.send(FeedCommand::Unsubscribe(removed));
        }
    }

    pub fn status(&self) -> FeedStatus {
        self.shared.status()
    }

    /// Connect from the open through close + 15 minutes.
    async fn should_connect(&self) -> bool {
        self.clock.is_open().await || market::open_within_delay(Utc::now())
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
                debug!("Delayed feed gate closed; holding");
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
                    error!("Delayed feed authentication failed, not reconnecting: {}", message);
                    break;
                }
                ConnectionExit::Error(message) => {
                    attempts += 1;
                    let Some(delay) = reconnect_delay(attempts) else {
                        error!(
                            "Delayed feed exhausted reconnect budget ({} attempts): {}",
                            attempts - 1,
                            message
                        );
                        break;
                    };
                    warn!(
                        "Delayed feed connection lost (attempt {}), reconnecting in {:?}: {}",
                        attempts, delay, message
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.recv() => break,
                    }
                    // The market may have closed during the wait; the loop
                    // gate will hold, start the next session fresh.
                    if !self.should_connect().await {
                        attempts = 0;
                    }
                }
            }
        }

        self.shared.on_disconnect();
        info!("Delayed feed stopped");
    }

    async fn run_connection(
        &self,
        cmd_rx: &mut mpsc::UnboundedReceiver<FeedCommand>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> ConnectionExit {
        info!("Connecting to delayed feed at {}", self.ws_url);
        let (ws, _) = match connect_async(&self.ws_url).await {
            Ok(ok) => ok,
            Err(e) => return ConnectionExit::Error(format!("connect failed: {e}")),
        };
        let (mut write, mut read) = ws.split();

        // Auth, then wait for the acknowledgement before subscribing.
        let auth = match serde_json::to_string(&WsAction::auth(&self.api_key)) {
            Ok(json) => json,
            Err(e) => return ConnectionExit::Error(format!("auth serialize: {e}")),
        };
        if let Err(e) = write.send(Message::Text(auth.into())).await {
            return ConnectionExit::Error(format!("auth send failed: {e}"));
        }

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

        // Replay everything requested so far, then go live.
        let replay = self.shared.drain_for_replay();
        if !replay.is_empty() {
            info!("Delayed feed re-subscribing {} tickers", replay.len());
            if let Err(e) = self.send_action(&mut write, WsAction::subscribe_minutes(&replay)).await
            {
                return ConnectionExit::Error(e);
            }
        }
        // Commands queued while we were away are covered by the replay.
        while cmd_rx.try_recv().is_ok() {}

        self.shared.connected.store(true, Ordering::Release);
        self.shared.authenticated.store(true, Ordering::Release);
        info!("Delayed feed live");

        let mut gate_timer = interval(MARKET_CHECK_INTERVAL);
        gate_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        gate_timer.tick().await; // completes immediately
        let mut ping_timer = interval(PING_INTERVAL);
        ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping_timer.tick().await;
        let mut pong_deadline: Option<Instant> = None;

        loop {
            let pong_watchdog = async {
                match pong_deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = shutdown.recv() => {
                    let _ = write.send(Message::Close(None)).await;
                    return ConnectionExit::Shutdown;
                }

                _ = gate_timer.tick() => {
                    if !self.should_connect().await {
                        info!("Market closed and delayed tail drained; disconnecting");
                        let _ = write.send(Message::Close(None)).await;
                        return ConnectionExit::GateClosed;
                    }
                }

                _ = ping_timer.tick() => {
                    if let Err(e) = write.send(Message::Ping(Vec::new().into())).await {
                        return ConnectionExit::Error(format!("ping failed: {e}"));
                    }
                    if pong_deadline.is_none() {
                        pong_deadline = Some(Instant::now() + PONG_TIMEOUT);
                    }
                }

                _ = pong_watchdog => {
                    return ConnectionExit::Error("pong timeout, terminating connection".to_string());
                }

                command = cmd_rx.recv() => {
                    let Some(command) = command else {
                        return ConnectionExit::Shutdown;
                    };
                    let action = match command {
                        FeedCommand::Subscribe(symbols) => WsAction::subscribe_minutes(&symbols),
                        FeedCommand::Unsubscribe(symbols) => WsAction::unsubscribe_minutes(&symbols),
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
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            pong_deadline = None;
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

    /// `Some(Ok(()))` on auth success, `Some(Err(_))` on rejection, `None`
    /// for unrelated messages.
    fn auth_outcome(text: &str) -> Option<Result<(), String>> {
        let messages = match parse_ws_frame(text) {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Unparseable handshake frame: {}", e);
                return None;
            }
        };
        for message in messages {
            if let WsMessage::Status { status, message } = message {
                match status.as_deref() {
                    Some("auth_success") => return Some(Ok(())),
                    Some("auth_failed") => {
                        return Some(Err(message.unwrap_or_else(|| "auth_failed".to_string())))
                    }
                    _ => {}
                }
            }
        }
        None
    }

    async fn send_action<S>(&self, write: &mut S, action: WsAction) -> Result<(), String>
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

    /// Dispatch one live frame. Returns an exit only for fatal conditions.
    async fn handle_frame(&self, text: &str) -> Option<ConnectionExit> {
        let messages = match parse_ws_frame(text) {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Unparseable frame from delayed feed: {}", e);
                return None;
            }
        };

        for message in messages {
            match message {
                WsMessage::AggregateMinute(event) => {
                    self.shared.record_message();
                    let Some(quote) = am_to_quote(&event) else {
                        continue;
                    };
                    // Same identity as the fast-feed bar written a quarter
                    // hour ago; this write is the correction.
                    if let Err(e) = self.writer.write_quotes(std::slice::from_ref(&quote)).await {
                        warn!("Failed to write delayed bar for {}: {}", quote.ticker, e);
                    }
                }
                WsMessage::Status { status, message } => match status.as_deref() {
                    Some("auth_failed") => {
                        return Some(ConnectionExit::AuthFailed(
                            message.unwrap_or_else(|| "auth_failed".to_string()),
                        ));
                    }
                    other => debug!("Delayed feed status: {:?} {:?}", other, message),
                },
                WsMessage::Other => {}
            }
        }
        None
    }
}
