//! Control HTTP surface
//!
//! Health, subscription listing, and watchlist mutation. The server is
//! started before any other component initializes so orchestrator
//! liveness probes pass while slower pieces (store credentials, feeds)
//! come up; until they do, the health payload reports them as down and
//! mutations return 503.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::feed::{DelayedFeed, FastFeed, FeedStatus};
use crate::scheduler::Scheduler;

/// Late-bound component handles. The control server starts before these
/// exist; `main` registers them as they come up.
#[derive(Default)]
pub struct Services {
    pub fast: RwLock<Option<Arc<FastFeed>>>,
    pub delayed: RwLock<Option<Arc<DelayedFeed>>>,
    pub scheduler: RwLock<Option<Arc<Scheduler>>>,
}

/// Shared control-surface state
pub struct ControlState {
    pub services: Services,
    pub started_at: Instant,
    pub shutting_down: AtomicBool,
}

impl ControlState {
    pub fn new() -> Self {
        Self {
            services: Services::default(),
            started_at: Instant::now(),
            shutting_down: AtomicBool::new(false),
        }
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new()
    }
}

/// Bind and serve until the shutdown signal.
pub async fn serve(
    port: u16,
    state: Arc<ControlState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Control server listening on port {}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}

pub fn router(state: Arc<ControlState>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/subscriptions", get(subscriptions))
        .route("/subscribe", post(subscribe))
        .route("/unsubscribe", post(unsubscribe))
        .route("/tasks/:name", post(run_task))
        .fallback(not_found)
        .with_state(state)
}

fn feed_service(status: Option<FeedStatus>) -> Value {
    match status {
        Some(status) => json!({
            "status": if status.connected { "connected" } else { "disconnected" },
            "subscriptions": status.subscriptions,
            "messagesReceived": status.messages_received,
            "lastMessage": status.last_message,
        }),
        None => json!({ "status": "disconnected", "subscriptions": [] }),
    }
}

async fn health(State(state): State<Arc<ControlState>>) -> Json<Value> {
    let fast = state.services.fast.read().as_ref().map(|f| f.status());
    let delayed = state.services.delayed.read().as_ref().map(|f| f.status());
    let scheduler = state.services.scheduler.read().clone();

    let scheduler_service = match scheduler {
        Some(scheduler) => json!({
            "status": if scheduler.is_running() { "running" } else { "stopped" },
            "watchlist": scheduler.watchlist().snapshot(),
        }),
        None => json!({ "status": "stopped", "watchlist": [] }),
    };

    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "uptime": state.started_at.elapsed().as_secs(),
        "memory": memory_usage_bytes(),
        "services": {
            "fastFeed": feed_service(fast),
            "delayedFeed": feed_service(delayed),
            "scheduler": scheduler_service,
        },
    }))
}

async fn subscriptions(State(state): State<Arc<ControlState>>) -> Json<Value> {
    let subs = state
        .services
        .fast
        .read()
        .as_ref()
        .map(|f| f.status().subscriptions)
        .or_else(|| {
            state
                .services
                .delayed
                .read()
                .as_ref()
                .map(|f| f.status().subscriptions)
        })
        .unwrap_or_default();
    Json(json!({ "subscriptions": subs }))
}

async fn subscribe(State(state): State<Arc<ControlState>>, body: String) -> Response {
    let symbols = match parse_symbols(&body) {
        Ok(symbols) => symbols,
        Err(message) => return bad_request(&message),
    };
    let Some((fast, delayed, scheduler)) = components(&state) else {
        return unavailable();
    };

    fast.subscribe(&symbols);
    delayed.subscribe(&symbols);
    let added = scheduler.watchlist().add(&symbols);

    // Stage the history fill in the background; the response only
    // acknowledges the subscription.
    if !added.is_empty() {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.backfill_history(&added).await });
    }

    Json(json!({
        "success": true,
        "subscriptions": fast.status().subscriptions,
    }))
    .into_response()
}

async fn unsubscribe(State(state): State<Arc<ControlState>>, body: String) -> Response {
    let symbols = match parse_symbols(&body) {
        Ok(symbols) => symbols,
        Err(message) => return bad_request(&message),
    };
    let Some((fast, delayed, scheduler)) = components(&state) else {
        return unavailable();
    };

    fast.unsubscribe(&symbols);
    delayed.unsubscribe(&symbols);
    scheduler.watchlist().remove(&symbols);

    Json(json!({
        "success": true,
        "subscriptions": fast.status().subscriptions,
    }))
    .into_response()
}

async fn run_task(
    State(state): State<Arc<ControlState>>,
    Path(name): Path<String>,
) -> Response {
    let scheduler = state.services.scheduler.read().clone();
    let Some(scheduler) = scheduler else {
        return unavailable();
    };
    match scheduler.run_task(&name).await {
        Ok(()) => Json(json!({ "success": true, "task": name })).into_response(),
        Err(message) => {
            error!("Manual task trigger failed: {}", message);
            (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
        }
    }
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))).into_response()
}

/// Validate a `{"symbols": [..]}` body.
fn parse_symbols(body: &str) -> Result<Vec<String>, String> {
    let value: Value =
        serde_json::from_str(body).map_err(|_| "invalid JSON body".to_string())?;
    let Some(array) = value.get("symbols").and_then(Value::as_array) else {
        return Err("symbols must be an array".to_string());
    };
    let symbols: Vec<String> = array
        .iter()
        .filter_map(Value::as_str)
        .map(|s| s.trim().to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    if symbols.len() != array.len() {
        return Err("symbols must be an array of non-empty strings".to_string());
    }
    Ok(symbols)
}

type Components = (Arc<FastFeed>, Arc<DelayedFeed>, Arc<Scheduler>);

/// All three mutable-path components, or `None` while initializing or
/// shutting down.
fn components(state: &ControlState) -> Option<Components> {
    if state.shutting_down.load(Ordering::Acquire) {
        return None;
    }
    let fast = state.services.fast.read().clone()?;
    let delayed = state.services.delayed.read().clone()?;
    let scheduler = state.services.scheduler.read().clone()?;
    Some((fast, delayed, scheduler))
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

fn unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": "service unavailable" })),
    )
        .into_response()
}

/// Resident set size from procfs, zero where unavailable.
fn memory_usage_bytes() -> u64 {
    std::fs::read_to_string("/proc/self/statm")
        .ok()
        .and_then(|s| {
            s.split_whitespace()
                .nth(1)
                .and_then(|pages| pages.parse::<u64>().ok())
        })
        .map(|pages| pages * 4096)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_symbols_valid() {
        let symbols = parse_symbols(r#"{"symbols":[" tsla ","NVDA"]}"#).unwrap();
        assert_eq!(symbols, vec!["TSLA", "NVDA"]);
    }

    #[test]
    fn test_parse_symbols_rejects_non_array() {
        assert!(parse_symbols(r#"{"symbols":"TSLA"}"#).is_err());
        assert!(parse_symbols(r#"{}"#).is_err());
        assert!(parse_symbols("not json").is_err());
    }

    #[test]
    fn test_parse_symbols_rejects_non_string_entries() {
        assert!(parse_symbols(r#"{"symbols":["TSLA",42]}"#).is_err());
    }
}
