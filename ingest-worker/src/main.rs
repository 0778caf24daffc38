//! Ingestion worker entrypoint
//!
//! Bootstrap order matters: the control server comes up first so
//! orchestrator liveness probes pass while credentials are fetched and
//! the heavier components initialize.
//!
//! # Logging Configuration
//!
//! - `RUST_LOG`: log filter (e.g., "ingest_worker=debug")
//! - `LOG_FORMAT`: "pretty", "compact", or "json"
//! - `LOG_LEVEL`: default level when RUST_LOG is unset

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use ingest_common::logging::{init_logging, LogConfig};

use ingest_worker::config::Settings;
use ingest_worker::control::{self, ControlState};
use ingest_worker::feed::{DelayedFeed, FastFeed};
use ingest_worker::market::MarketClock;
use ingest_worker::news::NewsStore;
use ingest_worker::provider::alpaca::AlpacaClient;
use ingest_worker::provider::massive::MassiveClient;
use ingest_worker::scheduler::Scheduler;
use ingest_worker::secrets::SecretsClient;
use ingest_worker::storage::TsWriter;

#[derive(Parser)]
#[command(name = "ingest-worker", about = "Continuous market-data ingestion worker")]
struct Cli {
    /// Disable the streaming feeds for this run
    #[arg(long)]
    no_realtime: bool,

    /// Disable the scheduled jobs for this run
    #[arg(long)]
    no_scheduler: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::from_env().with_default_level("ingest_worker=info,ingest_common=info");
    init_logging(log_config)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let settings = Settings::load().context("Failed to load settings")?;

    let enable_realtime = settings.enable_realtime && !cli.no_realtime;
    let enable_scheduler = settings.enable_scheduler && !cli.no_scheduler;

    info!("Starting ingestion worker");
    info!("  Realtime feeds: {}", enable_realtime);
    info!("  Scheduler: {}", enable_scheduler);
    info!("  Watchlist: {:?}", settings.watchlist());

    // Process-wide shutdown signal.
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Health before everything else: credential fetches and the first
    // store connection can take seconds or fail outright.
    let state = Arc::new(ControlState::new());
    {
        let state = Arc::clone(&state);
        let port = settings.health_check_port;
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = control::serve(port, state, shutdown_rx).await {
                error!("Control server failed: {}", e);
            }
        });
    }

    let secrets = Arc::new(SecretsClient::connect(&settings.aws_region).await);
    let api_keys = secrets
        .api_keys(&settings.api_keys_secret_arn)
        .await
        .context("Failed to resolve upstream API keys")?;

    if !settings.influxdb_endpoint.is_empty() && settings.influxdb_secret_arn.is_empty() {
        warn!("INFLUXDB_SECRET_ARN is not set; store writes will fail to authenticate");
    }
    if settings.influxdb_endpoint.is_empty() {
        warn!("INFLUXDB_ENDPOINT is not set; running without persistence");
    }

    let writer = Arc::new(TsWriter::new(settings.store_settings(), Arc::clone(&secrets)));

    let massive = Arc::new(
        MassiveClient::new(&settings.massive_base_url, &api_keys.massive_key)
            .context("Failed to build delayed-feed REST client")?,
    );
    let alpaca = Arc::new(
        AlpacaClient::new(
            &settings.alpaca_data_url,
            &api_keys.alpaca_key,
            &api_keys.alpaca_secret,
        )
        .context("Failed to build fast-feed REST client")?,
    );
    let clock = Arc::new(MarketClock::new(Some(Arc::clone(&massive))));
    let news_store = Arc::new(
        NewsStore::connect(
            &settings.aws_region,
            &settings.data_bucket,
            Arc::clone(&writer),
        )
        .await,
    );

    let watchlist = settings.watchlist();

    let fast = Arc::new(FastFeed::new(
        &settings.alpaca_stream_url,
        &api_keys.alpaca_key,
        &api_keys.alpaca_secret,
        Arc::clone(&alpaca),
        Arc::clone(&writer),
        Arc::clone(&clock),
    ));
    let delayed = Arc::new(DelayedFeed::new(
        settings.delayed_ws_url(),
        &api_keys.massive_key,
        Arc::clone(&writer),
        Arc::clone(&clock),
    ));

    if enable_realtime {
        fast.subscribe(&watchlist);
        delayed.subscribe(&watchlist);
        fast.connect(shutdown_tx.subscribe());
        delayed.connect(shutdown_tx.subscribe());
    }

    let scheduler = Arc::new(Scheduler::new(
        &watchlist,
        Arc::clone(&massive),
        Arc::clone(&writer),
        Arc::clone(&news_store),
        Arc::clone(&clock),
        settings.fetch_news_content,
    ));
    if enable_scheduler {
        scheduler.start(shutdown_tx.subscribe());
    }

    // Components are live; expose them to the control surface.
    *state.services.fast.write() = Some(Arc::clone(&fast));
    *state.services.delayed.write() = Some(Arc::clone(&delayed));
    *state.services.scheduler.write() = Some(Arc::clone(&scheduler));

    info!("Ingestion worker started");

    wait_for_signal().await;
    info!("Shutdown signal received");

    // Stop accepting mutations, then wind the components down in order.
    state.shutting_down.store(true, Ordering::Release);
    fast.disconnect();
    delayed.disconnect();
    let _ = shutdown_tx.send(());

    scheduler.stop().await;
    fast.join().await;
    delayed.join().await;
    writer.close().await;

    info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
