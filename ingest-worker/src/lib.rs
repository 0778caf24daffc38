//! # Ingest Worker
//!
//! Continuous market-data ingestion for US equities. For a configured
//! watchlist and the whole market, the worker assembles a time-ordered,
//! self-correcting stream of minute and daily OHLCV bars, news, and
//! quarterly fundamentals, and writes them to a time-series store (with a
//! companion object store for news article bodies).
//!
//! ## Architecture
//!
//! Three producers feed the same minute measurement and converge on the
//! authoritative consolidated-tape values through identity overwrite:
//!
//! - a low-latency streaming feed, authoritative for the last minutes
//! - a 15-minute-delayed consolidated stream that overwrites those bars
//!   as its window catches up
//! - scheduled REST jobs that backfill history, correct the most recent
//!   delayed minute, and rewrite the whole day after the close
//!
//! Each producer owns a disjoint time window (see [`stitch`]); the store's
//! upsert-by-identity semantics resolve the union without coordination.

pub mod config;
pub mod control;
pub mod feed;
pub mod market;
pub mod news;
pub mod provider;
pub mod scheduler;
pub mod schema;
pub mod secrets;
pub mod stitch;
pub mod storage;

pub use config::Settings;
pub use schema::{DailyRecord, FundamentalsRecord, Market, NewsRecord, QuoteRecord, TickerFilter};
pub use storage::TsWriter;
