//! Cron-driven batch jobs
//!
//! The scheduler owns the watchlist and a fixed job table. Every job
//! catches its own errors so one failing job never stops the others, and
//! every per-ticker loop isolates ticker failures the same way.
//!
//! | job               | cadence            | market gate |
//! |-------------------|--------------------|-------------|
//! | snapshot          | 5 min, weekdays    | open        |
//! | minute correction | 1 min, weekdays    | open        |
//! | end of day        | 16:30 ET, weekdays | none        |
//! | news              | 15 min             | none        |
//! | fundamentals      | 06:00 ET, weekdays | none        |

mod cron;
mod watchlist;

pub use cron::{is_eastern_weekday, Schedule, ScheduleExpression};
pub use watchlist::Watchlist;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use chrono_tz::America::New_York;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::market::MarketClock;
use crate::news::{NewsItem, NewsStore};
use crate::provider::massive::{
    self, MassiveClient,
};
use crate::provider::ProviderError;
use crate::schema::{QuoteRecord, TickerFilter};
use crate::stitch;
use crate::storage::TsWriter;

/// Resolution of the cron loop
const TICK_INTERVAL: Duration = Duration::from_secs(15);
/// Pause between per-ticker HTTP calls in most jobs
const TICKER_PAUSE: Duration = Duration::from_millis(200);
/// The minute-correction job runs every minute and uses a tighter gap
const CORRECTION_PAUSE: Duration = Duration::from_millis(100);
/// Pause between per-symbol backfills
const BACKFILL_PAUSE: Duration = Duration::from_millis(300);
/// Historical backfill lookback
const BACKFILL_DAYS: i64 = 30;
/// Record cap for minute-range backfill requests
const BACKFILL_MINUTE_LIMIT: usize = 50_000;
/// News items fetched per ticker per run
const NEWS_PAGE_SIZE: usize = 10;
/// Financial periods fetched per ticker per run
const FINANCIALS_LIMIT: usize = 4;

/// The jobs in the cron table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Snapshot,
    MinuteCorrection,
    EndOfDay,
    News,
    Fundamentals,
}

impl JobKind {
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::Snapshot => "snapshot",
            JobKind::MinuteCorrection => "minute_correction",
            JobKind::EndOfDay => "eod",
            JobKind::News => "news",
            JobKind::Fundamentals => "fundamentals",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "snapshot" => Some(JobKind::Snapshot),
            "minute_correction" => Some(JobKind::MinuteCorrection),
            "eod" => Some(JobKind::EndOfDay),
            "news" => Some(JobKind::News),
            "fundamentals" => Some(JobKind::Fundamentals),
            _ => None,
        }
    }
}

/// The full job table.
fn job_table() -> Vec<Schedule> {
    vec![
        Schedule::new(
            JobKind::Snapshot,
            ScheduleExpression::EveryMinutes(5),
            true,
            true,
        ),
        Schedule::new(
            JobKind::MinuteCorrection,
            ScheduleExpression::EveryMinutes(1),
            true,
            true,
        ),
        Schedule::new(
            JobKind::EndOfDay,
            ScheduleExpression::DailyAtEastern { hour: 16, minute: 30 },
            true,
            false,
        ),
        Schedule::new(
            JobKind::News,
            ScheduleExpression::EveryMinutes(15),
            false,
            false,
        ),
        Schedule::new(
            JobKind::Fundamentals,
            ScheduleExpression::DailyAtEastern { hour: 6, minute: 0 },
            true,
            false,
        ),
    ]
}

/// Cron-driven job runner and watchlist owner.
pub struct Scheduler {
    watchlist: Watchlist,
    massive: Arc<MassiveClient>,
    writer: Arc<TsWriter>,
    news_store: Arc<NewsStore>,
    clock: Arc<MarketClock>,
    fetch_news_content: bool,
    running: AtomicBool,
    loop_task: Mutex<Option<JoinHandle<()>>>,
    job_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        initial_watchlist: &[String],
        massive: Arc<MassiveClient>,
        writer: Arc<TsWriter>,
        news_store: Arc<NewsStore>,
        clock: Arc<MarketClock>,
        fetch_news_content: bool,
    ) -> Self {
        Self {
            watchlist: Watchlist::new(initial_watchlist),
            massive,
            writer,
            news_store,
            clock,
            fetch_news_content,
            running: AtomicBool::new(false),
            loop_task: Mutex::new(None),
            job_tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn watchlist(&self) -> &Watchlist {
        &self.watchlist
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Register the job table and start the cron loop. Idempotent.
    pub fn start(self: &Arc<Self>, shutdown: broadcast::Receiver<()>) {
        if self.running.swap(true, Ordering::AcqRel) {
            debug!("Scheduler already running");
            return;
        }
        info!("Scheduler starting with {} jobs", job_table().len());
        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move { scheduler.run_loop(shutdown).await });
        *self.loop_task.lock() = Some(handle);
    }

    /// Unregister the table and wait for in-fire handlers to return.
    /// In-flight HTTP requests inside them complete or time out naturally.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("Scheduler stopping");
        let loop_task = self.loop_task.lock().take();
        if let Some(handle) = loop_task {
            let _ = handle.await;
        }
        let handlers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.job_tasks.lock());
        for handle in handlers {
            let _ = handle.await;
        }
        info!("Scheduler stopped");
    }

    async fn run_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut schedules = job_table();
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => break,
            }
            if !self.running.load(Ordering::Acquire) {
                break;
            }

            let now = Utc::now();
            for schedule in schedules.iter_mut() {
                if !schedule.is_due(now) {
                    continue;
                }
                schedule.mark_run(now);

                if schedule.weekdays_only && !is_eastern_weekday(now) {
                    continue;
                }
                if schedule.market_gated && !self.clock.is_open().await {
                    debug!("Skipping {} fire: market closed", schedule.job.name());
                    continue;
                }

                let job = schedule.job;
                let scheduler = Arc::clone(&self);
                let handle = tokio::spawn(async move { scheduler.run_job(job).await });
                self.job_tasks.lock().push(handle);
            }

            // Drop handles of jobs that have already finished.
            self.job_tasks.lock().retain(|h| !h.is_finished());
        }
    }

    /// Execute a job by name, bypassing the weekday and market gates.
    pub async fn run_task(&self, name: &str) -> Result<(), String> {
        let job = JobKind::from_name(name).ok_or_else(|| format!("unknown task: {name}"))?;
        info!("Manually triggering {}", name);
        self.run_job(job).await;
        Ok(())
    }

    /// Top-level error isolation per job: failures are logged, never
    /// propagated into the cron loop.
    async fn run_job(&self, job: JobKind) {
        debug!("Running {}", job.name());
        let result = match job {
            JobKind::Snapshot => self.job_snapshot().await,
            JobKind::MinuteCorrection => self.job_minute_correction().await,
            JobKind::EndOfDay => self.job_end_of_day().await,
            JobKind::News => self.job_news().await,
            JobKind::Fundamentals => self.job_fundamentals().await,
        };
        if let Err(e) = result {
            error!("Job {} failed: {}", job.name(), e);
        }
    }

    /// All-tickers intraday snapshot into the daily measurement.
    async fn job_snapshot(&self) -> Result<(), String> {
        let entries = self
            .massive
            .full_snapshot()
            .await
            .map_err(|e| e.to_string())?;
        let date = Utc::now().with_timezone(&New_York).date_naive();
        let watch: BTreeSet<String> = self.watchlist.snapshot().into_iter().collect();

        let rows: Vec<_> = entries
            .iter()
            .filter(|e| TickerFilter::Common.matches(&e.ticker) || watch.contains(&e.ticker))
            .filter_map(|e| massive::snapshot_to_daily(e, date))
            .collect();

        let written = self
            .writer
            .write_daily(&rows)
            .await
            .map_err(|e| e.to_string())?;
        info!(
            "Snapshot wrote {} of {} tickers for {}",
            written,
            entries.len(),
            date
        );
        Ok(())
    }

    /// Rolling per-watchlist rewrite of the minute just past the delayed
    /// feed's window. Identity overwrite replaces the provisional bar.
    async fn job_minute_correction(&self) -> Result<(), String> {
        let target = stitch::correction_minute(Utc::now());
        let symbols = self.watchlist.snapshot();

        for (i, symbol) in symbols.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(CORRECTION_PAUSE).await;
            }
            match self
                .massive
                .minute_range(symbol, target, target, 1)
                .await
            {
                Ok(bars) => {
                    let quotes: Vec<QuoteRecord> = bars
                        .iter()
                        .filter_map(|b| massive::agg_to_quote(symbol, b))
                        .filter(|q| q.time == target)
                        .collect();
                    if quotes.is_empty() {
                        debug!("No delayed minute at {} for {}", target, symbol);
                        continue;
                    }
                    if let Err(e) = self.writer.write_quotes(&quotes).await {
                        warn!("Minute correction write failed for {}: {}", symbol, e);
                    }
                }
                Err(e) => warn!("Minute correction fetch failed for {}: {}", symbol, e),
            }
        }
        Ok(())
    }

    /// Authoritative end-of-day rewrite: grouped daily for the whole
    /// market plus a full-day minute rewrite for the watchlist.
    async fn job_end_of_day(&self) -> Result<(), String> {
        let now = Utc::now();
        let local = now.with_timezone(&New_York);
        let date = local.date_naive();
        let watch: BTreeSet<String> = self.watchlist.snapshot().into_iter().collect();

        match self.massive.grouped_daily(date).await {
            Ok(bars) => {
                let rows: Vec<_> = bars
                    .iter()
                    .filter_map(|b| {
                        let ticker = b.ticker.as_deref()?;
                        if !TickerFilter::Common.matches(ticker) && !watch.contains(ticker) {
                            return None;
                        }
                        massive::agg_to_daily(ticker, date, b)
                    })
                    .collect();
                let written = self
                    .writer
                    .write_daily(&rows)
                    .await
                    .map_err(|e| e.to_string())?;
                info!("End-of-day rewrote {} daily bars for {}", written, date);
            }
            Err(e) => error!("Grouped-daily fetch failed for {}: {}", date, e),
        }

        // Whole-day minute rewrite, watchlist only, no ticker filter.
        let day_start = New_York
            .from_local_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default())
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(now - ChronoDuration::hours(24));

        let symbols = self.watchlist.snapshot();
        for (i, symbol) in symbols.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(TICKER_PAUSE).await;
            }
            match self
                .massive
                .minute_range(symbol, day_start, now, BACKFILL_MINUTE_LIMIT)
                .await
            {
                Ok(bars) => {
                    let quotes: Vec<QuoteRecord> = bars
                        .iter()
                        .filter_map(|b| massive::agg_to_quote(symbol, b))
                        .collect();
                    match self.writer.write_quotes(&quotes).await {
                        Ok(written) => {
                            info!("End-of-day rewrote {} minute bars for {}", written, symbol)
                        }
                        Err(e) => warn!("End-of-day minute write failed for {}: {}", symbol, e),
                    }
                }
                Err(e) => warn!("End-of-day minute fetch failed for {}: {}", symbol, e),
            }
        }
        Ok(())
    }

    /// Recent news per watchlist ticker, delegated to the news store.
    async fn job_news(&self) -> Result<(), String> {
        let symbols = self.watchlist.snapshot();
        for (i, symbol) in symbols.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(TICKER_PAUSE).await;
            }
            match self.massive.ticker_news(symbol, NEWS_PAGE_SIZE).await {
                Ok(results) => {
                    let items: Vec<NewsItem> = results
                        .iter()
                        .filter_map(|r| {
                            let record = massive::news_to_record(r, symbol)?;
                            Some(NewsItem {
                                record,
                                insights: r.insights.clone().unwrap_or_default(),
                            })
                        })
                        .collect();
                    if items.is_empty() {
                        continue;
                    }
                    let written = self
                        .news_store
                        .save_news(items, self.fetch_news_content)
                        .await;
                    debug!("Saved {} news items for {}", written, symbol);
                }
                Err(e) => warn!("News fetch failed for {}: {}", symbol, e),
            }
        }
        Ok(())
    }

    /// Reported financials per watchlist ticker. Coverage gaps (403/404)
    /// are informational, not errors.
    async fn job_fundamentals(&self) -> Result<(), String> {
        let symbols = self.watchlist.snapshot();
        for (i, symbol) in symbols.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(TICKER_PAUSE).await;
            }
            match self.massive.financials(symbol, FINANCIALS_LIMIT).await {
                Ok(results) => {
                    let rows: Vec<_> = results
                        .iter()
                        .filter_map(|r| massive::financials_to_record(symbol, r))
                        .collect();
                    if rows.is_empty() {
                        continue;
                    }
                    // Batch-granularity failure handling; no per-record
                    // rollback.
                    match self.writer.write_fundamentals(&rows).await {
                        Ok(written) => {
                            debug!("Wrote {} fundamentals periods for {}", written, symbol)
                        }
                        Err(e) => warn!("Fundamentals write failed for {}: {}", symbol, e),
                    }
                }
                Err(ProviderError::NotAvailable(_)) => {
                    info!("Fundamentals not available for {}", symbol);
                }
                Err(e) => warn!("Fundamentals fetch failed for {}: {}", symbol, e),
            }
        }
        Ok(())
    }

    /// Historical backfill: 30 days of daily bars plus 30 days of minute
    /// bars clipped to stay out of the recent-gap window.
    pub async fn backfill_history(&self, symbols: &[String]) {
        for (i, symbol) in symbols.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(BACKFILL_PAUSE).await;
            }
            let now = Utc::now();
            let from_date = (now - ChronoDuration::days(BACKFILL_DAYS)).date_naive();

            match self.massive.day_range(symbol, from_date, now.date_naive()).await {
                Ok(bars) => {
                    let rows: Vec<_> = bars
                        .iter()
                        .filter_map(|b| massive::agg_to_daily_from_ts(symbol, b))
                        .collect();
                    match self.writer.write_daily(&rows).await {
                        Ok(written) => info!("Backfilled {} daily bars for {}", written, symbol),
                        Err(e) => warn!("Daily backfill write failed for {}: {}", symbol, e),
                    }
                }
                Err(e) => warn!("Daily backfill fetch failed for {}: {}", symbol, e),
            }

            let from = now - ChronoDuration::days(BACKFILL_DAYS);
            match self
                .massive
                .minute_range(symbol, from, now, BACKFILL_MINUTE_LIMIT)
                .await
            {
                Ok(bars) => {
                    let quotes: Vec<QuoteRecord> = bars
                        .iter()
                        .filter_map(|b| massive::agg_to_quote(symbol, b))
                        .collect();
                    let quotes = stitch::clip_history(quotes, now);
                    match self.writer.write_quotes(&quotes).await {
                        Ok(written) => {
                            info!("Backfilled {} minute bars for {}", written, symbol)
                        }
                        Err(e) => warn!("Minute backfill write failed for {}: {}", symbol, e),
                    }
                }
                Err(e) => warn!("Minute backfill fetch failed for {}: {}", symbol, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_names_round_trip() {
        for job in [
            JobKind::Snapshot,
            JobKind::MinuteCorrection,
            JobKind::EndOfDay,
            JobKind::News,
            JobKind::Fundamentals,
        ] {
            assert_eq!(JobKind::from_name(job.name()), Some(job));
        }
        assert_eq!(JobKind::from_name("nope"), None);
    }

    #[test]
    fn test_job_table_gates() {
        let table = job_table();
        assert_eq!(table.len(), 5);

        let find = |job: JobKind| table.iter().find(|s| s.job == job).unwrap();
        assert!(find(JobKind::Snapshot).market_gated);
        assert!(find(JobKind::MinuteCorrection).market_gated);
        assert!(!find(JobKind::EndOfDay).market_gated);
        assert!(find(JobKind::EndOfDay).weekdays_only);
        assert!(!find(JobKind::News).weekdays_only);
        assert!(!find(JobKind::News).market_gated);
        assert!(find(JobKind::Fundamentals).weekdays_only);
    }
}
