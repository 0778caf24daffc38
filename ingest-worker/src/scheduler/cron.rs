//! Cron-like scheduling for recurring jobs
//!
//! Schedules are due by time; weekday and market gates are evaluated at
//! fire time by the driving loop, so a gated fire still advances the next
//! occurrence instead of accumulating.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::America::New_York;

/// Schedule expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleExpression {
    /// Run every N minutes
    EveryMinutes(u32),
    /// Run daily at a wall-clock time in the exchange timezone
    DailyAtEastern { hour: u32, minute: u32 },
}

impl ScheduleExpression {
    /// Calculate the next occurrence strictly after `from`.
    pub fn next_occurrence(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            ScheduleExpression::EveryMinutes(m) => from + Duration::minutes(*m as i64),
            ScheduleExpression::DailyAtEastern { hour, minute } => {
                let local = from.with_timezone(&New_York);
                let time = NaiveTime::from_hms_opt(*hour, *minute, 0)
                    .unwrap_or_else(|| NaiveTime::from_hms_opt(0, 0, 0).unwrap());

                for day_offset in 0..3 {
                    let date = local.date_naive() + Duration::days(day_offset);
                    // DST gaps make some local times unrepresentable; take
                    // the earliest valid mapping and move on.
                    if let Some(candidate) = New_York
                        .from_local_datetime(&date.and_time(time))
                        .earliest()
                    {
                        let candidate = candidate.with_timezone(&Utc);
                        if candidate > from {
                            return candidate;
                        }
                    }
                }
                from + Duration::days(1)
            }
        }
    }
}

/// Whether `now` falls on a weekday in the exchange timezone.
pub fn is_eastern_weekday(now: DateTime<Utc>) -> bool {
    !matches!(
        now.with_timezone(&New_York).weekday(),
        Weekday::Sat | Weekday::Sun
    )
}

/// One scheduled job
#[derive(Debug, Clone)]
pub struct Schedule {
    pub job: super::JobKind,
    pub expression: ScheduleExpression,
    /// Skip fires that land on weekends (exchange timezone)
    pub weekdays_only: bool,
    /// Require an open market at fire time
    pub market_gated: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
}

impl Schedule {
    pub fn new(
        job: super::JobKind,
        expression: ScheduleExpression,
        weekdays_only: bool,
        market_gated: bool,
    ) -> Self {
        Self {
            job,
            expression,
            weekdays_only,
            market_gated,
            last_run: None,
            next_run: expression.next_occurrence(Utc::now()),
        }
    }

    /// Due by time; gates are the caller's concern.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_run
    }

    /// Advance past a fire (whether it executed or was gated away).
    pub fn mark_run(&mut self, now: DateTime<Utc>) {
        self.last_run = Some(now);
        self.next_run = self.expression.next_occurrence(now);
    }
}
