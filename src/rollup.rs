//! Rollup engine: raw readings into hourly and daily aggregates.
//!
//! A rollup only runs for a period that has fully elapsed, checks for an
//! existing aggregate before reading any raw data, and writes exactly one
//! aggregate keyed by the period start. Re-running it is always safe.

use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{Duration, NaiveDate};
use tracing::{debug, info, warn};

use crate::fields::FieldMap;
use crate::models::{DailyAggregate, HourlyAggregate, RawReading, Summary};
use crate::period::{date_key, Calendar, HOUR_MS};
use crate::reconcile::reconcile_readings;
use crate::store::TimeSeriesStore;
use crate::EpochMillis;

// ---

/// What a single rollup invocation did.
#[derive(Debug, Clone, PartialEq)]
pub enum RollupOutcome<T> {
    /// A new aggregate was written.
    Created(T),
    /// An aggregate for the period already existed; nothing was written.
    AlreadyExists,
    /// No raw readings in the period (sensor offline); nothing was written.
    NoData,
    /// The period has not fully elapsed yet; nothing was written.
    Incomplete,
}

impl<T> RollupOutcome<T> {
    // ---
    pub fn is_created(&self) -> bool {
        matches!(self, RollupOutcome::Created(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            RollupOutcome::Created(_) => "created",
            RollupOutcome::AlreadyExists => "already_exists",
            RollupOutcome::NoData => "no_data",
            RollupOutcome::Incomplete => "incomplete",
        }
    }
}

/// Counts of outcomes over a run of several periods.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollupTally {
    pub created: usize,
    pub existing: usize,
    pub no_data: usize,
    pub incomplete: usize,
}

impl RollupTally {
    fn record<T>(&mut self, outcome: &RollupOutcome<T>) {
        match outcome {
            RollupOutcome::Created(_) => self.created += 1,
            RollupOutcome::AlreadyExists => self.existing += 1,
            RollupOutcome::NoData => self.no_data += 1,
            RollupOutcome::Incomplete => self.incomplete += 1,
        }
    }
}

/// Per-day counts from [`RollupEngine::backfill_days`].
pub type BackfillReport = RollupTally;

/// Summary of a batch of readings plus what reconciliation observed.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingStats {
    pub summary: Summary,
    pub counter_resets: usize,
}

#[derive(Default)]
struct Running {
    sum: f64,
    count: usize,
    min: Option<f64>,
    max: Option<f64>,
}

impl Running {
    // ---
    fn push(&mut self, v: f64) {
        self.sum += v;
        self.count += 1;
        self.min = Some(self.min.map_or(v, |m| m.min(v)));
        self.max = Some(self.max.map_or(v, |m| m.max(v)));
    }

    fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Statistics over one period's readings.
///
/// Temperature and humidity use only readings with a value; the rainfall
/// rate mean uses only positive rates; the rainfall total is reconciled from
/// the cumulative counter.
pub fn summarize_readings(readings: &[RawReading]) -> ReadingStats {
    // ---
    let mut temp = Running::default();
    let mut hum = Running::default();
    let mut rate = Running::default();

    for r in readings {
        if let Some(t) = r.temperature {
            temp.push(t);
        }
        if let Some(h) = r.humidity {
            hum.push(h);
        }
        if let Some(v) = r.rainfall_rate.filter(|v| *v > 0.0) {
            rate.push(v);
        }
    }

    let rain = reconcile_readings(readings);

    ReadingStats {
        summary: Summary {
            avg_temperature: temp.mean(),
            min_temperature: temp.min,
            max_temperature: temp.max,
            avg_humidity: hum.mean(),
            min_humidity: hum.min,
            max_humidity: hum.max,
            avg_rainfall_rate: rate.mean(),
            total_rainfall: rain.total_mm,
            record_count: readings.len() as i64,
        },
        counter_resets: rain.resets,
    }
}

/// Rolls raw readings into hourly and daily aggregates.
pub struct RollupEngine<S> {
    // ---
    store: Arc<S>,
    fields: FieldMap,
    calendar: Calendar,
}

impl<S: TimeSeriesStore> RollupEngine<S> {
    // ---
    pub fn new(store: Arc<S>, fields: FieldMap, calendar: Calendar) -> Self {
        Self {
            store,
            fields,
            calendar,
        }
    }

    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }

    async fn load_readings(&self, start: EpochMillis, end: EpochMillis) -> Result<Vec<RawReading>> {
        // ---
        let records = self.store.raw_range(start, end, None).await?;
        Ok(self.fields.resolve_all(&records))
    }

    /// Aggregate the hour starting at `hour_start`.
    pub async fn rollup_hour(
        &self,
        hour_start: EpochMillis,
        now: EpochMillis,
    ) -> Result<RollupOutcome<HourlyAggregate>> {
        // ---
        if self.calendar.hour_start(hour_start) != hour_start {
            bail!("{} is not an hour boundary", hour_start);
        }
        let hour_key = self.calendar.hour_key(hour_start);
        let hour_end = hour_start + HOUR_MS;

        if hour_end > now {
            debug!(hour = %hour_key, "Hour has not elapsed yet, skipping");
            return Ok(RollupOutcome::Incomplete);
        }

        if self.store.hourly_exists(hour_start).await? {
            info!(hour = %hour_key, "Hourly aggregate already exists, skipping");
            return Ok(RollupOutcome::AlreadyExists);
        }

        let readings = self.load_readings(hour_start, hour_end).await?;
        if readings.is_empty() {
            info!(hour = %hour_key, "No sensor data for hour (sensor offline or upload delayed)");
            return Ok(RollupOutcome::NoData);
        }

        let stats = summarize_readings(&readings);
        if stats.counter_resets > 0 {
            warn!(
                hour = %hour_key,
                resets = stats.counter_resets,
                "Anomaly: rainfall counter reset within hour"
            );
        }

        let agg = HourlyAggregate {
            hour_start,
            summary: stats.summary,
        };

        if !self.store.upsert_hourly(&agg).await? {
            info!(hour = %hour_key, "Hourly aggregate written concurrently, skipping");
            return Ok(RollupOutcome::AlreadyExists);
        }

        info!(
            hour = %hour_key,
            records = agg.summary.record_count,
            total_rainfall = agg.summary.total_rainfall,
            "Hourly aggregate saved"
        );
        Ok(RollupOutcome::Created(agg))
    }

    /// Aggregate one local calendar day from raw readings.
    ///
    /// A day whose raw data has already been deleted reports `NoData`; daily
    /// aggregates are never synthesized from anything else.
    pub async fn rollup_day(
        &self,
        date: NaiveDate,
        now: EpochMillis,
    ) -> Result<RollupOutcome<DailyAggregate>> {
        // ---
        let key = date_key(date);
        let (day_start, day_end) = self.calendar.day_bounds(date);

        if day_end > now {
            debug!(date = %key, "Day has not elapsed yet, skipping");
            return Ok(RollupOutcome::Incomplete);
        }

        if self.store.daily_exists(date).await? {
            info!(date = %key, "Daily aggregate already exists, skipping");
            return Ok(RollupOutcome::AlreadyExists);
        }

        let readings = self.load_readings(day_start, day_end).await?;
        if readings.is_empty() {
            info!(date = %key, "No sensor data for day");
            return Ok(RollupOutcome::NoData);
        }

        let stats = summarize_readings(&readings);
        if stats.counter_resets > 0 {
            warn!(
                date = %key,
                resets = stats.counter_resets,
                "Anomaly: rainfall counter reset within day"
            );
        }

        let agg = DailyAggregate {
            date,
            day_start,
            summary: stats.summary,
        };

        if !self.store.upsert_daily(&agg).await? {
            info!(date = %key, "Daily aggregate written concurrently, skipping");
            return Ok(RollupOutcome::AlreadyExists);
        }

        info!(
            date = %key,
            records = agg.summary.record_count,
            total_rainfall = agg.summary.total_rainfall,
            "Daily aggregate saved"
        );
        Ok(RollupOutcome::Created(agg))
    }

    /// Scheduled hourly entry: the last completed hour plus up to
    /// `catchup_hours` earlier hours that a missed run left without an aggregate.
    pub async fn run_hourly(&self, now: EpochMillis, catchup_hours: u32) -> Result<RollupTally> {
        // ---
        let last = self.calendar.last_completed_hour(now);
        let first = last - i64::from(catchup_hours) * HOUR_MS;

        let mut tally = RollupTally::default();
        let mut hour = first;
        while hour <= last {
            let outcome = self.rollup_hour(hour, now).await?;
            tally.record(&outcome);
            hour += HOUR_MS;
        }

        info!(
            created = tally.created,
            existing = tally.existing,
            no_data = tally.no_data,
            "Hourly rollup run complete"
        );
        Ok(tally)
    }

    /// Roll up every day in `from..=to`.
    pub async fn backfill_days(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        now: EpochMillis,
    ) -> Result<BackfillReport> {
        // ---
        if from > to {
            bail!("backfill range is empty: {} > {}", date_key(from), date_key(to));
        }

        let mut tally = BackfillReport::default();
        let mut date = from;
        while date <= to {
            let outcome = self.rollup_day(date, now).await?;
            tally.record(&outcome);
            date += Duration::days(1);
        }

        info!(
            from = %date_key(from),
            to = %date_key(to),
            created = tally.created,
            existing = tally.existing,
            no_data = tally.no_data,
            incomplete = tally.incomplete,
            "Daily backfill complete"
        );
        Ok(tally)
    }
}
