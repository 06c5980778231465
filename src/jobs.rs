//! Scheduler entry points.
//!
//! Each job is a single call the binaries in `src/bin` make after loading
//! configuration. Store failures are retried with exponential backoff; if
//! the last attempt fails the error propagates and the binary exits non-zero
//! so the scheduler can alert. Every step is idempotent, so a retried or
//! re-scheduled run never duplicates work.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::config::Config;
use crate::fields::FieldMap;
use crate::models::DailyAggregate;
use crate::period::Calendar;
use crate::retention::{RetentionManager, RetentionPolicy, RetentionReport};
use crate::rollup::{BackfillReport, RollupEngine, RollupOutcome, RollupTally};
use crate::stats::{collect_stats, StoreStats};
use crate::store::TimeSeriesStore;
use crate::EpochMillis;

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base, 2×base, 4×base, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Run `op` until it succeeds or `policy.attempts` is exhausted.
pub async fn retry_with_backoff<T, F, Fut>(label: &str, policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    // ---
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    job = label,
                    attempt,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e.context(format!("{} failed after {} attempts", label, attempts))),
        }
    }
}

/// Everything a job needs, independent of where it was configured.
#[derive(Debug, Clone)]
pub struct JobSettings {
    // ---
    pub fields: FieldMap,
    pub calendar: Calendar,
    pub retention: RetentionPolicy,
    pub retry: RetryPolicy,
    pub catchup_hours: u32,
    pub quota_mb: u64,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            fields: FieldMap::default(),
            calendar: Calendar::utc(),
            retention: RetentionPolicy::default(),
            retry: RetryPolicy::default(),
            catchup_hours: 24,
            quota_mb: 1024,
        }
    }
}

impl JobSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        // ---
        Ok(Self {
            fields: config.field_map(),
            calendar: config.calendar()?,
            retention: config.retention_policy(),
            retry: RetryPolicy {
                attempts: config.job_retry_attempts,
                base_delay: Duration::from_millis(u64::from(config.job_retry_base_ms)),
            },
            catchup_hours: config.hourly_catchup_hours,
            quota_mb: u64::from(config.storage_quota_mb),
        })
    }

    fn engine<S: TimeSeriesStore>(&self, store: Arc<S>) -> RollupEngine<S> {
        RollupEngine::new(store, self.fields.clone(), self.calendar)
    }
}

/// Hourly schedule: last completed hour plus catch-up.
pub async fn run_hourly_job<S: TimeSeriesStore>(
    store: Arc<S>,
    settings: &JobSettings,
    now: EpochMillis,
) -> Result<RollupTally> {
    // ---
    let engine = settings.engine(store);
    retry_with_backoff("hourly rollup", &settings.retry, || {
        engine.run_hourly(now, settings.catchup_hours)
    })
    .await
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaintenanceReport {
    pub yesterday: RollupOutcome<DailyAggregate>,
    pub retention: RetentionReport,
    pub stats: StoreStats,
}

/// Daily schedule: roll up yesterday, apply retention, report storage.
pub async fn run_maintenance_job<S: TimeSeriesStore>(
    store: Arc<S>,
    settings: &JobSettings,
    now: EpochMillis,
) -> Result<MaintenanceReport> {
    // ---
    let engine = settings.engine(store.clone());
    let yesterday = settings.calendar.yesterday(now);
    let outcome = retry_with_backoff("daily rollup", &settings.retry, || {
        engine.rollup_day(yesterday, now)
    })
    .await?;
    info!(outcome = outcome.label(), "Yesterday's rollup done");

    let manager = RetentionManager::new(
        store.clone(),
        settings.fields.clone(),
        settings.calendar,
        settings.retention.clone(),
    )?;
    let retention = retry_with_backoff("retention", &settings.retry, || manager.run_retention(now)).await?;

    let stats = collect_stats(store.as_ref(), settings.quota_mb).await?;
    info!(
        raw = stats.raw,
        hourly = stats.hourly,
        daily = stats.daily,
        estimated_bytes = stats.estimated_bytes,
        percent_of_quota = %format!("{:.1}", stats.percent_of_quota),
        health = ?stats.health,
        "Storage statistics"
    );

    Ok(MaintenanceReport {
        yesterday: outcome,
        retention,
        stats,
    })
}

/// Roll up an explicit date range, e.g. after importing historic raw data.
pub async fn run_backfill_job<S: TimeSeriesStore>(
    store: Arc<S>,
    settings: &JobSettings,
    from: NaiveDate,
    to: NaiveDate,
    now: EpochMillis,
) -> Result<BackfillReport> {
    // ---
    let engine = settings.engine(store);
    retry_with_backoff("backfill", &settings.retry, || engine.backfill_days(from, to, now)).await
}
