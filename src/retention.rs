//! Retention manager: batched expiry of raw readings and hourly aggregates.
//!
//! Before any raw reading is deleted, every day whose raw data is about to go
//! (plus a guard margin) must have its daily aggregate. If that step fails the
//! run aborts with nothing deleted. Daily aggregates are kept forever and are
//! not a valid deletion target.

use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Duration;
use tracing::{debug, info, warn};

use crate::fields::FieldMap;
use crate::period::{Calendar, DAY_MS};
use crate::rollup::{RollupEngine, RollupTally};
use crate::store::{RetentionTarget, TimeSeriesStore};
use crate::EpochMillis;

// ---

/// Retention windows and batching limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    // ---
    pub raw_window_days: u32,
    pub hourly_window_days: u32,
    pub batch_size: usize,
    /// Upper bound on delete batches per target per run; 0 means unbounded.
    pub max_batches: usize,
    /// Extra days past the raw cutoff whose dailies are ensured before deleting.
    pub guard_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            raw_window_days: 60,
            hourly_window_days: 1095,
            batch_size: 500,
            max_batches: 0,
            guard_days: 2,
        }
    }
}

impl RetentionPolicy {
    // ---
    /// Reject policies that would leave a coverage gap or never make progress.
    pub fn validate(&self) -> Result<()> {
        // ---
        if self.raw_window_days == 0 {
            bail!("raw retention window must be at least one day");
        }
        if self.hourly_window_days <= self.raw_window_days {
            bail!(
                "hourly retention ({} days) must exceed raw retention ({} days)",
                self.hourly_window_days,
                self.raw_window_days
            );
        }
        if self.batch_size == 0 {
            bail!("retention batch size must be positive");
        }
        Ok(())
    }

    pub fn raw_cutoff(&self, now: EpochMillis) -> EpochMillis {
        now - i64::from(self.raw_window_days) * DAY_MS
    }

    pub fn hourly_cutoff(&self, now: EpochMillis) -> EpochMillis {
        now - i64::from(self.hourly_window_days) * DAY_MS
    }
}

/// Deletion progress for one target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub deleted: usize,
    pub batches: usize,
    /// False when the batch limit stopped the purge with expired records left.
    pub complete: bool,
}

/// What one retention cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    // ---
    pub dailies: RollupTally,
    pub raw: PurgeReport,
    pub hourly: PurgeReport,
}

impl RetentionReport {
    pub fn is_complete(&self) -> bool {
        self.raw.complete && self.hourly.complete
    }
}

/// Runs retention cycles against one store.
pub struct RetentionManager<S> {
    // ---
    store: Arc<S>,
    rollup: RollupEngine<S>,
    policy: RetentionPolicy,
}

impl<S: TimeSeriesStore> RetentionManager<S> {
    // ---
    pub fn new(
        store: Arc<S>,
        fields: FieldMap,
        calendar: Calendar,
        policy: RetentionPolicy,
    ) -> Result<Self> {
        // ---
        policy.validate()?;
        let rollup = RollupEngine::new(store.clone(), fields, calendar);
        Ok(Self {
            store,
            rollup,
            policy,
        })
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// One full retention cycle.
    pub async fn run_retention(&self, now: EpochMillis) -> Result<RetentionReport> {
        // ---
        let raw_cutoff = self.policy.raw_cutoff(now);
        let hourly_cutoff = self.policy.hourly_cutoff(now);
        let calendar = self.rollup.calendar();

        info!(
            raw_cutoff = %calendar.display(raw_cutoff),
            hourly_cutoff = %calendar.display(hourly_cutoff),
            "Starting retention cycle"
        );

        let dailies = self.ensure_dailies(raw_cutoff, now).await?;
        let raw = self.purge(RetentionTarget::Raw, raw_cutoff).await?;
        let hourly = self.purge(RetentionTarget::Hourly, hourly_cutoff).await?;

        let report = RetentionReport {
            dailies,
            raw,
            hourly,
        };
        info!(
            dailies_created = report.dailies.created,
            raw_deleted = report.raw.deleted,
            hourly_deleted = report.hourly.deleted,
            complete = report.is_complete(),
            "Retention cycle finished"
        );
        Ok(report)
    }

    /// Roll up every elapsed day from the oldest raw reading through the
    /// guard margin past the raw cutoff.
    async fn ensure_dailies(&self, raw_cutoff: EpochMillis, now: EpochMillis) -> Result<RollupTally> {
        // ---
        let Some(oldest) = self.store.oldest_raw_timestamp().await? else {
            debug!("No raw data, nothing to protect");
            return Ok(RollupTally::default());
        };

        let calendar = self.rollup.calendar();
        let from = calendar.date_of(oldest);
        let guarded = calendar.date_of(raw_cutoff) + Duration::days(i64::from(self.policy.guard_days));
        let to = guarded.min(calendar.yesterday(now));

        if from > to {
            return Ok(RollupTally::default());
        }

        self.rollup.backfill_days(from, to, now).await
    }

    async fn purge(&self, target: RetentionTarget, cutoff: EpochMillis) -> Result<PurgeReport> {
        // ---
        let table = target.collection().table();
        let mut report = PurgeReport {
            complete: true,
            ..PurgeReport::default()
        };

        loop {
            if self.policy.max_batches > 0 && report.batches >= self.policy.max_batches {
                let remaining = self.store.expired_keys(target, cutoff, 1).await?;
                if !remaining.is_empty() {
                    report.complete = false;
                    info!(table, batches = report.batches, "Batch limit reached, resuming next cycle");
                }
                break;
            }

            let keys = self
                .store
                .expired_keys(target, cutoff, self.policy.batch_size)
                .await?;
            if keys.is_empty() {
                break;
            }

            let deleted = self.store.delete_batch(target, &keys).await?;
            report.deleted += deleted;
            report.batches += 1;
            debug!(table, batch = report.batches, deleted, "Deleted expired batch");

            if deleted == 0 {
                warn!(table, "Expired keys were not deleted, stopping purge");
                report.complete = false;
                break;
            }
            if keys.len() < self.policy.batch_size {
                break;
            }
        }

        if report.deleted > 0 {
            info!(table, deleted = report.deleted, "Expired records removed");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{HourlyAggregate, RawReading, Summary};
    use crate::period::HOUR_MS;
    use crate::store::{Collection, MemoryStore};
    use chrono::TimeZone;

    fn ms(y: i32, mo: u32, d: u32, h: u32) -> i64 {
        chrono::Utc
            .with_ymd_and_hms(y, mo, d, h, 0, 0)
            .unwrap()
            .timestamp_millis()
    }

    fn policy(raw: u32, hourly: u32, batch: usize, max_batches: usize) -> RetentionPolicy {
        RetentionPolicy {
            raw_window_days: raw,
            hourly_window_days: hourly,
            batch_size: batch,
            max_batches,
            guard_days: 1,
        }
    }

    fn manager(store: &Arc<MemoryStore>, policy: RetentionPolicy) -> RetentionManager<MemoryStore> {
        RetentionManager::new(store.clone(), FieldMap::default(), Calendar::utc(), policy).unwrap()
    }

    fn reading(ts: i64) -> RawReading {
        RawReading {
            temperature: Some(25.0),
            rainfall_cumulative: Some(1.0),
            ..RawReading::at(ts)
        }
    }

    #[test]
    fn test_validate() {
        // ---
        assert!(RetentionPolicy::default().validate().is_ok());
        assert!(policy(60, 60, 500, 0).validate().is_err());
        assert!(policy(60, 1095, 0, 0).validate().is_err());
        assert!(policy(0, 1095, 500, 0).validate().is_err());
    }

    #[tokio::test]
    async fn test_daily_created_before_raw_deleted() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let now = ms(2025, 3, 1, 12);
        // 70 days old, outside a 60-day window, never rolled up
        let old_day = ms(2024, 12, 21, 0);
        for h in 0..3 {
            store.insert_reading(&reading(old_day + h * HOUR_MS)).unwrap();
        }

        let report = manager(&store, RetentionPolicy::default())
            .run_retention(now)
            .await
            .unwrap();

        assert_eq!(report.raw.deleted, 3);
        assert_eq!(report.dailies.created, 1);
        let dailies = store.daily_latest(old_day, old_day + DAY_MS, usize::MAX).await.unwrap();
        assert_eq!(dailies.len(), 1);
        assert_eq!(dailies[0].summary.record_count, 3);
    }

    #[tokio::test]
    async fn test_rollup_failure_aborts_before_delete() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let now = ms(2025, 3, 1, 12);
        store.insert_reading(&reading(ms(2024, 12, 21, 5))).unwrap();
        store.fail_next_writes(1);

        let result = manager(&store, RetentionPolicy::default()).run_retention(now).await;

        assert!(result.is_err());
        assert_eq!(store.count(Collection::Raw).await.unwrap(), 1);
        assert_eq!(store.count(Collection::Daily).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recent_raw_kept() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let now = ms(2025, 3, 1, 12);
        store.insert_reading(&reading(ms(2025, 2, 20, 5))).unwrap();

        let report = manager(&store, RetentionPolicy::default())
            .run_retention(now)
            .await
            .unwrap();

        assert_eq!(report.raw.deleted, 0);
        assert_eq!(store.count(Collection::Raw).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_batch_limit_resumes_next_cycle() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let now = ms(2025, 3, 1, 12);
        let old = ms(2024, 11, 1, 0);
        for i in 0..7 {
            store.insert_reading(&reading(old + i * 60_000)).unwrap();
        }
        let manager = manager(&store, policy(60, 1095, 2, 2));

        let first = manager.run_retention(now).await.unwrap();
        assert_eq!(first.raw.deleted, 4);
        assert_eq!(first.raw.batches, 2);
        assert!(!first.is_complete());

        let second = manager.run_retention(now).await.unwrap();
        assert_eq!(second.raw.deleted, 3);
        assert!(second.is_complete());
        assert_eq!(store.count(Collection::Raw).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_hourly_expired_and_daily_kept() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let now = ms(2025, 3, 1, 12);
        let ancient = ms(2021, 1, 1, 0);
        let recent = ms(2025, 1, 1, 0);
        for hour_start in [ancient, recent] {
            store
                .upsert_hourly(&HourlyAggregate {
                    hour_start,
                    summary: Summary::default(),
                })
                .await
                .unwrap();
        }
        store.insert_reading(&reading(ancient)).unwrap();

        let report = manager(&store, RetentionPolicy::default())
            .run_retention(now)
            .await
            .unwrap();

        assert_eq!(report.hourly.deleted, 1);
        assert_eq!(store.count(Collection::Hourly).await.unwrap(), 1);
        // the ancient day was rolled up before its raw went, and stays
        assert!(store.count(Collection::Daily).await.unwrap() >= 1);
        let again = manager(&store, RetentionPolicy::default())
            .run_retention(now)
            .await
            .unwrap();
        assert!(again.is_complete());
        assert!(store.count(Collection::Daily).await.unwrap() >= 1);
    }
}
