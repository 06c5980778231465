//! Storage boundary for the three record collections.
//!
//! The engine only needs range reads ordered by timestamp, insert-if-absent
//! upserts keyed by period, and batched deletes by key. Adapters:
//! - [`postgres::PgStore`] – deployment backend (sqlx)
//! - [`memory::MemoryStore`] – in-process backend for tests and local runs

use std::future::Future;

use anyhow::Result;
use chrono::NaiveDate;

use crate::models::{DailyAggregate, HourlyAggregate, RawRecord};
use crate::EpochMillis;

pub mod memory;
pub mod postgres;
pub mod schema;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// ---

/// The three parallel record collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Raw,
    Hourly,
    Daily,
}

impl Collection {
    // ---
    pub fn table(self) -> &'static str {
        match self {
            Collection::Raw => "sensor_logs",
            Collection::Hourly => "sensor_logs_hourly",
            Collection::Daily => "daily_summaries",
        }
    }
}

/// Collections retention may delete from. Daily summaries are deliberately absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetentionTarget {
    Raw,
    Hourly,
}

impl RetentionTarget {
    pub fn collection(self) -> Collection {
        match self {
            RetentionTarget::Raw => Collection::Raw,
            RetentionTarget::Hourly => Collection::Hourly,
        }
    }
}

/// Time-range key-value store holding raw, hourly and daily records.
///
/// Range reads cover `[start, end)` and return ascending timestamp order.
/// A raw `limit` keeps the oldest records of the range; the aggregate reads
/// keep the newest `count`. Aggregate upserts are
/// atomic per key and never overwrite an existing aggregate.
pub trait TimeSeriesStore: Send + Sync + 'static {
    // ---
    fn raw_range(
        &self,
        start: EpochMillis,
        end: EpochMillis,
        limit: Option<usize>,
    ) -> impl Future<Output = Result<Vec<RawRecord>>> + Send;

    /// The `count` most recent raw records, ascending.
    fn latest_raw(&self, count: usize) -> impl Future<Output = Result<Vec<RawRecord>>> + Send;

    /// The `count` newest hourly aggregates inside `[start, end)`, ascending.
    fn hourly_latest(
        &self,
        start: EpochMillis,
        end: EpochMillis,
        count: usize,
    ) -> impl Future<Output = Result<Vec<HourlyAggregate>>> + Send;

    /// The `count` newest daily aggregates inside `[start, end)`, ascending.
    fn daily_latest(
        &self,
        start: EpochMillis,
        end: EpochMillis,
        count: usize,
    ) -> impl Future<Output = Result<Vec<DailyAggregate>>> + Send;

    fn hourly_exists(&self, hour_start: EpochMillis) -> impl Future<Output = Result<bool>> + Send;

    fn daily_exists(&self, date: NaiveDate) -> impl Future<Output = Result<bool>> + Send;

    /// Insert unless an aggregate for the hour exists. Returns whether a row was written.
    fn upsert_hourly(&self, agg: &HourlyAggregate) -> impl Future<Output = Result<bool>> + Send;

    /// Insert unless an aggregate for the date exists. Returns whether a row was written.
    fn upsert_daily(&self, agg: &DailyAggregate) -> impl Future<Output = Result<bool>> + Send;

    /// Up to `limit` keys of records with timestamp strictly before `cutoff`, oldest first.
    fn expired_keys(
        &self,
        target: RetentionTarget,
        cutoff: EpochMillis,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<i64>>> + Send;

    /// Delete the given keys; unknown keys are ignored. Returns the number deleted.
    fn delete_batch(
        &self,
        target: RetentionTarget,
        keys: &[i64],
    ) -> impl Future<Output = Result<usize>> + Send;

    fn oldest_raw_timestamp(&self) -> impl Future<Output = Result<Option<EpochMillis>>> + Send;

    fn count(&self, collection: Collection) -> impl Future<Output = Result<u64>> + Send;
}
