//! In-process store with read-count instrumentation and fault injection.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use serde_json::{json, Map, Value};

use super::{Collection, RetentionTarget, TimeSeriesStore};
use crate::models::{DailyAggregate, HourlyAggregate, RawReading, RawRecord};
use crate::EpochMillis;

// ---

#[derive(Default)]
struct Inner {
    // ---
    next_key: i64,
    raw: BTreeMap<i64, RawRecord>,
    hourly: BTreeMap<EpochMillis, HourlyAggregate>,
    daily: BTreeMap<NaiveDate, DailyAggregate>,
    read_delay: Option<Duration>,
}

/// Store backed by ordered maps behind a mutex.
///
/// Every read increments a per-collection counter so tests can prove that a
/// cached chunk was served without touching the store.
#[derive(Default)]
pub struct MemoryStore {
    // ---
    inner: Mutex<Inner>,
    raw_reads: AtomicUsize,
    hourly_reads: AtomicUsize,
    daily_reads: AtomicUsize,
    failing_reads: AtomicUsize,
    failing_writes: AtomicUsize,
}

impl MemoryStore {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("memory store mutex poisoned"))
    }

    /// Append a raw record with an arbitrary payload, as the ingestion path would.
    pub fn insert_raw(&self, timestamp: EpochMillis, payload: Value) -> Result<i64> {
        // ---
        let mut inner = self.lock()?;
        inner.next_key += 1;
        let key = inner.next_key;
        inner.raw.insert(key, RawRecord::new(key, timestamp, payload));
        Ok(key)
    }

    /// Append a typed reading using the canonical field names.
    pub fn insert_reading(&self, reading: &RawReading) -> Result<i64> {
        // ---
        let mut payload = Map::new();
        let fields = [
            ("temperature", reading.temperature),
            ("humidity", reading.humidity),
            ("rainfall_rate", reading.rainfall_rate),
            ("rainfall_cumulative", reading.rainfall_cumulative),
        ];
        for (name, value) in fields {
            if let Some(v) = value {
                payload.insert(name.to_string(), json!(v));
            }
        }
        self.insert_raw(reading.timestamp, Value::Object(payload))
    }

    pub fn reads(&self, collection: Collection) -> usize {
        self.counter(collection).load(Ordering::SeqCst)
    }

    /// Make the next `n` reads fail as if the backend were unreachable.
    pub fn fail_next_reads(&self, n: usize) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` writes (upserts and deletes) fail.
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Delay every range read, to exercise cancellation.
    pub fn set_read_delay(&self, delay: Option<Duration>) -> Result<()> {
        self.lock()?.read_delay = delay;
        Ok(())
    }

    fn counter(&self, collection: Collection) -> &AtomicUsize {
        match collection {
            Collection::Raw => &self.raw_reads,
            Collection::Hourly => &self.hourly_reads,
            Collection::Daily => &self.daily_reads,
        }
    }

    fn take_failure(flag: &AtomicUsize) -> bool {
        flag.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn begin_read(&self, collection: Collection) -> Result<()> {
        // ---
        self.counter(collection).fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_reads) {
            return Err(anyhow!("store unavailable: injected read failure on {}", collection.table()));
        }
        let delay = self.lock()?.read_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    fn begin_write(&self, collection: Collection) -> Result<()> {
        if Self::take_failure(&self.failing_writes) {
            return Err(anyhow!("store unavailable: injected write failure on {}", collection.table()));
        }
        Ok(())
    }
}

fn take_limit<T>(items: impl Iterator<Item = T>, limit: Option<usize>) -> Vec<T> {
    match limit {
        Some(n) => items.take(n).collect(),
        None => items.collect(),
    }
}

fn take_newest<T>(items: impl DoubleEndedIterator<Item = T>, count: usize) -> Vec<T> {
    let mut newest: Vec<T> = items.rev().take(count).collect();
    newest.reverse();
    newest
}

impl TimeSeriesStore for MemoryStore {
    // ---
    async fn raw_range(
        &self,
        start: EpochMillis,
        end: EpochMillis,
        limit: Option<usize>,
    ) -> Result<Vec<RawRecord>> {
        // ---
        self.begin_read(Collection::Raw).await?;
        let inner = self.lock()?;
        let mut rows: Vec<RawRecord> = inner
            .raw
            .values()
            .filter(|r| r.timestamp >= start && r.timestamp < end)
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.timestamp, r.key));
        Ok(take_limit(rows.into_iter(), limit))
    }

    async fn latest_raw(&self, count: usize) -> Result<Vec<RawRecord>> {
        // ---
        self.begin_read(Collection::Raw).await?;
        let inner = self.lock()?;
        let mut rows: Vec<RawRecord> = inner.raw.values().cloned().collect();
        rows.sort_by_key(|r| (r.timestamp, r.key));
        let skip = rows.len().saturating_sub(count);
        Ok(rows.split_off(skip))
    }

    async fn hourly_latest(
        &self,
        start: EpochMillis,
        end: EpochMillis,
        count: usize,
    ) -> Result<Vec<HourlyAggregate>> {
        // ---
        self.begin_read(Collection::Hourly).await?;
        let inner = self.lock()?;
        let rows = inner.hourly.range(start..end.max(start)).map(|(_, v)| v.clone());
        Ok(take_newest(rows, count))
    }

    async fn daily_latest(
        &self,
        start: EpochMillis,
        end: EpochMillis,
        count: usize,
    ) -> Result<Vec<DailyAggregate>> {
        // ---
        self.begin_read(Collection::Daily).await?;
        let inner = self.lock()?;
        let rows = inner
            .daily
            .values()
            .filter(|d| d.day_start >= start && d.day_start < end)
            .cloned();
        Ok(take_newest(rows, count))
    }

    async fn hourly_exists(&self, hour_start: EpochMillis) -> Result<bool> {
        self.begin_read(Collection::Hourly).await?;
        Ok(self.lock()?.hourly.contains_key(&hour_start))
    }

    async fn daily_exists(&self, date: NaiveDate) -> Result<bool> {
        self.begin_read(Collection::Daily).await?;
        Ok(self.lock()?.daily.contains_key(&date))
    }

    async fn upsert_hourly(&self, agg: &HourlyAggregate) -> Result<bool> {
        // ---
        self.begin_write(Collection::Hourly)?;
        let mut inner = self.lock()?;
        if inner.hourly.contains_key(&agg.hour_start) {
            return Ok(false);
        }
        inner.hourly.insert(agg.hour_start, agg.clone());
        Ok(true)
    }

    async fn upsert_daily(&self, agg: &DailyAggregate) -> Result<bool> {
        // ---
        self.begin_write(Collection::Daily)?;
        let mut inner = self.lock()?;
        if inner.daily.contains_key(&agg.date) {
            return Ok(false);
        }
        inner.daily.insert(agg.date, agg.clone());
        Ok(true)
    }

    async fn expired_keys(
        &self,
        target: RetentionTarget,
        cutoff: EpochMillis,
        limit: usize,
    ) -> Result<Vec<i64>> {
        // ---
        self.begin_read(target.collection()).await?;
        let inner = self.lock()?;
        let keys = match target {
            RetentionTarget::Raw => {
                let mut expired: Vec<(EpochMillis, i64)> = inner
                    .raw
                    .values()
                    .filter(|r| r.timestamp < cutoff)
                    .map(|r| (r.timestamp, r.key))
                    .collect();
                expired.sort_unstable();
                expired.into_iter().take(limit).map(|(_, key)| key).collect()
            }
            RetentionTarget::Hourly => inner
                .hourly
                .range(..cutoff)
                .take(limit)
                .map(|(key, _)| *key)
                .collect(),
        };
        Ok(keys)
    }

    async fn delete_batch(&self, target: RetentionTarget, keys: &[i64]) -> Result<usize> {
        // ---
        self.begin_write(target.collection())?;
        let mut inner = self.lock()?;
        let deleted = match target {
            RetentionTarget::Raw => keys.iter().filter(|k| inner.raw.remove(*k).is_some()).count(),
            RetentionTarget::Hourly => keys
                .iter()
                .filter(|k| inner.hourly.remove(*k).is_some())
                .count(),
        };
        Ok(deleted)
    }

    async fn oldest_raw_timestamp(&self) -> Result<Option<EpochMillis>> {
        self.begin_read(Collection::Raw).await?;
        Ok(self.lock()?.raw.values().map(|r| r.timestamp).min())
    }

    async fn count(&self, collection: Collection) -> Result<u64> {
        // ---
        let inner = self.lock()?;
        let n = match collection {
            Collection::Raw => inner.raw.len(),
            Collection::Hourly => inner.hourly.len(),
            Collection::Daily => inner.daily.len(),
        };
        Ok(n as u64)
    }
}
