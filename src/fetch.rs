//! Chunked raw fetch.
//!
//! A range is split into station-local day chunks so cache keys stay stable
//! across overlapping queries. Historical days inside the raw retention
//! window are cached whole; today and days about to expire always go to the
//! store. The sampling stride is applied once to the assembled result, so the
//! output does not depend on how the range was chunked and differently-strided
//! queries share cache entries.

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::cache::{Chunk, ChunkCache, ChunkKey};
use crate::cancel::CancelToken;
use crate::fields::FieldMap;
use crate::models::RawReading;
use crate::period::{Calendar, DAY_MS};
use crate::range::QueryRange;
use crate::store::TimeSeriesStore;
use crate::tier::Tier;
use crate::EpochMillis;

// ---

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Complete(Vec<RawReading>),
    /// A superseding query cancelled this one; nothing partial was cached.
    Cancelled,
}

/// Day-aligned chunk keys covering `range`, oldest first.
pub fn day_chunks(range: &QueryRange, calendar: &Calendar) -> Vec<ChunkKey> {
    // ---
    let mut keys = Vec::new();
    if range.is_most_recent() {
        return keys;
    }
    let mut day_start = calendar.day_start(range.start);
    while day_start < range.end {
        keys.push(ChunkKey {
            tier: Tier::Raw,
            day_start,
            day_end: day_start + DAY_MS,
        });
        day_start += DAY_MS;
    }
    keys
}

/// Keep elements `0, n, 2n, ..`.
pub fn apply_stride<T>(items: Vec<T>, stride: usize) -> Vec<T> {
    // ---
    if stride <= 1 {
        return items;
    }
    items.into_iter().step_by(stride).collect()
}

pub struct ChunkedFetcher<S> {
    // ---
    store: Arc<S>,
    fields: FieldMap,
    calendar: Calendar,
    cache: Arc<ChunkCache>,
    raw_window_days: u32,
}

impl<S: TimeSeriesStore> ChunkedFetcher<S> {
    // ---
    pub fn new(
        store: Arc<S>,
        fields: FieldMap,
        calendar: Calendar,
        cache: Arc<ChunkCache>,
        raw_window_days: u32,
    ) -> Self {
        Self {
            store,
            fields,
            calendar,
            cache,
            raw_window_days,
        }
    }

    pub fn cache(&self) -> &ChunkCache {
        &self.cache
    }

    /// A chunk may be cached only once its day is over and while its raw
    /// data is not yet due for deletion.
    pub fn is_cacheable(&self, key: &ChunkKey, now: EpochMillis) -> bool {
        // ---
        let today_start = self.calendar.day_start(now);
        let raw_cutoff = now - i64::from(self.raw_window_days) * DAY_MS;
        key.day_end <= today_start && key.day_start >= raw_cutoff
    }

    pub async fn fetch_range(
        &self,
        range: &QueryRange,
        stride: usize,
        now: EpochMillis,
        cancel: &CancelToken,
    ) -> Result<FetchOutcome> {
        // ---
        // Raw rows older than the retention day are gone; never chunk back past it
        let raw_cutoff = now.saturating_sub(i64::from(self.raw_window_days) * DAY_MS);
        let floor = self.calendar.day_start(raw_cutoff);
        let clamped = QueryRange::new(range.start.max(floor), range.end);
        if clamped.is_most_recent() {
            debug!(start = range.start, floor, "Range lies before the raw window");
            return Ok(FetchOutcome::Complete(Vec::new()));
        }

        let keys = day_chunks(&clamped, &self.calendar);
        let mut readings: Vec<RawReading> = Vec::new();
        let mut hits = 0usize;

        for key in &keys {
            if cancel.is_cancelled() {
                debug!(day_start = key.day_start, "Fetch cancelled before chunk");
                return Ok(FetchOutcome::Cancelled);
            }

            let cacheable = self.is_cacheable(key, now);
            let cached = match cacheable {
                true => self.cache.get(key),
                false => None,
            };

            let chunk = match cached {
                Some(chunk) => {
                    hits += 1;
                    chunk
                }
                None => {
                    // Uncached chunks only need the part inside the range
                    let (start, end) = match cacheable {
                        true => (key.day_start, key.day_end),
                        false => (key.day_start.max(range.start), key.day_end.min(range.end)),
                    };
                    let records = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            debug!(day_start = key.day_start, "Fetch cancelled during chunk read");
                            return Ok(FetchOutcome::Cancelled);
                        }
                        result = self.store.raw_range(start, end, None) => result?,
                    };
                    let chunk: Chunk = Arc::from(self.fields.resolve_all(&records));
                    if cacheable {
                        self.cache.insert(*key, chunk.clone());
                    }
                    chunk
                }
            };

            readings.extend(
                chunk
                    .iter()
                    .filter(|r| r.timestamp >= range.start && r.timestamp < range.end)
                    .cloned(),
            );
        }

        readings.sort_by_key(|r| r.timestamp);
        let total = readings.len();
        let sampled = apply_stride(readings, stride);

        debug!(
            chunks = keys.len(),
            cache_hits = hits,
            total,
            returned = sampled.len(),
            stride,
            "Chunked fetch complete"
        );
        Ok(FetchOutcome::Complete(sampled))
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::cancel::cancel_pair;
    use crate::period::HOUR_MS;
    use crate::store::{Collection, MemoryStore};
    use std::time::Duration;

    const NOW: i64 = 20_000 * DAY_MS + 12 * HOUR_MS;

    fn setup(capacity: usize) -> (Arc<MemoryStore>, ChunkedFetcher<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let fetcher = ChunkedFetcher::new(
            store.clone(),
            FieldMap::default(),
            Calendar::utc(),
            Arc::new(ChunkCache::new(capacity)),
            60,
        );
        (store, fetcher)
    }

    fn seed_day(store: &MemoryStore, day_start: i64, count: i64) {
        for i in 0..count {
            let mut r = RawReading::at(day_start + i * HOUR_MS);
            r.temperature = Some(20.0 + i as f64);
            store.insert_reading(&r).unwrap();
        }
    }

    fn complete(outcome: FetchOutcome) -> Vec<RawReading> {
        match outcome {
            FetchOutcome::Complete(readings) => readings,
            FetchOutcome::Cancelled => panic!("unexpected cancellation"),
        }
    }

    #[test]
    fn test_day_chunks_aligned() {
        // ---
        let range = QueryRange::new(3 * DAY_MS + 5 * HOUR_MS, 5 * DAY_MS + HOUR_MS);
        let keys = day_chunks(&range, &Calendar::utc());

        assert_eq!(keys.len(), 3);
        assert_eq!(keys[0].day_start, 3 * DAY_MS);
        assert_eq!(keys[2].day_end, 6 * DAY_MS);
        assert!(day_chunks(&QueryRange::most_recent(NOW), &Calendar::utc()).is_empty());
    }

    #[test]
    fn test_apply_stride() {
        // ---
        let items: Vec<i32> = (0..10).collect();
        assert_eq!(apply_stride(items.clone(), 3), vec![0, 3, 6, 9]);
        assert_eq!(apply_stride(items.clone(), 1), items);
        assert_eq!(apply_stride(items.clone(), 0), items);
    }

    #[tokio::test]
    async fn test_overlapping_queries_share_cached_day() {
        // ---
        let (store, fetcher) = setup(50);
        let day = NOW - 10 * DAY_MS - 12 * HOUR_MS;
        seed_day(&store, day, 24);
        let never = CancelToken::never();

        let a = QueryRange::new(day, day + DAY_MS);
        let b = QueryRange::new(day + 6 * HOUR_MS, day + 18 * HOUR_MS);

        let first = complete(fetcher.fetch_range(&a, 1, NOW, &never).await.unwrap());
        let second = complete(fetcher.fetch_range(&b, 1, NOW, &never).await.unwrap());

        assert_eq!(store.reads(Collection::Raw), 1);
        assert_eq!(first.len(), 24);
        assert_eq!(second.len(), 12);
        assert_eq!(&first[6..18], &second[..]);
        assert_eq!(fetcher.cache().hits(), 1);
    }

    #[tokio::test]
    async fn test_strides_share_unsampled_chunks() {
        // ---
        let (store, fetcher) = setup(50);
        let day = NOW - 5 * DAY_MS - 12 * HOUR_MS;
        seed_day(&store, day, 24);
        let never = CancelToken::never();
        let range = QueryRange::new(day, day + DAY_MS);

        let full = complete(fetcher.fetch_range(&range, 1, NOW, &never).await.unwrap());
        let thinned = complete(fetcher.fetch_range(&range, 5, NOW, &never).await.unwrap());

        assert_eq!(store.reads(Collection::Raw), 1);
        assert_eq!(thinned.len(), 5);
        assert_eq!(thinned[1], full[5]);
    }

    #[tokio::test]
    async fn test_stride_independent_of_chunking() {
        // ---
        let (store, fetcher) = setup(50);
        let day = NOW - 4 * DAY_MS - 12 * HOUR_MS;
        // 7 readings per day over two days
        seed_day(&store, day, 7);
        seed_day(&store, day + DAY_MS, 7);
        let range = QueryRange::new(day, day + 2 * DAY_MS);

        let out = complete(fetcher.fetch_range(&range, 3, NOW, &CancelToken::never()).await.unwrap());
        let hours: Vec<i64> = out.iter().map(|r| (r.timestamp - day) / HOUR_MS).collect();
        // indices 0, 3, 6, 9, 12 of the merged sequence
        assert_eq!(hours, vec![0, 3, 6, 24 + 2, 24 + 5]);
    }

    #[tokio::test]
    async fn test_today_never_cached() {
        // ---
        let (store, fetcher) = setup(50);
        let today = NOW - 12 * HOUR_MS;
        seed_day(&store, today, 6);
        let range = QueryRange::new(today, NOW);
        let never = CancelToken::never();

        fetcher.fetch_range(&range, 1, NOW, &never).await.unwrap();
        store.insert_reading(&RawReading::at(today + 7 * HOUR_MS)).unwrap();
        let again = complete(fetcher.fetch_range(&range, 1, NOW, &never).await.unwrap());

        assert_eq!(store.reads(Collection::Raw), 2);
        assert_eq!(again.len(), 7);
        assert!(fetcher.cache().is_empty());
    }

    #[tokio::test]
    async fn test_expiring_days_never_cached() {
        // ---
        let (store, fetcher) = setup(50);
        // the oldest day still inside the raw window, partly past its cutoff
        let day = NOW - 60 * DAY_MS - 12 * HOUR_MS;
        seed_day(&store, day, 3);
        let range = QueryRange::new(day, day + DAY_MS);
        let never = CancelToken::never();

        fetcher.fetch_range(&range, 1, NOW, &never).await.unwrap();
        let again = complete(fetcher.fetch_range(&range, 1, NOW, &never).await.unwrap());

        assert_eq!(store.reads(Collection::Raw), 2);
        assert_eq!(again.len(), 3);
        assert!(fetcher.cache().is_empty());
    }

    #[tokio::test]
    async fn test_reads_stop_at_raw_window() {
        // ---
        let (store, fetcher) = setup(50);
        let never = CancelToken::never();

        let everything = QueryRange::new(0, NOW);
        fetcher.fetch_range(&everything, 1, NOW, &never).await.unwrap();
        // 60 elapsed days plus today
        assert_eq!(store.reads(Collection::Raw), 61);

        let ancient = QueryRange::new(0, NOW - 70 * DAY_MS);
        let out = complete(fetcher.fetch_range(&ancient, 1, NOW, &never).await.unwrap());
        assert!(out.is_empty());
        assert_eq!(store.reads(Collection::Raw), 61);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_reads_nothing() {
        // ---
        let (store, fetcher) = setup(50);
        let (handle, token) = cancel_pair();
        handle.cancel();

        let range = QueryRange::new(NOW - 3 * DAY_MS, NOW);
        let outcome = fetcher.fetch_range(&range, 1, NOW, &token).await.unwrap();

        assert_eq!(outcome, FetchOutcome::Cancelled);
        assert_eq!(store.reads(Collection::Raw), 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_read_leaves_cache_untouched() {
        // ---
        let (store, fetcher) = setup(50);
        let day = NOW - 10 * DAY_MS - 12 * HOUR_MS;
        seed_day(&store, day, 24);
        store.set_read_delay(Some(Duration::from_millis(500))).unwrap();
        let fetcher = Arc::new(fetcher);
        let (handle, token) = cancel_pair();

        let task = {
            let fetcher = fetcher.clone();
            tokio::spawn(async move {
                let range = QueryRange::new(day, day + 3 * DAY_MS);
                fetcher.fetch_range(&range, 1, NOW, &token).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome, FetchOutcome::Cancelled);
        assert!(fetcher.cache().is_empty());
        assert_eq!(store.reads(Collection::Raw), 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_error() {
        // ---
        let (store, fetcher) = setup(50);
        store.fail_next_reads(1);
        let range = QueryRange::new(NOW - DAY_MS, NOW);
        assert!(fetcher.fetch_range(&range, 1, NOW, &CancelToken::never()).await.is_err());
    }
}
