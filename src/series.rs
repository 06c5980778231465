//! `GetSeries`: answer a range query from the cheapest tier that has data.
//!
//! The tier selector picks a preferred tier and an ordered fallback chain.
//! A fallback is taken only when a tier returns nothing at all. Raw data goes
//! through the chunked fetcher; aggregate tiers are read with one range query.
//! Every response carries a human-readable coverage line, and a range with no
//! data anywhere yields an explicit `no_data` status rather than an empty list.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::cache::ChunkCache;
use crate::cancel::CancelToken;
use crate::cascade::{regroup_readings, regroup_summaries, PeriodBucket, ViewPeriod};
use crate::fetch::{ChunkedFetcher, FetchOutcome};
use crate::fields::FieldMap;
use crate::models::{DailyAggregate, HourlyAggregate, RawReading};
use crate::period::Calendar;
use crate::range::QueryRange;
use crate::store::TimeSeriesStore;
use crate::subscription::{LiveSnapshot, LiveSubscription};
use crate::tier::{ClientProfile, Tier, TierPlan, TierPolicy, TierSelector};
use crate::EpochMillis;

// ---

pub const NO_DATA_DESCRIPTION: &str = "no data available for this range";

const DEFAULT_LIVE_POLL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SeriesRequest {
    pub range: QueryRange,
    pub profile: ClientProfile,
    /// Optional regrouping into hour/day/week/month/year buckets.
    pub view: Option<ViewPeriod>,
}

/// Points of whichever tier answered, tagged so callers can tell them apart.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "tier", content = "items", rename_all = "lowercase")]
pub enum SeriesPoints {
    Raw(Vec<RawReading>),
    Hourly(Vec<HourlyAggregate>),
    Daily(Vec<DailyAggregate>),
}

impl SeriesPoints {
    // ---
    pub fn len(&self) -> usize {
        match self {
            SeriesPoints::Raw(v) => v.len(),
            SeriesPoints::Hourly(v) => v.len(),
            SeriesPoints::Daily(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tier(&self) -> Tier {
        match self {
            SeriesPoints::Raw(_) => Tier::Raw,
            SeriesPoints::Hourly(_) => Tier::Hourly,
            SeriesPoints::Daily(_) => Tier::Daily,
        }
    }

    fn regroup(&self, view: ViewPeriod, calendar: &Calendar) -> Vec<PeriodBucket> {
        // ---
        match self {
            SeriesPoints::Raw(readings) => regroup_readings(readings, view, calendar),
            SeriesPoints::Hourly(aggs) => {
                let points: Vec<_> = aggs.iter().map(|a| (a.hour_start, a.summary.clone())).collect();
                regroup_summaries(&points, view, calendar)
            }
            SeriesPoints::Daily(aggs) => {
                let points: Vec<_> = aggs.iter().map(|a| (a.day_start, a.summary.clone())).collect();
                regroup_summaries(&points, view, calendar)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesStatus {
    Ok,
    NoData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesResponse {
    // ---
    pub status: SeriesStatus,
    /// `None` when no tier had data.
    pub tier_used: Option<Tier>,
    pub sampling_stride: usize,
    pub record_cap: usize,
    pub live: bool,
    pub coverage_description: String,
    pub points: SeriesPoints,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buckets: Option<Vec<PeriodBucket>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SeriesOutcome {
    Ready(SeriesResponse),
    Cancelled,
}

fn plural(n: usize, noun: &str) -> String {
    match n {
        1 => format!("1 {}", noun),
        _ => format!("{} {}s", n, noun),
    }
}

/// Coverage line shown next to a series, e.g.
/// `420 readings, 28-day span, hourly resolution`.
pub fn describe_coverage(count: usize, span_days: i64, tier: Tier, stride: usize, live: bool) -> String {
    // ---
    if count == 0 {
        return NO_DATA_DESCRIPTION.to_string();
    }
    if live {
        return format!("{}, real-time", plural(count, "live reading"));
    }
    let mut text = format!("{}, {}-day span, {} resolution", plural(count, "reading"), span_days, tier);
    if stride > 1 {
        text.push_str(&format!(", 1 in {} sampled", stride));
    }
    text
}

/// Drop the oldest items beyond `cap`.
pub fn keep_latest<T>(mut items: Vec<T>, cap: usize) -> Vec<T> {
    // ---
    if items.len() > cap {
        let excess = items.len() - cap;
        items.drain(..excess);
    }
    items
}

async fn unless_cancelled<T>(
    cancel: &CancelToken,
    work: impl Future<Output = Result<T>>,
) -> Result<Option<T>> {
    // ---
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(None),
        result = work => result.map(Some),
    }
}

pub struct SeriesService<S> {
    // ---
    store: Arc<S>,
    fields: FieldMap,
    calendar: Calendar,
    selector: TierSelector,
    fetcher: ChunkedFetcher<S>,
    live_poll_interval: Duration,
}

impl<S: TimeSeriesStore> SeriesService<S> {
    // ---
    pub fn new(
        store: Arc<S>,
        fields: FieldMap,
        calendar: Calendar,
        policy: TierPolicy,
        cache: Arc<ChunkCache>,
        raw_window_days: u32,
    ) -> Self {
        // ---
        let fetcher = ChunkedFetcher::new(store.clone(), fields.clone(), calendar, cache, raw_window_days);
        Self {
            store,
            fields,
            calendar,
            selector: TierSelector::new(policy),
            fetcher,
            live_poll_interval: DEFAULT_LIVE_POLL,
        }
    }

    pub fn with_live_poll_interval(mut self, interval: Duration) -> Self {
        self.live_poll_interval = interval;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }

    pub fn selector(&self) -> &TierSelector {
        &self.selector
    }

    pub fn cache(&self) -> &ChunkCache {
        self.fetcher.cache()
    }

    /// Push the newest readings to `callback` until the subscription is
    /// stopped or dropped; the polled counterpart of a most-recent query.
    pub fn subscribe_latest<F>(&self, callback: F) -> LiveSubscription
    where
        F: FnMut(LiveSnapshot) + Send + 'static,
    {
        // ---
        LiveSubscription::start(
            self.store.clone(),
            self.fields.clone(),
            self.selector.policy().latest_count,
            self.live_poll_interval,
            callback,
        )
    }

    pub async fn get_series(
        &self,
        request: &SeriesRequest,
        now: EpochMillis,
        cancel: &CancelToken,
    ) -> Result<SeriesOutcome> {
        // ---
        let plan = self.selector.select(&request.range, &request.profile, now);
        debug!(
            tier = %plan.tier,
            cap = plan.record_cap,
            stride = plan.sampling_stride,
            live = plan.live,
            "Tier plan selected"
        );

        if plan.live {
            return self.latest_snapshot(request, &plan, cancel).await;
        }

        let span_days = request.range.span_days();
        let tiers = std::iter::once(plan.tier).chain(plan.fallbacks.iter().copied());

        for tier in tiers {
            let stride = self.selector.policy().stride_for(tier, span_days, &request.profile);
            let Some(points) = self
                .read_tier(tier, &request.range, stride, plan.record_cap, now, cancel)
                .await?
            else {
                info!(tier = %tier, "Series query cancelled");
                return Ok(SeriesOutcome::Cancelled);
            };

            if points.is_empty() {
                debug!(tier = %tier, "Tier returned nothing, falling back");
                continue;
            }

            let coverage = describe_coverage(points.len(), span_days, tier, stride, false);
            info!(tier = %tier, count = points.len(), stride, "Series served");
            return Ok(SeriesOutcome::Ready(self.respond(request, &plan, stride, coverage, points)));
        }

        info!(span_days, "No tier had data for range");
        Ok(SeriesOutcome::Ready(self.no_data(&plan)))
    }

    /// `None` when cancelled.
    async fn read_tier(
        &self,
        tier: Tier,
        range: &QueryRange,
        stride: usize,
        cap: usize,
        now: EpochMillis,
        cancel: &CancelToken,
    ) -> Result<Option<SeriesPoints>> {
        // ---
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let points = match tier {
            Tier::Raw => match self.fetcher.fetch_range(range, stride, now, cancel).await? {
                FetchOutcome::Complete(readings) => SeriesPoints::Raw(keep_latest(readings, cap)),
                FetchOutcome::Cancelled => return Ok(None),
            },
            Tier::Hourly => {
                let read = self.store.hourly_latest(range.start, range.end, cap);
                match unless_cancelled(cancel, read).await.context("hourly tier read failed")? {
                    Some(aggs) => SeriesPoints::Hourly(aggs),
                    None => return Ok(None),
                }
            }
            Tier::Daily => {
                let read = self.store.daily_latest(range.start, range.end, cap);
                match unless_cancelled(cancel, read).await.context("daily tier read failed")? {
                    Some(aggs) => SeriesPoints::Daily(aggs),
                    None => return Ok(None),
                }
            }
        };
        Ok(Some(points))
    }

    async fn latest_snapshot(
        &self,
        request: &SeriesRequest,
        plan: &TierPlan,
        cancel: &CancelToken,
    ) -> Result<SeriesOutcome> {
        // ---
        let read = self.store.latest_raw(plan.record_cap);
        let Some(records) = unless_cancelled(cancel, read).await.context("latest read failed")? else {
            return Ok(SeriesOutcome::Cancelled);
        };

        let readings = self.fields.resolve_all(&records);
        if readings.is_empty() {
            return Ok(SeriesOutcome::Ready(self.no_data(plan)));
        }
        let coverage = describe_coverage(readings.len(), 0, Tier::Raw, 1, true);
        let points = SeriesPoints::Raw(readings);
        Ok(SeriesOutcome::Ready(self.respond(request, plan, 1, coverage, points)))
    }

    fn respond(
        &self,
        request: &SeriesRequest,
        plan: &TierPlan,
        stride: usize,
        coverage: String,
        points: SeriesPoints,
    ) -> SeriesResponse {
        // ---
        let buckets = request.view.map(|view| points.regroup(view, &self.calendar));
        SeriesResponse {
            status: SeriesStatus::Ok,
            tier_used: Some(points.tier()),
            sampling_stride: stride,
            record_cap: plan.record_cap,
            live: plan.live,
            coverage_description: coverage,
            points,
            buckets,
        }
    }

    fn no_data(&self, plan: &TierPlan) -> SeriesResponse {
        SeriesResponse {
            status: SeriesStatus::NoData,
            tier_used: None,
            sampling_stride: plan.sampling_stride,
            record_cap: plan.record_cap,
            live: plan.live,
            coverage_description: NO_DATA_DESCRIPTION.to_string(),
            points: SeriesPoints::Raw(Vec::new()),
            buckets: None,
        }
    }
}
