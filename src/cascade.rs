//! Combination rules for rolling summaries into coarser summaries.
//!
//! Every [`Summary`] field is tagged with exactly one [`CombineRule`] and the
//! same table is used at every level: hourly into daily, daily into weekly or
//! monthly views at query time. Averages combine as an unweighted mean of the
//! per-period means; rainfall totals and record counts are summed.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::{DailyAggregate, HourlyAggregate, RawReading, Summary};
use crate::period::{date_key, Calendar};
use crate::rollup::summarize_readings;
use crate::EpochMillis;

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineRule {
    Mean,
    Min,
    Max,
    Sum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryField {
    AvgTemperature,
    MinTemperature,
    MaxTemperature,
    AvgHumidity,
    MinHumidity,
    MaxHumidity,
    AvgRainfallRate,
    TotalRainfall,
    RecordCount,
}

/// The one place that decides how each field combines.
pub const FIELD_RULES: [(SummaryField, CombineRule); 9] = [
    (SummaryField::AvgTemperature, CombineRule::Mean),
    (SummaryField::MinTemperature, CombineRule::Min),
    (SummaryField::MaxTemperature, CombineRule::Max),
    (SummaryField::AvgHumidity, CombineRule::Mean),
    (SummaryField::MinHumidity, CombineRule::Min),
    (SummaryField::MaxHumidity, CombineRule::Max),
    (SummaryField::AvgRainfallRate, CombineRule::Mean),
    (SummaryField::TotalRainfall, CombineRule::Sum),
    (SummaryField::RecordCount, CombineRule::Sum),
];

impl SummaryField {
    // ---
    pub fn rule(self) -> CombineRule {
        // ---
        FIELD_RULES
            .iter()
            .find(|(field, _)| *field == self)
            .map(|(_, rule)| *rule)
            .unwrap_or(CombineRule::Mean)
    }

    fn get(self, s: &Summary) -> Option<f64> {
        match self {
            SummaryField::AvgTemperature => s.avg_temperature,
            SummaryField::MinTemperature => s.min_temperature,
            SummaryField::MaxTemperature => s.max_temperature,
            SummaryField::AvgHumidity => s.avg_humidity,
            SummaryField::MinHumidity => s.min_humidity,
            SummaryField::MaxHumidity => s.max_humidity,
            SummaryField::AvgRainfallRate => s.avg_rainfall_rate,
            SummaryField::TotalRainfall => Some(s.total_rainfall),
            SummaryField::RecordCount => Some(s.record_count as f64),
        }
    }

    fn set(self, s: &mut Summary, value: Option<f64>) {
        match self {
            SummaryField::AvgTemperature => s.avg_temperature = value,
            SummaryField::MinTemperature => s.min_temperature = value,
            SummaryField::MaxTemperature => s.max_temperature = value,
            SummaryField::AvgHumidity => s.avg_humidity = value,
            SummaryField::MinHumidity => s.min_humidity = value,
            SummaryField::MaxHumidity => s.max_humidity = value,
            SummaryField::AvgRainfallRate => s.avg_rainfall_rate = value,
            SummaryField::TotalRainfall => s.total_rainfall = value.unwrap_or(0.0),
            SummaryField::RecordCount => s.record_count = value.unwrap_or(0.0).round() as i64,
        }
    }
}

impl CombineRule {
    // ---
    fn apply(self, values: &[f64]) -> Option<f64> {
        // ---
        if values.is_empty() {
            return None;
        }
        Some(match self {
            CombineRule::Mean => values.iter().sum::<f64>() / values.len() as f64,
            CombineRule::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            CombineRule::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            CombineRule::Sum => values.iter().sum(),
        })
    }
}

/// Combine finer summaries into one coarser summary. `None` for no input.
pub fn combine(parts: &[Summary]) -> Option<Summary> {
    // ---
    if parts.is_empty() {
        return None;
    }

    let mut out = Summary::default();
    for (field, rule) in FIELD_RULES {
        let values: Vec<f64> = parts.iter().filter_map(|s| field.get(s)).collect();
        field.set(&mut out, rule.apply(&values));
    }
    Some(out)
}

/// Daily aggregate built from the hourly aggregates of `date`.
///
/// Hours outside the date are ignored. `None` when no hour of the date is present.
pub fn daily_from_hourly(
    date: NaiveDate,
    hourlies: &[HourlyAggregate],
    calendar: &Calendar,
) -> Option<DailyAggregate> {
    // ---
    let (start, end) = calendar.day_bounds(date);
    let parts: Vec<Summary> = hourlies
        .iter()
        .filter(|h| h.hour_start >= start && h.hour_start < end)
        .map(|h| h.summary.clone())
        .collect();

    combine(&parts).map(|summary| DailyAggregate {
        date,
        day_start: start,
        summary,
    })
}

// ---

/// Query-time regrouping buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewPeriod {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl std::str::FromStr for ViewPeriod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "hourly" => Ok(ViewPeriod::Hourly),
            "daily" => Ok(ViewPeriod::Daily),
            "weekly" => Ok(ViewPeriod::Weekly),
            "monthly" => Ok(ViewPeriod::Monthly),
            "yearly" => Ok(ViewPeriod::Yearly),
            other => Err(anyhow::anyhow!("unknown view period '{}'", other)),
        }
    }
}

/// One regrouped bucket of a query-time view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodBucket {
    // ---
    pub key: String,
    pub start: EpochMillis,
    #[serde(flatten)]
    pub summary: Summary,
}

fn bucket_of(ts: EpochMillis, view: ViewPeriod, calendar: &Calendar) -> (String, EpochMillis) {
    // ---
    let day = |date: NaiveDate| (date_key(date), calendar.day_bounds(date).0);
    match view {
        ViewPeriod::Hourly => {
            let start = calendar.hour_start(ts);
            (calendar.hour_key(start), start)
        }
        ViewPeriod::Daily => day(calendar.date_of(ts)),
        ViewPeriod::Weekly => day(calendar.week_start(ts)),
        ViewPeriod::Monthly => day(calendar.month_start(ts)),
        ViewPeriod::Yearly => day(calendar.year_start(ts)),
    }
}

/// Regroup already-aggregated summaries into coarser buckets.
pub fn regroup_summaries(
    points: &[(EpochMillis, Summary)],
    view: ViewPeriod,
    calendar: &Calendar,
) -> Vec<PeriodBucket> {
    // ---
    let mut groups: BTreeMap<EpochMillis, (String, Vec<Summary>)> = BTreeMap::new();
    for (ts, summary) in points {
        let (key, start) = bucket_of(*ts, view, calendar);
        groups
            .entry(start)
            .or_insert_with(|| (key, Vec::new()))
            .1
            .push(summary.clone());
    }

    groups
        .into_iter()
        .filter_map(|(start, (key, parts))| {
            combine(&parts).map(|summary| PeriodBucket {
                key,
                start,
                summary,
            })
        })
        .collect()
}

/// Regroup raw readings, summarizing each bucket from the readings directly.
pub fn regroup_readings(
    readings: &[RawReading],
    view: ViewPeriod,
    calendar: &Calendar,
) -> Vec<PeriodBucket> {
    // ---
    let mut groups: BTreeMap<EpochMillis, (String, Vec<RawReading>)> = BTreeMap::new();
    for reading in readings {
        let (key, start) = bucket_of(reading.timestamp, view, calendar);
        groups
            .entry(start)
            .or_insert_with(|| (key, Vec::new()))
            .1
            .push(reading.clone());
    }

    groups
        .into_iter()
        .map(|(start, (key, members))| PeriodBucket {
            key,
            start,
            summary: summarize_readings(&members).summary,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::period::HOUR_MS;
    use proptest::prelude::*;

    fn hour(start: EpochMillis, total: f64, avg_t: f64, count: i64) -> HourlyAggregate {
        HourlyAggregate {
            hour_start: start,
            summary: Summary {
                avg_temperature: Some(avg_t),
                min_temperature: Some(avg_t - 1.0),
                max_temperature: Some(avg_t + 1.0),
                total_rainfall: total,
                record_count: count,
                ..Summary::default()
            },
        }
    }

    #[test]
    fn test_totals_are_summed_not_averaged() {
        // ---
        let date = NaiveDate::from_ymd_opt(2025, 1, 5).unwrap();
        let cal = Calendar::utc();
        let (start, _) = cal.day_bounds(date);
        let hours = vec![hour(start, 3.0, 20.0, 60), hour(start + HOUR_MS, 4.5, 30.0, 60)];

        let daily = daily_from_hourly(date, &hours, &cal).unwrap();
        assert_eq!(daily.summary.total_rainfall, 7.5);
        assert_eq!(daily.summary.record_count, 120);
        assert_eq!(daily.day_start, start);
    }

    #[test]
    fn test_averages_are_unweighted() {
        // ---
        let parts = vec![
            hour(0, 0.0, 10.0, 1).summary,
            hour(HOUR_MS, 0.0, 20.0, 59).summary,
        ];
        let out = combine(&parts).unwrap();

        // mean of means, not reweighted by record_count
        assert_eq!(out.avg_temperature, Some(15.0));
        assert_eq!(out.min_temperature, Some(9.0));
        assert_eq!(out.max_temperature, Some(21.0));
    }

    #[test]
    fn test_missing_fields_stay_missing() {
        // ---
        let parts = vec![Summary::default(), Summary::default()];
        let out = combine(&parts).unwrap();

        assert_eq!(out.avg_humidity, None);
        assert_eq!(out.avg_rainfall_rate, None);
        assert_eq!(out.total_rainfall, 0.0);
    }

    #[test]
    fn test_partial_presence() {
        // ---
        let mut a = Summary::default();
        a.avg_rainfall_rate = Some(4.0);
        let b = Summary::default();

        let out = combine(&[a, b]).unwrap();
        assert_eq!(out.avg_rainfall_rate, Some(4.0));
    }

    #[test]
    fn test_empty_combine() {
        assert!(combine(&[]).is_none());
    }

    #[test]
    fn test_hours_outside_day_ignored() {
        // ---
        let cal = Calendar::utc();
        let date = NaiveDate::from_ymd_opt(2025, 1, 5).unwrap();
        let (start, end) = cal.day_bounds(date);
        let hours = vec![hour(start - HOUR_MS, 9.0, 1.0, 1), hour(end, 9.0, 1.0, 1)];

        assert!(daily_from_hourly(date, &hours, &cal).is_none());
    }

    #[test]
    fn test_every_field_has_a_rule() {
        // ---
        assert_eq!(SummaryField::TotalRainfall.rule(), CombineRule::Sum);
        assert_eq!(SummaryField::RecordCount.rule(), CombineRule::Sum);
        assert_eq!(SummaryField::AvgHumidity.rule(), CombineRule::Mean);
        assert_eq!(SummaryField::MaxHumidity.rule(), CombineRule::Max);
    }

    #[test]
    fn test_regroup_weekly() {
        // ---
        let cal = Calendar::utc();
        // Mon 2025-01-06 .. Sun 2025-01-12, then Mon 2025-01-13
        let monday = cal.day_bounds(NaiveDate::from_ymd_opt(2025, 1, 6).unwrap()).0;
        let day = 24 * HOUR_MS;
        let points: Vec<(EpochMillis, Summary)> = (0..8)
            .map(|i| (monday + i * day, hour(0, 1.0, i as f64, 10).summary))
            .collect();

        let buckets = regroup_summaries(&points, ViewPeriod::Weekly, &cal);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].key, "2025-01-06");
        assert_eq!(buckets[0].summary.total_rainfall, 7.0);
        assert_eq!(buckets[0].summary.avg_temperature, Some(3.0));
        assert_eq!(buckets[1].key, "2025-01-13");
        assert_eq!(buckets[1].summary.total_rainfall, 1.0);
    }

    #[test]
    fn test_regroup_many_unordered_points() {
        // ---
        let cal = Calendar::utc();
        let days = 400;
        // newest first, four hours per day
        let points: Vec<(EpochMillis, Summary)> = (0..days * 4)
            .rev()
            .map(|i| (i * 6 * HOUR_MS, hour(0, 0.5, 10.0, 1).summary))
            .collect();

        let buckets = regroup_summaries(&points, ViewPeriod::Daily, &cal);
        assert_eq!(buckets.len(), days as usize);
        assert!(buckets.windows(2).all(|w| w[0].start < w[1].start));
        assert_eq!(buckets[0].key, "1970-01-01");
        assert!(buckets.iter().all(|b| b.summary.total_rainfall == 2.0));
        assert!(buckets.iter().all(|b| b.summary.record_count == 4));
    }

    #[test]
    fn test_regroup_readings_hourly() {
        // ---
        let cal = Calendar::utc();
        let mut readings = Vec::new();
        for (i, cum) in [1.0, 1.5, 2.0].iter().enumerate() {
            let mut r = RawReading::at(i as i64 * 20 * 60_000);
            r.rainfall_cumulative = Some(*cum);
            r.temperature = Some(20.0 + i as f64);
            readings.push(r);
        }

        let buckets = regroup_readings(&readings, ViewPeriod::Hourly, &cal);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].key, "1970-01-01_00");
        assert_eq!(buckets[0].summary.total_rainfall, 1.0);
        assert_eq!(buckets[0].summary.avg_temperature, Some(21.0));
        assert_eq!(buckets[0].summary.record_count, 3);
    }

    #[test]
    fn test_view_period_parse() {
        // ---
        assert_eq!("monthly".parse::<ViewPeriod>().unwrap(), ViewPeriod::Monthly);
        assert!("fortnightly".parse::<ViewPeriod>().is_err());
    }

    proptest! {
        #[test]
        fn proptest_total_is_sum_of_parts(
            totals in proptest::collection::vec(0.0f64..50.0, 1..48),
        ) {
            let parts: Vec<Summary> = totals
                .iter()
                .map(|t| Summary { total_rainfall: *t, ..Summary::default() })
                .collect();
            let out = combine(&parts).unwrap();
            let expected: f64 = totals.iter().sum();
            prop_assert!((out.total_rainfall - expected).abs() < 1e-9);
        }

        #[test]
        fn proptest_mean_within_extremes(
            avgs in proptest::collection::vec(-20.0f64..45.0, 1..48),
        ) {
            let parts: Vec<Summary> = avgs
                .iter()
                .map(|a| Summary { avg_temperature: Some(*a), ..Summary::default() })
                .collect();
            let out = combine(&parts).unwrap();
            let mean = out.avg_temperature.unwrap();
            let lo = avgs.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = avgs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            prop_assert!(mean >= lo - 1e-9 && mean <= hi + 1e-9);
        }
    }
}
