//! Station-local calendar arithmetic.
//!
//! Hours and days are "calendar" periods in the station's timezone, which is
//! modelled as a fixed UTC offset. All boundaries are half-open `[start, end)`
//! epoch-millisecond intervals.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Offset, Utc};

use crate::EpochMillis;

pub const MINUTE_MS: i64 = 60 * 1000;
pub const HOUR_MS: i64 = 60 * MINUTE_MS;
pub const DAY_MS: i64 = 24 * HOUR_MS;

// ---

/// Calendar bound to one station's UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    // ---
    offset: FixedOffset,
}

impl Default for Calendar {
    fn default() -> Self {
        Self::utc()
    }
}

impl Calendar {
    // ---
    pub fn utc() -> Self {
        // ---
        Self {
            offset: Utc.fix(),
        }
    }

    /// Calendar for a station `minutes` east of UTC (Manila is `480`).
    pub fn with_offset_minutes(minutes: i32) -> Result<Self> {
        // ---
        let offset = FixedOffset::east_opt(minutes * 60)
            .ok_or_else(|| anyhow!("UTC offset out of range: {} minutes", minutes))?;
        Ok(Self { offset })
    }

    pub fn offset_minutes(&self) -> i32 {
        self.offset.local_minus_utc() / 60
    }

    fn offset_ms(&self) -> i64 {
        i64::from(self.offset.local_minus_utc()) * 1000
    }

    fn floor_local(&self, ts: EpochMillis, unit: i64) -> EpochMillis {
        // ---
        let local = ts + self.offset_ms();
        local - local.rem_euclid(unit) - self.offset_ms()
    }

    /// Start of the local hour containing `ts`.
    pub fn hour_start(&self, ts: EpochMillis) -> EpochMillis {
        self.floor_local(ts, HOUR_MS)
    }

    /// Start of the local day containing `ts`.
    pub fn day_start(&self, ts: EpochMillis) -> EpochMillis {
        self.floor_local(ts, DAY_MS)
    }

    /// Local calendar date containing `ts`.
    pub fn date_of(&self, ts: EpochMillis) -> NaiveDate {
        // ---
        let local_days = (ts + self.offset_ms()).div_euclid(DAY_MS);
        epoch_date() + Duration::days(local_days)
    }

    /// `[start, end)` of a local calendar date.
    pub fn day_bounds(&self, date: NaiveDate) -> (EpochMillis, EpochMillis) {
        // ---
        let days = (date - epoch_date()).num_days();
        let start = days * DAY_MS - self.offset_ms();
        (start, start + DAY_MS)
    }

    /// Start of the most recent hour that has fully elapsed at `now`.
    pub fn last_completed_hour(&self, now: EpochMillis) -> EpochMillis {
        self.hour_start(now) - HOUR_MS
    }

    /// The local date before the one containing `now`.
    pub fn yesterday(&self, now: EpochMillis) -> NaiveDate {
        self.date_of(now) - Duration::days(1)
    }

    /// Monday of the local week containing `ts`.
    pub fn week_start(&self, ts: EpochMillis) -> NaiveDate {
        // ---
        let date = self.date_of(ts);
        date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
    }

    /// First day of the local month containing `ts`.
    pub fn month_start(&self, ts: EpochMillis) -> NaiveDate {
        // ---
        let date = self.date_of(ts);
        date.with_day(1).unwrap_or(date)
    }

    /// First day of the local year containing `ts`.
    pub fn year_start(&self, ts: EpochMillis) -> NaiveDate {
        // ---
        let date = self.date_of(ts);
        NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date)
    }

    /// Storage key for an hour, `YYYY-MM-DD_HH` in local time.
    pub fn hour_key(&self, hour_start: EpochMillis) -> String {
        // ---
        match DateTime::from_timestamp_millis(hour_start) {
            Some(utc) => utc.with_timezone(&self.offset).format("%Y-%m-%d_%H").to_string(),
            None => hour_start.to_string(),
        }
    }

    /// RFC 3339 rendering of `ts` in local time, for logs.
    pub fn display(&self, ts: EpochMillis) -> String {
        // ---
        match DateTime::from_timestamp_millis(ts) {
            Some(utc) => utc.with_timezone(&self.offset).to_rfc3339(),
            None => ts.to_string(),
        }
    }
}

/// Canonical `YYYY-MM-DD` key for a daily aggregate.
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn epoch_date() -> NaiveDate {
    DateTime::<Utc>::UNIX_EPOCH.date_naive()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    fn ms(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> i64 {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap().timestamp_millis()
    }

    #[test]
    fn test_utc_boundaries() {
        // ---
        let cal = Calendar::utc();
        let ts = ms(2025, 1, 5, 14, 37);

        assert_eq!(cal.hour_start(ts), ms(2025, 1, 5, 14, 0));
        assert_eq!(cal.day_start(ts), ms(2025, 1, 5, 0, 0));
        assert_eq!(cal.date_of(ts), NaiveDate::from_ymd_opt(2025, 1, 5).unwrap());
        assert_eq!(cal.hour_key(cal.hour_start(ts)), "2025-01-05_14");
    }

    #[test]
    fn test_offset_day_boundaries() {
        // ---
        // 20:00 UTC on Jan 5th is already Jan 6th in Manila (UTC+8)
        let cal = Calendar::with_offset_minutes(480).unwrap();
        let ts = ms(2025, 1, 5, 20, 0);
        let jan6 = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();

        assert_eq!(cal.date_of(ts), jan6);
        let (start, end) = cal.day_bounds(jan6);
        assert_eq!(start, ms(2025, 1, 5, 16, 0));
        assert_eq!(end - start, DAY_MS);
        assert_eq!(cal.day_start(ts), start);
    }

    #[test]
    fn test_last_completed_hour_and_yesterday() {
        // ---
        let cal = Calendar::utc();
        let now = ms(2025, 3, 1, 0, 5);

        assert_eq!(cal.last_completed_hour(now), ms(2025, 2, 28, 23, 0));
        assert_eq!(cal.yesterday(now), NaiveDate::from_ymd_opt(2025, 2, 28).unwrap());
    }

    #[test]
    fn test_week_and_month_start() {
        // ---
        let cal = Calendar::utc();
        // Thursday
        let ts = ms(2025, 1, 9, 12, 0);

        assert_eq!(cal.week_start(ts), NaiveDate::from_ymd_opt(2025, 1, 6).unwrap());
        assert_eq!(cal.month_start(ts), NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(cal.year_start(ts), NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
    }

    #[test]
    fn test_pre_epoch_floor() {
        // ---
        let cal = Calendar::utc();
        assert_eq!(cal.day_start(-1), -DAY_MS);
        assert_eq!(cal.date_of(-1), NaiveDate::from_ymd_opt(1969, 12, 31).unwrap());
    }

    #[test]
    fn test_invalid_offset_rejected() {
        assert!(Calendar::with_offset_minutes(24 * 60).is_err());
    }
}
