//! Query ranges and the dashboard's named presets.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Error, Result};
use serde::{Deserialize, Serialize};

use crate::period::{DAY_MS, HOUR_MS};
use crate::EpochMillis;

// ---

/// Last millisecond of 9999-12-31 UTC; requests may not name anything later.
pub const MAX_TIMESTAMP: EpochMillis = 253_402_300_799_999;

/// Half-open `[start, end)` request range.
///
/// A range with `end <= start` is the "most recent N readings" query; it has
/// a span of zero days and no meaningful bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRange {
    pub start: EpochMillis,
    pub end: EpochMillis,
}

impl QueryRange {
    // ---
    pub fn new(start: EpochMillis, end: EpochMillis) -> Self {
        Self { start, end }
    }

    /// The `[now - duration, now)` window.
    pub fn trailing(now: EpochMillis, duration_ms: i64) -> Self {
        Self::new(now.saturating_sub(duration_ms), now)
    }

    pub fn most_recent(now: EpochMillis) -> Self {
        Self::new(now, now)
    }

    pub fn is_most_recent(&self) -> bool {
        self.end <= self.start
    }

    /// Whole days covered, rounded up; zero for a most-recent query.
    pub fn span_days(&self) -> i64 {
        // ---
        if self.is_most_recent() {
            return 0;
        }
        let span = self.end.checked_sub(self.start).unwrap_or(i64::MAX);
        span.saturating_add(DAY_MS - 1) / DAY_MS
    }
}

/// Named ranges offered by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Last7,
    Last3h,
    Last6h,
    Last12h,
    Last24h,
    Last7d,
    Weekly,
    Last30d,
    Monthly,
    Yearly,
}

impl Preset {
    // ---
    pub const ALL: [Preset; 10] = [
        Preset::Last7,
        Preset::Last3h,
        Preset::Last6h,
        Preset::Last12h,
        Preset::Last24h,
        Preset::Last7d,
        Preset::Weekly,
        Preset::Last30d,
        Preset::Monthly,
        Preset::Yearly,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Preset::Last7 => "last7",
            Preset::Last3h => "last3h",
            Preset::Last6h => "last6h",
            Preset::Last12h => "last12h",
            Preset::Last24h => "last24h",
            Preset::Last7d => "last7d",
            Preset::Weekly => "weekly",
            Preset::Last30d => "last30d",
            Preset::Monthly => "monthly",
            Preset::Yearly => "yearly",
        }
    }

    /// Trailing window length; `None` for the most-recent-N preset.
    pub fn duration_ms(self) -> Option<i64> {
        match self {
            Preset::Last7 => None,
            Preset::Last3h => Some(3 * HOUR_MS),
            Preset::Last6h => Some(6 * HOUR_MS),
            Preset::Last12h => Some(12 * HOUR_MS),
            Preset::Last24h => Some(DAY_MS),
            Preset::Last7d => Some(7 * DAY_MS),
            Preset::Weekly => Some(28 * DAY_MS),
            Preset::Last30d => Some(30 * DAY_MS),
            Preset::Monthly => Some(180 * DAY_MS),
            Preset::Yearly => Some(730 * DAY_MS),
        }
    }

    pub fn to_range(self, now: EpochMillis) -> QueryRange {
        match self.duration_ms() {
            Some(d) => QueryRange::trailing(now, d),
            None => QueryRange::most_recent(now),
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Preset::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow!("unknown preset: {}", s))
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_span_days_rounds_up() {
        // ---
        assert_eq!(QueryRange::new(0, DAY_MS).span_days(), 1);
        assert_eq!(QueryRange::new(0, DAY_MS + 1).span_days(), 2);
        assert_eq!(QueryRange::new(0, HOUR_MS).span_days(), 1);
        assert_eq!(QueryRange::new(5, 5).span_days(), 0);
        assert_eq!(QueryRange::new(10, 5).span_days(), 0);
    }

    #[test]
    fn test_span_days_saturates_on_extreme_bounds() {
        // ---
        let widest = QueryRange::new(i64::MIN + 1, i64::MAX);
        assert_eq!(widest.span_days(), i64::MAX / DAY_MS);

        let negative = QueryRange::new(i64::MIN + 1, 0);
        assert!(negative.span_days() > 0);

        assert_eq!(QueryRange::trailing(i64::MIN + 5, DAY_MS).start, i64::MIN);
    }

    #[test]
    fn test_presets() {
        // ---
        let now = 1_000 * DAY_MS;
        assert!(Preset::Last7.to_range(now).is_most_recent());
        assert_eq!(Preset::Weekly.to_range(now).span_days(), 28);
        assert_eq!(Preset::Monthly.to_range(now).span_days(), 180);
        assert_eq!(Preset::Yearly.to_range(now).span_days(), 730);
        assert_eq!(Preset::Last3h.to_range(now), QueryRange::new(now - 3 * HOUR_MS, now));
    }

    #[test]
    fn test_preset_parse() {
        // ---
        assert_eq!("last24h".parse::<Preset>().unwrap(), Preset::Last24h);
        assert_eq!(" Monthly ".parse::<Preset>().unwrap(), Preset::Monthly);
        assert!("fortnight".parse::<Preset>().is_err());
        for p in Preset::ALL {
            assert_eq!(p.to_string().parse::<Preset>().unwrap(), p);
        }
    }
}
