//! Data models for the three storage tiers.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::EpochMillis;

// ---

/// Raw record as appended by the ingestion path.
///
/// The payload is whatever JSON object the device firmware sent; field names
/// vary between firmware generations and are resolved through
/// [`crate::fields::FieldMap`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    // ---
    pub key: i64,
    pub timestamp: EpochMillis,
    pub payload: Map<String, Value>,
}

/// Typed view of one sensor sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    // ---
    pub timestamp: EpochMillis,
    /// °C
    pub temperature: Option<f64>,
    /// %
    pub humidity: Option<f64>,
    /// Instantaneous rate, mm/hr
    pub rainfall_rate: Option<f64>,
    /// Counter in mm; monotonic but resets to 0 on device reboot
    pub rainfall_cumulative: Option<f64>,
}

/// Statistical body shared by hourly and daily aggregates.
///
/// Averages and extremes are `None` when no valid value contributed to the
/// period; they are never coerced to zero.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct Summary {
    // ---
    pub avg_temperature: Option<f64>,
    pub min_temperature: Option<f64>,
    pub max_temperature: Option<f64>,
    pub avg_humidity: Option<f64>,
    pub min_humidity: Option<f64>,
    pub max_humidity: Option<f64>,
    pub avg_rainfall_rate: Option<f64>,
    /// Reconciled rainfall that fell within the period, mm
    pub total_rainfall: f64,
    pub record_count: i64,
}

/// Summary of one calendar hour of raw readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct HourlyAggregate {
    // ---
    pub hour_start: EpochMillis,
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub summary: Summary,
}

/// Summary of one calendar day; retained forever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DailyAggregate {
    // ---
    pub date: NaiveDate,
    pub day_start: EpochMillis,
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub summary: Summary,
}

impl RawRecord {
    // ---
    pub fn new(key: i64, timestamp: EpochMillis, payload: Value) -> Self {
        // ---
        let payload = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            key,
            timestamp,
            payload,
        }
    }
}

impl RawReading {
    // ---
    /// Reading with only a timestamp set.
    pub fn at(timestamp: EpochMillis) -> Self {
        // ---
        Self {
            timestamp,
            temperature: None,
            humidity: None,
            rainfall_rate: None,
            rainfall_cumulative: None,
        }
    }
}
