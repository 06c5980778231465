//! Legacy field-name aliases and plausibility checks.
//!
//! Several firmware generations report the same quantity under different
//! payload keys. Each logical attribute carries an ordered alias list; the
//! first alias holding a usable number wins. The lists are plain data and can
//! be overridden from configuration when new firmware ships.

use serde_json::{Map, Value};
use tracing::warn;

use crate::models::{RawReading, RawRecord};

// ---

/// Logical sensor attributes resolved from raw payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Temperature,
    Humidity,
    RainfallRate,
    RainfallCumulative,
}

impl Attribute {
    // ---
    pub const ALL: [Attribute; 4] = [
        Attribute::Temperature,
        Attribute::Humidity,
        Attribute::RainfallRate,
        Attribute::RainfallCumulative,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Attribute::Temperature => "temperature",
            Attribute::Humidity => "humidity",
            Attribute::RainfallRate => "rainfall_rate",
            Attribute::RainfallCumulative => "rainfall_cumulative",
        }
    }

    /// Inclusive plausibility bounds; values outside are sensor faults.
    pub fn valid_range(self) -> (f64, f64) {
        match self {
            Attribute::Temperature => (-60.0, 70.0),
            Attribute::Humidity => (0.0, 100.0),
            Attribute::RainfallRate => (0.0, f64::MAX),
            Attribute::RainfallCumulative => (0.0, f64::MAX),
        }
    }

    fn default_aliases(self) -> &'static [&'static str] {
        match self {
            Attribute::Temperature => &["temperature", "temp"],
            Attribute::Humidity => &["humidity", "hum"],
            Attribute::RainfallRate => &[
                "rainRateEstimated_mm_hr_bucket",
                "rainRate_mm_hr",
                "rainRate_mm",
                "rainRate",
                "rainfall_rate",
            ],
            Attribute::RainfallCumulative => &[
                "rainfall_daily_mm",
                "rainfall_total_estimated_mm_bucket",
                "rainfall_cumulative_mm",
                "rainfall_cumulative",
            ],
        }
    }
}

/// Ordered alias lists for every [`Attribute`].
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMap {
    // ---
    temperature: Vec<String>,
    humidity: Vec<String>,
    rainfall_rate: Vec<String>,
    rainfall_cumulative: Vec<String>,
}

impl Default for FieldMap {
    fn default() -> Self {
        // ---
        let owned = |attr: Attribute| {
            attr.default_aliases()
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
        };
        Self {
            temperature: owned(Attribute::Temperature),
            humidity: owned(Attribute::Humidity),
            rainfall_rate: owned(Attribute::RainfallRate),
            rainfall_cumulative: owned(Attribute::RainfallCumulative),
        }
    }
}

impl FieldMap {
    // ---
    /// Replace the alias list for one attribute. An empty list keeps the current one.
    pub fn with_aliases(mut self, attr: Attribute, aliases: Vec<String>) -> Self {
        // ---
        if aliases.is_empty() {
            return self;
        }
        *self.aliases_mut(attr) = aliases;
        self
    }

    pub fn aliases(&self, attr: Attribute) -> &[String] {
        match attr {
            Attribute::Temperature => &self.temperature,
            Attribute::Humidity => &self.humidity,
            Attribute::RainfallRate => &self.rainfall_rate,
            Attribute::RainfallCumulative => &self.rainfall_cumulative,
        }
    }

    fn aliases_mut(&mut self, attr: Attribute) -> &mut Vec<String> {
        match attr {
            Attribute::Temperature => &mut self.temperature,
            Attribute::Humidity => &mut self.humidity,
            Attribute::RainfallRate => &mut self.rainfall_rate,
            Attribute::RainfallCumulative => &mut self.rainfall_cumulative,
        }
    }

    /// First alias whose value is a finite number (or numeric string).
    ///
    /// Bounds are not applied here; see [`FieldMap::resolve`].
    pub fn lookup(&self, payload: &Map<String, Value>, attr: Attribute) -> Option<f64> {
        // ---
        self.aliases(attr)
            .iter()
            .filter_map(|name| payload.get(name))
            .find_map(numeric)
    }

    /// Resolve a raw record into a typed reading, dropping implausible values.
    pub fn resolve(&self, record: &RawRecord) -> RawReading {
        // ---
        let mut reading = RawReading::at(record.timestamp);
        for attr in Attribute::ALL {
            let value = self.lookup(&record.payload, attr).and_then(|v| {
                let (lo, hi) = attr.valid_range();
                if (lo..=hi).contains(&v) {
                    Some(v)
                } else {
                    warn!(
                        key = record.key,
                        timestamp = record.timestamp,
                        attribute = attr.name(),
                        value = v,
                        "Anomaly: value outside plausible range, excluded"
                    );
                    None
                }
            });
            match attr {
                Attribute::Temperature => reading.temperature = value,
                Attribute::Humidity => reading.humidity = value,
                Attribute::RainfallRate => reading.rainfall_rate = value,
                Attribute::RainfallCumulative => reading.rainfall_cumulative = value,
            }
        }
        reading
    }

    /// Resolve and sort by timestamp; ingestion order is not trusted.
    pub fn resolve_all(&self, records: &[RawRecord]) -> Vec<RawReading> {
        // ---
        let mut readings: Vec<RawReading> = records.iter().map(|r| self.resolve(r)).collect();
        readings.sort_by_key(|r| r.timestamp);
        readings
    }
}

fn numeric(value: &Value) -> Option<f64> {
    // ---
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    fn record(payload: Value) -> RawRecord {
        RawRecord::new(1, 1_000, payload)
    }

    #[test]
    fn test_first_alias_wins() {
        // ---
        let fields = FieldMap::default();
        let rec = record(json!({
            "rainRate": 9.0,
            "rainRate_mm_hr": 2.5,
        }));

        assert_eq!(fields.lookup(&rec.payload, Attribute::RainfallRate), Some(2.5));
    }

    #[test]
    fn test_null_and_garbage_skipped() {
        // ---
        let fields = FieldMap::default();
        let rec = record(json!({
            "rainRateEstimated_mm_hr_bucket": null,
            "rainRate_mm_hr": "n/a",
            "rainRate_mm": "1.25",
        }));

        assert_eq!(fields.lookup(&rec.payload, Attribute::RainfallRate), Some(1.25));
    }

    #[test]
    fn test_missing_is_none_not_zero() {
        // ---
        let fields = FieldMap::default();
        let reading = fields.resolve(&record(json!({"humidity": 55})));

        assert_eq!(reading.humidity, Some(55.0));
        assert_eq!(reading.temperature, None);
        assert_eq!(reading.rainfall_cumulative, None);
    }

    #[test]
    fn test_out_of_range_excluded() {
        // ---
        let fields = FieldMap::default();
        let reading = fields.resolve(&record(json!({
            "temperature": 185.0,
            "humidity": 120,
            "rainfall_cumulative_mm": -3.0,
        })));

        assert_eq!(reading.temperature, None);
        assert_eq!(reading.humidity, None);
        assert_eq!(reading.rainfall_cumulative, None);
    }

    #[test]
    fn test_custom_aliases() {
        // ---
        let fields = FieldMap::default()
            .with_aliases(Attribute::Temperature, vec!["t_c".to_string()]);
        let reading = fields.resolve(&record(json!({"t_c": 21.5, "temperature": 99})));

        assert_eq!(reading.temperature, Some(21.5));
        assert_eq!(fields.aliases(Attribute::Temperature), ["t_c".to_string()]);
    }

    #[test]
    fn test_empty_override_keeps_defaults() {
        // ---
        let fields = FieldMap::default().with_aliases(Attribute::Humidity, Vec::new());
        assert_eq!(fields, FieldMap::default());
    }

    #[test]
    fn test_resolve_all_sorts() {
        // ---
        let fields = FieldMap::default();
        let records = vec![
            RawRecord::new(1, 3_000, json!({})),
            RawRecord::new(2, 1_000, json!({})),
            RawRecord::new(3, 2_000, json!({})),
        ];
        let ts: Vec<_> = fields.resolve_all(&records).iter().map(|r| r.timestamp).collect();

        assert_eq!(ts, vec![1_000, 2_000, 3_000]);
    }
}
