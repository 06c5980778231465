//! Rainfall counter reconciliation.
//!
//! The rain gauge reports a cumulative counter that only grows, except when
//! the device reboots and the counter restarts from zero. A period total is
//! the sum of all increases between consecutive samples, where a decrease
//! marks a reset and the lower value is the rain gathered since the restart.

use crate::models::RawReading;
use crate::EpochMillis;

// ---

/// One cumulative counter observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterSample {
    pub timestamp: EpochMillis,
    pub cumulative: f64,
}

/// Result of reconciling one period.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Reconciliation {
    // ---
    /// Non-negative rainfall within the period, mm
    pub total_mm: f64,
    /// Number of counter resets observed
    pub resets: usize,
    /// Number of usable samples
    pub samples: usize,
}

/// Collect counter samples from readings that carry one.
pub fn counter_samples(readings: &[RawReading]) -> Vec<CounterSample> {
    // ---
    readings
        .iter()
        .filter_map(|r| {
            r.rainfall_cumulative.map(|cumulative| CounterSample {
                timestamp: r.timestamp,
                cumulative,
            })
        })
        .collect()
}

/// Reconcile a period's counter samples into the rainfall that fell within it.
///
/// Samples need not be sorted. Non-finite or negative counters are ignored.
/// Fewer than two usable samples reconcile to zero.
pub fn reconcile_period(samples: &[CounterSample]) -> Reconciliation {
    // ---
    let mut sorted: Vec<CounterSample> = samples
        .iter()
        .copied()
        .filter(|s| s.cumulative.is_finite() && s.cumulative >= 0.0)
        .collect();
    sorted.sort_by_key(|s| s.timestamp);

    let mut result = Reconciliation {
        samples: sorted.len(),
        ..Reconciliation::default()
    };

    for pair in sorted.windows(2) {
        let (prev, curr) = (pair[0].cumulative, pair[1].cumulative);
        if curr >= prev {
            result.total_mm += curr - prev;
        } else {
            // counter restarted from zero
            result.total_mm += curr;
            result.resets += 1;
        }
    }

    result
}

/// Convenience wrapper over [`counter_samples`] and [`reconcile_period`].
pub fn reconcile_readings(readings: &[RawReading]) -> Reconciliation {
    reconcile_period(&counter_samples(readings))
}
