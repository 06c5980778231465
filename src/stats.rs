//! Record counts per tier and a rough storage estimate against a quota.

use anyhow::Result;
use serde::Serialize;

use crate::store::{Collection, TimeSeriesStore};

// ---

/// Estimated stored bytes per record, per collection.
const RAW_RECORD_BYTES: u64 = 300;
const HOURLY_RECORD_BYTES: u64 = 400;
const DAILY_RECORD_BYTES: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageHealth {
    Healthy,
    Moderate,
    High,
    Critical,
}

impl StorageHealth {
    pub fn from_percent(percent: f64) -> Self {
        match percent {
            p if p < 50.0 => StorageHealth::Healthy,
            p if p < 80.0 => StorageHealth::Moderate,
            p if p < 95.0 => StorageHealth::High,
            _ => StorageHealth::Critical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStats {
    // ---
    pub raw: u64,
    pub hourly: u64,
    pub daily: u64,
    pub estimated_bytes: u64,
    pub percent_of_quota: f64,
    pub health: StorageHealth,
}

pub async fn collect_stats<S: TimeSeriesStore>(store: &S, quota_mb: u64) -> Result<StoreStats> {
    // ---
    let raw = store.count(Collection::Raw).await?;
    let hourly = store.count(Collection::Hourly).await?;
    let daily = store.count(Collection::Daily).await?;

    let estimated_bytes =
        raw * RAW_RECORD_BYTES + hourly * HOURLY_RECORD_BYTES + daily * DAILY_RECORD_BYTES;
    let quota_bytes = quota_mb.saturating_mul(1024 * 1024);
    let percent_of_quota = match quota_bytes {
        0 => 100.0,
        q => estimated_bytes as f64 / q as f64 * 100.0,
    };

    Ok(StoreStats {
        raw,
        hourly,
        daily,
        estimated_bytes,
        percent_of_quota,
        health: StorageHealth::from_percent(percent_of_quota),
    })
}
