//! Daily schedule: roll up yesterday, apply retention, log storage statistics.
//!
//! An incomplete purge (batch limit reached) is not a failure; the next run
//! resumes where this one stopped.
use std::sync::Arc;

use anyhow::Result;
use dotenvy::dotenv;
use tracing::{info, warn};

use sensorflow_tiers::jobs::{run_maintenance_job, JobSettings};
use sensorflow_tiers::store::PgStore;
use sensorflow_tiers::{config, now_millis, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    telemetry::init_tracing("info");

    let cfg = config::load_from_env()?;
    cfg.log_config();
    let settings = JobSettings::from_config(&cfg)?;

    let store = Arc::new(PgStore::connect(&cfg.db_url, cfg.db_pool_max, settings.calendar).await?);
    let report = run_maintenance_job(store, &settings, now_millis()).await?;

    if !report.retention.is_complete() {
        warn!("Retention stopped at the batch limit; remaining records expire next run");
    }
    info!(
        yesterday = report.yesterday.label(),
        dailies_created = report.retention.dailies.created,
        raw_deleted = report.retention.raw.deleted,
        hourly_deleted = report.retention.hourly.deleted,
        "Maintenance finished"
    );
    Ok(())
}
