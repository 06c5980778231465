//! Hourly schedule: roll up the last completed hour plus catch-up.
//!
//! Exits non-zero when the store stays unavailable after all retries.
use std::sync::Arc;

use anyhow::Result;
use dotenvy::dotenv;
use tracing::info;

use sensorflow_tiers::jobs::{run_hourly_job, JobSettings};
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
    let tally = run_hourly_job(store, &settings, now_millis()).await?;

    info!(
        created = tally.created,
        existing = tally.existing,
        no_data = tally.no_data,
        incomplete = tally.incomplete,
        "Hourly rollup finished"
    );
    Ok(())
}
