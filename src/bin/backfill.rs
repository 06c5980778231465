//! Roll up an explicit range of station-local days.
//!
//! - `BACKFILL_FROM` (**required**) – first day, `YYYY-MM-DD`
//! - `BACKFILL_TO` (optional) – last day inclusive, defaults to yesterday
use std::env;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use dotenvy::dotenv;
use tracing::info;

use sensorflow_tiers::jobs::{run_backfill_job, JobSettings};
use sensorflow_tiers::store::PgStore;
use sensorflow_tiers::{config, now_millis, telemetry};

fn date_from_env(var: &str) -> Result<Option<NaiveDate>> {
    // ---
    match env::var(var) {
        Ok(value) => NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
            .map(Some)
            .with_context(|| format!("Invalid {}: expected YYYY-MM-DD, got '{}'", var, value)),
        Err(_) => Ok(None),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    telemetry::init_tracing("info");

    let cfg = config::load_from_env()?;
    cfg.log_config();
    let settings = JobSettings::from_config(&cfg)?;

    let now = now_millis();
    let from = date_from_env("BACKFILL_FROM")?
        .ok_or_else(|| anyhow!("BACKFILL_FROM must be set in .env or environment"))?;
    let to = date_from_env("BACKFILL_TO")?.unwrap_or_else(|| settings.calendar.yesterday(now));
    info!(%from, %to, "Backfilling daily summaries");

    let store = Arc::new(PgStore::connect(&cfg.db_url, cfg.db_pool_max, settings.calendar).await?);
    let report = run_backfill_job(store, &settings, from, to, now).await?;

    info!(
        created = report.created,
        existing = report.existing,
        no_data = report.no_data,
        incomplete = report.incomplete,
        "Backfill finished"
    );
    Ok(())
}
