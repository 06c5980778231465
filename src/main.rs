//! HTTP server for the `sensorflow-tiers` query surface.
//!
//! Startup sequence:
//! - Load `.env`, initialize tracing, load and log configuration
//! - Connect the PostgreSQL store and create the schema if needed
//! - Build the [`SeriesService`] with its chunk cache
//! - Mount the routes gateway and serve
//!
//! Rollups and retention run as separate scheduled binaries
//! (`hourly-rollup`, `maintenance`, `backfill`), not inside this process.
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use dotenvy::dotenv;

use sensorflow_tiers::cache::ChunkCache;
use sensorflow_tiers::series::SeriesService;
use sensorflow_tiers::store::PgStore;
use sensorflow_tiers::{config, routes, telemetry};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    telemetry::init_tracing("debug");

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let calendar = cfg.calendar()?;
    let store = Arc::new(PgStore::connect(&cfg.db_url, cfg.db_pool_max, calendar).await?);

    let service = Arc::new(SeriesService::new(
        store,
        cfg.field_map(),
        calendar,
        cfg.tier_policy(),
        Arc::new(ChunkCache::new(cfg.chunk_cache_capacity as usize)),
        cfg.raw_retention_days,
    )
    .with_live_poll_interval(cfg.live_poll_interval()));

    let app: Router = routes::router(service);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
