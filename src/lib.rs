//! Tiered time-series engine for the `sensorflow` weather station backend.
//!
//! Raw sensor readings are rolled into hourly and daily summaries, expired
//! according to per-tier retention windows, and served back through a tier
//! selector that picks the cheapest resolution able to answer a query.
//!
//! Module layout follows the Explicit Module Boundary Pattern (EMBP): each
//! module owns one concern and re-exports only what its siblings need.
//!
//! - [`store`]       – the `TimeSeriesStore` boundary plus Postgres and in-memory adapters
//! - [`fields`]      – legacy field-name aliases and plausibility checks
//! - [`period`]      – station-local calendar arithmetic
//! - [`reconcile`]   – rainfall counter reconciliation
//! - [`cascade`]     – per-field combination rules for rollups of rollups
//! - [`rollup`]      – hourly/daily rollup engine
//! - [`retention`]   – batched expiry of raw and hourly data
//! - [`range`]       – query ranges and dashboard presets
//! - [`tier`]        – tier / stride / record-cap selection
//! - [`fetch`]       – chunked raw fetch backed by [`cache`], cancellable via [`cancel`]
//! - [`series`]      – the `GetSeries` query entry point
//! - [`subscription`] – live "most recent N" subscription handle
//! - [`stats`]       – record counts and storage estimate
//! - [`jobs`]        – scheduler entry points with retry and backoff
//! - [`routes`]      – axum gateway for `/series` and `/health`
//! - [`config`], [`telemetry`] – environment configuration and tracing setup

pub mod cache;
pub mod cancel;
pub mod cascade;
pub mod config;
pub mod fetch;
pub mod fields;
pub mod jobs;
pub mod models;
pub mod period;
pub mod range;
pub mod reconcile;
pub mod retention;
pub mod rollup;
pub mod routes;
pub mod series;
pub mod stats;
pub mod store;
pub mod subscription;
pub mod telemetry;
pub mod tier;

pub use config::Config;
pub use models::{DailyAggregate, HourlyAggregate, RawReading, RawRecord, Summary};
pub use store::{Collection, RetentionTarget, TimeSeriesStore};

/// Milliseconds since the Unix epoch; the only timestamp representation used by the store.
pub type EpochMillis = i64;

/// Current wall-clock time as [`EpochMillis`].
pub fn now_millis() -> EpochMillis {
    chrono::Utc::now().timestamp_millis()
}
