//! Configuration loader for the `sensorflow-tiers` service and jobs.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). Typed policies for the engine components are
//! derived from the loaded values here.
//!
use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::fields::{Attribute, FieldMap};
use crate::period::Calendar;
use crate::retention::RetentionPolicy;
use crate::tier::TierPolicy;

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse an optional signed integer environment variable with a default value.
macro_rules! parse_env_i64 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<i64>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse an optional comma-separated list; unset or blank yields an empty list.
macro_rules! parse_env_list {
    ($var_name:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<String>>()
            })
            .unwrap_or_default()
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Port the HTTP server binds on.
    pub http_port: u16,

    pub raw_retention_days: u32,
    pub hourly_retention_days: u32,
    pub retention_batch_size: u32,
    /// 0 means unbounded.
    pub retention_max_batches: u32,
    pub retention_guard_days: u32,

    pub chunk_cache_capacity: u32,
    pub live_reading_count: u32,
    /// Poll period of `/series/live` subscriptions.
    pub live_poll_ms: u32,
    pub long_horizon_days: u32,
    pub medium_span_days: u32,

    /// Station timezone as minutes east of UTC.
    pub station_utc_offset_minutes: i64,

    pub hourly_catchup_hours: u32,
    pub job_retry_attempts: u32,
    pub job_retry_base_ms: u32,
    pub storage_quota_mb: u32,

    /// Alias overrides; empty keeps the built-in list.
    pub temperature_fields: Vec<String>,
    pub humidity_fields: Vec<String>,
    pub rain_rate_fields: Vec<String>,
    pub rain_cumulative_fields: Vec<String>,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string
///
/// Optional (defaults in parentheses):
/// - `DB_POOL_MAX` (5), `HTTP_PORT` (8080)
/// - `RAW_RETENTION_DAYS` (60), `HOURLY_RETENTION_DAYS` (1095)
/// - `RETENTION_BATCH_SIZE` (500), `RETENTION_MAX_BATCHES` (0), `RETENTION_GUARD_DAYS` (2)
/// - `CHUNK_CACHE_CAPACITY` (50), `LIVE_READING_COUNT` (7), `LIVE_POLL_MS` (5000)
/// - `LONG_HORIZON_DAYS` (60), `MEDIUM_SPAN_DAYS` (4)
/// - `STATION_UTC_OFFSET_MINUTES` (0), `HOURLY_CATCHUP_HOURS` (24)
/// - `JOB_RETRY_ATTEMPTS` (3), `JOB_RETRY_BASE_MS` (2000), `STORAGE_QUOTA_MB` (1024)
/// - `TEMPERATURE_FIELDS`, `HUMIDITY_FIELDS`, `RAIN_RATE_FIELDS`,
///   `RAIN_CUMULATIVE_FIELDS` – comma-separated alias lists
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let db_pool_max = parse_env_u32!("DB_POOL_MAX", 5);
    let http_port = parse_env_u32!("HTTP_PORT", 8080);
    let http_port =
        u16::try_from(http_port).map_err(|_| anyhow!("Invalid HTTP_PORT: {}", http_port))?;

    let config = Config {
        db_url,
        db_pool_max,
        http_port,
        raw_retention_days: parse_env_u32!("RAW_RETENTION_DAYS", 60),
        hourly_retention_days: parse_env_u32!("HOURLY_RETENTION_DAYS", 1095),
        retention_batch_size: parse_env_u32!("RETENTION_BATCH_SIZE", 500),
        retention_max_batches: parse_env_u32!("RETENTION_MAX_BATCHES", 0),
        retention_guard_days: parse_env_u32!("RETENTION_GUARD_DAYS", 2),
        chunk_cache_capacity: parse_env_u32!("CHUNK_CACHE_CAPACITY", 50),
        live_reading_count: parse_env_u32!("LIVE_READING_COUNT", 7),
        live_poll_ms: parse_env_u32!("LIVE_POLL_MS", 5000),
        long_horizon_days: parse_env_u32!("LONG_HORIZON_DAYS", 60),
        medium_span_days: parse_env_u32!("MEDIUM_SPAN_DAYS", 4),
        station_utc_offset_minutes: parse_env_i64!("STATION_UTC_OFFSET_MINUTES", 0),
        hourly_catchup_hours: parse_env_u32!("HOURLY_CATCHUP_HOURS", 24),
        job_retry_attempts: parse_env_u32!("JOB_RETRY_ATTEMPTS", 3),
        job_retry_base_ms: parse_env_u32!("JOB_RETRY_BASE_MS", 2000),
        storage_quota_mb: parse_env_u32!("STORAGE_QUOTA_MB", 1024),
        temperature_fields: parse_env_list!("TEMPERATURE_FIELDS"),
        humidity_fields: parse_env_list!("HUMIDITY_FIELDS"),
        rain_rate_fields: parse_env_list!("RAIN_RATE_FIELDS"),
        rain_cumulative_fields: parse_env_list!("RAIN_CUMULATIVE_FIELDS"),
    };

    config.retention_policy().validate()?;
    config.calendar()?;
    Ok(config)
}

/// Mask the password in a database URL for logging.
fn mask_db_url(db_url: &str) -> String {
    // ---
    if let Some(at_pos) = db_url.rfind('@') {
        if let Some(colon_pos) = db_url[..at_pos].rfind(':') {
            return format!("{}:****{}", &db_url[..colon_pos], &db_url[at_pos..]);
        }
    }
    db_url.to_string()
}

impl Config {
    // ---
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            raw_window_days: self.raw_retention_days,
            hourly_window_days: self.hourly_retention_days,
            batch_size: self.retention_batch_size as usize,
            max_batches: self.retention_max_batches as usize,
            guard_days: self.retention_guard_days,
        }
    }

    pub fn tier_policy(&self) -> TierPolicy {
        TierPolicy {
            long_horizon_days: self.long_horizon_days,
            medium_span_days: self.medium_span_days,
            latest_count: self.live_reading_count as usize,
        }
    }

    pub fn field_map(&self) -> FieldMap {
        FieldMap::default()
            .with_aliases(Attribute::Temperature, self.temperature_fields.clone())
            .with_aliases(Attribute::Humidity, self.humidity_fields.clone())
            .with_aliases(Attribute::RainfallRate, self.rain_rate_fields.clone())
            .with_aliases(Attribute::RainfallCumulative, self.rain_cumulative_fields.clone())
    }

    pub fn calendar(&self) -> Result<Calendar> {
        // ---
        let minutes = i32::try_from(self.station_utc_offset_minutes).map_err(|_| {
            anyhow!("Invalid STATION_UTC_OFFSET_MINUTES: {}", self.station_utc_offset_minutes)
        })?;
        Calendar::with_offset_minutes(minutes)
    }

    pub fn live_poll_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.live_poll_ms.max(1)))
    }

    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like database passwords while showing
    /// all configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL           : {}", mask_db_url(&self.db_url));
        tracing::info!("  DB_POOL_MAX            : {}", self.db_pool_max);
        tracing::info!("  HTTP_PORT              : {}", self.http_port);
        tracing::info!("  RAW_RETENTION_DAYS     : {}", self.raw_retention_days);
        tracing::info!("  HOURLY_RETENTION_DAYS  : {}", self.hourly_retention_days);
        tracing::info!("  RETENTION_BATCH_SIZE   : {}", self.retention_batch_size);
        tracing::info!("  RETENTION_MAX_BATCHES  : {}", self.retention_max_batches);
        tracing::info!("  RETENTION_GUARD_DAYS   : {}", self.retention_guard_days);
        tracing::info!("  CHUNK_CACHE_CAPACITY   : {}", self.chunk_cache_capacity);
        tracing::info!("  LIVE_READING_COUNT     : {}", self.live_reading_count);
        tracing::info!("  LIVE_POLL_MS           : {}", self.live_poll_ms);
        tracing::info!("  LONG_HORIZON_DAYS      : {}", self.long_horizon_days);
        tracing::info!("  MEDIUM_SPAN_DAYS       : {}", self.medium_span_days);
        tracing::info!("  STATION_UTC_OFFSET_MIN : {}", self.station_utc_offset_minutes);
        tracing::info!("  HOURLY_CATCHUP_HOURS   : {}", self.hourly_catchup_hours);
        tracing::info!("  JOB_RETRY_ATTEMPTS     : {}", self.job_retry_attempts);
        tracing::info!("  JOB_RETRY_BASE_MS      : {}", self.job_retry_base_ms);
        tracing::info!("  STORAGE_QUOTA_MB       : {}", self.storage_quota_mb);
    }
}
