//! PostgreSQL adapter for [`TimeSeriesStore`].
//!
//! Aggregate writes use `INSERT .. ON CONFLICT DO NOTHING`, so a rollup either
//! lands completely or not at all, and a second writer for the same period is
//! a no-op. Deletes take an explicit key list so a batch can never reach past
//! the keys selected under the cutoff.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde_json::{Map, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::info;

use super::schema::create_schema;
use super::{Collection, RetentionTarget, TimeSeriesStore};
use crate::models::{DailyAggregate, HourlyAggregate, RawRecord};
use crate::period::Calendar;
use crate::EpochMillis;

// ---

#[derive(sqlx::FromRow)]
struct RawRow {
    // ---
    id: i64,
    timestamp_ms: i64,
    payload: Json<Map<String, Value>>,
}

impl From<RawRow> for RawRecord {
    fn from(row: RawRow) -> Self {
        RawRecord {
            key: row.id,
            timestamp: row.timestamp_ms,
            payload: row.payload.0,
        }
    }
}

const SUMMARY_COLUMNS: &str = "avg_temperature, min_temperature, max_temperature, \
     avg_humidity, min_humidity, max_humidity, avg_rainfall_rate, total_rainfall, record_count";

/// Store over a `sqlx` Postgres pool.
#[derive(Clone)]
pub struct PgStore {
    // ---
    pool: PgPool,
    calendar: Calendar,
}

impl PgStore {
    // ---
    pub fn new(pool: PgPool, calendar: Calendar) -> Self {
        Self { pool, calendar }
    }

    /// Open a pool and make sure the schema exists.
    pub async fn connect(db_url: &str, max_connections: u32, calendar: Calendar) -> Result<Self> {
        // ---
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await
            .context("Failed to connect to database")?;
        info!("Successfully connected to database");

        create_schema(&pool).await?;
        Ok(Self::new(pool, calendar))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map(|n| n as i64).unwrap_or(i64::MAX)
}

impl TimeSeriesStore for PgStore {
    // ---
    async fn raw_range(
        &self,
        start: EpochMillis,
        end: EpochMillis,
        limit: Option<usize>,
    ) -> Result<Vec<RawRecord>> {
        // ---
        let rows: Vec<RawRow> = sqlx::query_as(
            r#"
            SELECT id, timestamp_ms, payload
            FROM sensor_logs
            WHERE timestamp_ms >= $1 AND timestamp_ms < $2
            ORDER BY timestamp_ms, id
            LIMIT $3
            "#,
        )
        .bind(start)
        .bind(end)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .context("raw range query failed")?;

        Ok(rows.into_iter().map(RawRecord::from).collect())
    }

    async fn latest_raw(&self, count: usize) -> Result<Vec<RawRecord>> {
        // ---
        let rows: Vec<RawRow> = sqlx::query_as(
            r#"
            SELECT id, timestamp_ms, payload
            FROM sensor_logs
            ORDER BY timestamp_ms DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(count as i64)
        .fetch_all(&self.pool)
        .await
        .context("latest raw query failed")?;

        let mut records: Vec<RawRecord> = rows.into_iter().map(RawRecord::from).collect();
        records.reverse();
        Ok(records)
    }

    async fn hourly_latest(
        &self,
        start: EpochMillis,
        end: EpochMillis,
        count: usize,
    ) -> Result<Vec<HourlyAggregate>> {
        // ---
        let sql = format!(
            "SELECT hour_start, {SUMMARY_COLUMNS} FROM sensor_logs_hourly \
             WHERE hour_start >= $1 AND hour_start < $2 ORDER BY hour_start DESC LIMIT $3"
        );
        let mut rows = sqlx::query_as::<_, HourlyAggregate>(&sql)
            .bind(start)
            .bind(end)
            .bind(i64::try_from(count).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .context("latest hourly query failed")?;
        rows.reverse();
        Ok(rows)
    }

    async fn daily_latest(
        &self,
        start: EpochMillis,
        end: EpochMillis,
        count: usize,
    ) -> Result<Vec<DailyAggregate>> {
        // ---
        let sql = format!(
            "SELECT date, day_start, {SUMMARY_COLUMNS} FROM daily_summaries \
             WHERE day_start >= $1 AND day_start < $2 ORDER BY day_start DESC LIMIT $3"
        );
        let mut rows = sqlx::query_as::<_, DailyAggregate>(&sql)
            .bind(start)
            .bind(end)
            .bind(i64::try_from(count).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .context("latest daily query failed")?;
        rows.reverse();
        Ok(rows)
    }

    async fn hourly_exists(&self, hour_start: EpochMillis) -> Result<bool> {
        // ---
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM sensor_logs_hourly WHERE hour_start = $1)",
        )
        .bind(hour_start)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn daily_exists(&self, date: NaiveDate) -> Result<bool> {
        // ---
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM daily_summaries WHERE date = $1)")
                .bind(date)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn upsert_hourly(&self, agg: &HourlyAggregate) -> Result<bool> {
        // ---
        let s = &agg.summary;
        let result = sqlx::query(
            r#"
            INSERT INTO sensor_logs_hourly (
                hour_start, hour_key,
                avg_temperature, min_temperature, max_temperature,
                avg_humidity, min_humidity, max_humidity,
                avg_rainfall_rate, total_rainfall, record_count
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (hour_start) DO NOTHING
            "#,
        )
        .bind(agg.hour_start)
        .bind(self.calendar.hour_key(agg.hour_start))
        .bind(s.avg_temperature)
        .bind(s.min_temperature)
        .bind(s.max_temperature)
        .bind(s.avg_humidity)
        .bind(s.min_humidity)
        .bind(s.max_humidity)
        .bind(s.avg_rainfall_rate)
        .bind(s.total_rainfall)
        .bind(s.record_count)
        .execute(&self.pool)
        .await
        .context("hourly upsert failed")?;

        Ok(result.rows_affected() == 1)
    }

    async fn upsert_daily(&self, agg: &DailyAggregate) -> Result<bool> {
        // ---
        let s = &agg.summary;
        let result = sqlx::query(
            r#"
            INSERT INTO daily_summaries (
                date, day_start,
                avg_temperature, min_temperature, max_temperature,
                avg_humidity, min_humidity, max_humidity,
                avg_rainfall_rate, total_rainfall, record_count
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (date) DO NOTHING
            "#,
        )
        .bind(agg.date)
        .bind(agg.day_start)
        .bind(s.avg_temperature)
        .bind(s.min_temperature)
        .bind(s.max_temperature)
        .bind(s.avg_humidity)
        .bind(s.min_humidity)
        .bind(s.max_humidity)
        .bind(s.avg_rainfall_rate)
        .bind(s.total_rainfall)
        .bind(s.record_count)
        .execute(&self.pool)
        .await
        .context("daily upsert failed")?;

        Ok(result.rows_affected() == 1)
    }

    async fn expired_keys(
        &self,
        target: RetentionTarget,
        cutoff: EpochMillis,
        limit: usize,
    ) -> Result<Vec<i64>> {
        // ---
        let sql = match target {
            RetentionTarget::Raw => {
                "SELECT id FROM sensor_logs WHERE timestamp_ms < $1 ORDER BY timestamp_ms, id LIMIT $2"
            }
            RetentionTarget::Hourly => {
                "SELECT hour_start FROM sensor_logs_hourly WHERE hour_start < $1 ORDER BY hour_start LIMIT $2"
            }
        };
        sqlx::query_scalar(sql)
            .bind(cutoff)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("expired key scan on {} failed", target.collection().table()))
    }

    async fn delete_batch(&self, target: RetentionTarget, keys: &[i64]) -> Result<usize> {
        // ---
        if keys.is_empty() {
            return Ok(0);
        }
        let sql = match target {
            RetentionTarget::Raw => "DELETE FROM sensor_logs WHERE id = ANY($1)",
            RetentionTarget::Hourly => "DELETE FROM sensor_logs_hourly WHERE hour_start = ANY($1)",
        };
        let result = sqlx::query(sql)
            .bind(keys)
            .execute(&self.pool)
            .await
            .with_context(|| format!("batch delete on {} failed", target.collection().table()))?;
        Ok(result.rows_affected() as usize)
    }

    async fn oldest_raw_timestamp(&self) -> Result<Option<EpochMillis>> {
        // ---
        let oldest: Option<i64> = sqlx::query_scalar("SELECT MIN(timestamp_ms) FROM sensor_logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(oldest)
    }

    async fn count(&self, collection: Collection) -> Result<u64> {
        // ---
        let sql = format!("SELECT COUNT(*) FROM {}", collection.table());
        let n: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(n.max(0) as u64)
    }
}
