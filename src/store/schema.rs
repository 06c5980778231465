//! Database schema management for `sensorflow-tiers`.
//!
//! Ensures the three tier tables and their timestamp indexes exist before any
//! job or request touches them. Applied once on startup by every binary
//! (EMBP: single gateway call).

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates `sensor_logs` for raw readings, `sensor_logs_hourly` for hourly
/// aggregates and `daily_summaries` for daily aggregates. Safe to call on
/// every startup; no-op if objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // Raw readings, appended by the ingestion path; payload keeps firmware field names
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_logs (
            id            BIGSERIAL PRIMARY KEY,
            timestamp_ms  BIGINT NOT NULL,
            payload       JSONB  NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // One row per elapsed hour
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_logs_hourly (
            hour_start         BIGINT PRIMARY KEY,
            hour_key           TEXT   NOT NULL,
            avg_temperature    DOUBLE PRECISION,
            min_temperature    DOUBLE PRECISION,
            max_temperature    DOUBLE PRECISION,
            avg_humidity       DOUBLE PRECISION,
            min_humidity       DOUBLE PRECISION,
            max_humidity       DOUBLE PRECISION,
            avg_rainfall_rate  DOUBLE PRECISION,
            total_rainfall     DOUBLE PRECISION NOT NULL,
            record_count       BIGINT NOT NULL,
            created_at         TIMESTAMPTZ NOT NULL DEFAULT now()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // One row per elapsed day, never deleted
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS daily_summaries (
            date               DATE   PRIMARY KEY,
            day_start          BIGINT NOT NULL,
            avg_temperature    DOUBLE PRECISION,
            min_temperature    DOUBLE PRECISION,
            max_temperature    DOUBLE PRECISION,
            avg_humidity       DOUBLE PRECISION,
            min_humidity       DOUBLE PRECISION,
            max_humidity       DOUBLE PRECISION,
            avg_rainfall_rate  DOUBLE PRECISION,
            total_rainfall     DOUBLE PRECISION NOT NULL,
            record_count       BIGINT NOT NULL,
            created_at         TIMESTAMPTZ NOT NULL DEFAULT now()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Every collection is read by timestamp range
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_sensor_logs_timestamp
            ON sensor_logs (timestamp_ms);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_daily_summaries_day_start
            ON daily_summaries (day_start);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
