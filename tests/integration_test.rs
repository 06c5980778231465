use std::sync::Arc;

use anyhow::Result;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use sensorflow_tiers::cache::ChunkCache;
use sensorflow_tiers::cancel::CancelToken;
use sensorflow_tiers::fields::FieldMap;
use sensorflow_tiers::jobs::{run_maintenance_job, JobSettings, RetryPolicy};
use sensorflow_tiers::period::{Calendar, DAY_MS, HOUR_MS, MINUTE_MS};
use sensorflow_tiers::range::QueryRange;
use sensorflow_tiers::rollup::{RollupEngine, RollupOutcome};
use sensorflow_tiers::series::{SeriesOutcome, SeriesPoints, SeriesRequest, SeriesResponse, SeriesService};
use sensorflow_tiers::store::{Collection, MemoryStore};
use sensorflow_tiers::tier::{Tier, TierPolicy};
use sensorflow_tiers::{now_millis, routes, RawReading, TimeSeriesStore};

const NOW: i64 = 20_000 * DAY_MS + 12 * HOUR_MS;

fn service(store: &Arc<MemoryStore>) -> SeriesService<MemoryStore> {
    SeriesService::new(
        store.clone(),
        FieldMap::default(),
        Calendar::utc(),
        TierPolicy::default(),
        Arc::new(ChunkCache::new(50)),
        60,
    )
}

async fn query(service: &SeriesService<MemoryStore>, range: QueryRange) -> Result<SeriesResponse> {
    // ---
    let request = SeriesRequest {
        range,
        ..SeriesRequest::default()
    };
    match service.get_series(&request, NOW, &CancelToken::never()).await? {
        SeriesOutcome::Ready(response) => Ok(response),
        SeriesOutcome::Cancelled => anyhow::bail!("query was cancelled"),
    }
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

#[tokio::test]
async fn rainfall_reset_is_reconciled_through_every_tier() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore::new());
    let hour = NOW - DAY_MS - 2 * HOUR_MS;

    // Two firmware generations, with a reboot between the third and fourth sample
    for (i, value) in [10.0, 10.5, 11.0].into_iter().enumerate() {
        store.insert_raw(hour + i as i64 * 10 * MINUTE_MS, json!({ "rainfall_daily_mm": value }))?;
    }
    for (i, value) in [0.2, 0.9].into_iter().enumerate() {
        store.insert_raw(
            hour + (3 + i as i64) * 10 * MINUTE_MS,
            json!({ "rainfall_cumulative_mm": value }),
        )?;
    }

    let engine = RollupEngine::new(store.clone(), FieldMap::default(), Calendar::utc());
    let RollupOutcome::Created(hourly) = engine.rollup_hour(hour, NOW).await? else {
        panic!("hourly aggregate was not created");
    };
    assert_close(hourly.summary.total_rainfall, 1.9);
    assert_eq!(hourly.summary.record_count, 5);

    let date = Calendar::utc().date_of(hour);
    let RollupOutcome::Created(daily) = engine.rollup_day(date, NOW).await? else {
        panic!("daily aggregate was not created");
    };
    assert_close(daily.summary.total_rainfall, 1.9);

    let service = service(&store);

    let month = query(&service, QueryRange::trailing(NOW, 30 * DAY_MS)).await?;
    assert_eq!(month.tier_used, Some(Tier::Hourly));
    match &month.points {
        SeriesPoints::Hourly(items) => assert_close(items[0].summary.total_rainfall, 1.9),
        other => panic!("expected hourly points, got {:?}", other.tier()),
    }

    let quarter = query(&service, QueryRange::trailing(NOW, 90 * DAY_MS)).await?;
    assert_eq!(quarter.tier_used, Some(Tier::Daily));
    match &quarter.points {
        SeriesPoints::Daily(items) => assert_close(items[0].summary.total_rainfall, 1.9),
        other => panic!("expected daily points, got {:?}", other.tier()),
    }
    Ok(())
}

#[tokio::test]
async fn rollups_are_idempotent() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore::new());
    let hour = NOW - 3 * HOUR_MS;
    store.insert_reading(&RawReading {
        temperature: Some(18.5),
        ..RawReading::at(hour + MINUTE_MS)
    })?;

    let engine = RollupEngine::new(store.clone(), FieldMap::default(), Calendar::utc());
    assert!(engine.rollup_hour(hour, NOW).await?.is_created());
    assert_eq!(engine.rollup_hour(hour, NOW).await?, RollupOutcome::AlreadyExists);

    let tally = engine.run_hourly(NOW, 5).await?;
    assert_eq!(tally.created, 0);
    assert_eq!(tally.existing, 1);
    assert_eq!(store.count(Collection::Hourly).await?, 1);
    Ok(())
}

#[tokio::test]
async fn retention_keeps_every_elapsed_day_queryable() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore::new());
    for i in 0..70 {
        store.insert_reading(&RawReading {
            rainfall_cumulative: Some(1.0),
            ..RawReading::at(NOW - i * DAY_MS - HOUR_MS)
        })?;
    }

    let settings = JobSettings {
        retry: RetryPolicy {
            attempts: 1,
            base_delay: std::time::Duration::from_millis(1),
        },
        ..JobSettings::default()
    };
    let report = run_maintenance_job(store.clone(), &settings, NOW).await?;

    assert!(report.retention.is_complete());
    assert_eq!(report.retention.raw.deleted, 10);
    assert_eq!(store.count(Collection::Raw).await?, 60);

    let cal = Calendar::utc();
    for i in 60..70 {
        let date = cal.date_of(NOW - i * DAY_MS - HOUR_MS);
        assert!(store.daily_exists(date).await?, "day {date} lost all coverage");
    }

    let history = query(&service(&store), QueryRange::trailing(NOW, 75 * DAY_MS)).await?;
    assert_eq!(history.tier_used, Some(Tier::Daily));
    assert!(history.points.len() >= 10);
    Ok(())
}

#[tokio::test]
async fn repeated_queries_reuse_elapsed_day_chunks() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore::new());
    for i in 0..(3 * 24) {
        store.insert_reading(&RawReading {
            temperature: Some(20.0),
            ..RawReading::at(NOW - i * HOUR_MS)
        })?;
    }
    let service = service(&store);
    let range = QueryRange::trailing(NOW, 3 * DAY_MS);

    let first = query(&service, range).await?;
    assert_eq!(first.tier_used, Some(Tier::Raw));
    let after_first = store.reads(Collection::Raw);
    assert_eq!(after_first, 4);

    let second = query(&service, range).await?;
    assert_eq!(second.points, first.points);
    // only today's chunk goes back to the store
    assert_eq!(store.reads(Collection::Raw), after_first + 1);
    assert_eq!(service.cache().len(), 3);
    Ok(())
}

#[tokio::test]
async fn http_series_and_health() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore::new());
    let now = now_millis();
    for i in 0..10 {
        store.insert_reading(&RawReading {
            temperature: Some(21.0),
            ..RawReading::at(now - i * MINUTE_MS)
        })?;
    }

    let app = routes::router(Arc::new(service(&store)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let base = format!("http://{}", listener.local_addr()?);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let client = Client::new();

    let health: Value = client.get(format!("{base}/health")).send().await?.json().await?;
    assert_eq!(health["status"], "ok");

    let resp = client.get(format!("{base}/series?preset=last7")).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await?;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["live"], true);
    assert_eq!(body["points"]["tier"], "raw");
    assert_eq!(body["points"]["items"].as_array().map(Vec::len), Some(7));
    assert_eq!(body["coverage_description"], "7 live readings, real-time");

    let resp = client.get(format!("{base}/series?preset=fortnight")).send().await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    store.fail_next_reads(1);
    let resp = client.get(format!("{base}/series?preset=last24h")).send().await?;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = resp.json().await?;
    assert_eq!(body["error"], "store unavailable");
    Ok(())
}

#[tokio::test]
async fn http_live_stream_sends_snapshots() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore::new());
    for ts in 1..=3 {
        store.insert_reading(&RawReading {
            humidity: Some(55.0),
            ..RawReading::at(ts * MINUTE_MS)
        })?;
    }
    let service = service(&store).with_live_poll_interval(std::time::Duration::from_millis(10));

    let app = routes::router(Arc::new(service));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let base = format!("http://{}", listener.local_addr()?);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let mut resp = Client::new().get(format!("{base}/series/live")).send().await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp.headers()["content-type"].to_str()?.to_string();
    assert!(content_type.starts_with("text/event-stream"), "{content_type}");

    let mut text = String::new();
    while !text.contains("\n\n") {
        let chunk = tokio::time::timeout(std::time::Duration::from_secs(2), resp.chunk())
            .await??
            .expect("stream ended before the first event");
        text.push_str(&String::from_utf8_lossy(&chunk));
    }
    let field = |name: &str| {
        text.lines()
            .find_map(|line| line.strip_prefix(name))
            .map(|value| value.trim_start_matches(':').trim().to_string())
    };
    assert_eq!(field("event").as_deref(), Some("snapshot"), "{text}");

    let data = field("data").expect("event without data");
    let snapshot: Value = serde_json::from_str(&data)?;
    assert_eq!(snapshot["readings"].as_array().map(Vec::len), Some(3));
    assert_eq!(snapshot["coverage_description"], "3 live readings, real-time");
    Ok(())
}
