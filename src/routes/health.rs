//! `GET /health` for container orchestrators and CI.
//!
//! Reports liveness plus the chunk cache counters. It never touches the
//! store, so a slow database does not make the service look dead.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::AppState;
use crate::store::TimeSeriesStore;

#[derive(Debug, Serialize)]
struct CacheHealth {
    entries: usize,
    capacity: usize,
    hits: u64,
    misses: u64,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    cache: CacheHealth,
}

async fn health<S: TimeSeriesStore>(State((service, _)): State<AppState<S>>) -> Json<HealthResponse> {
    // ---
    let cache = service.cache();
    Json(HealthResponse {
        status: "ok",
        cache: CacheHealth {
            entries: cache.len(),
            capacity: cache.capacity(),
            hits: cache.hits(),
            misses: cache.misses(),
        },
    })
}

pub fn router<S: TimeSeriesStore>() -> Router<AppState<S>> {
    Router::new().route("/health", get(health::<S>))
}
