//! `GET /series`: the HTTP face of [`SeriesService::get_series`].
//!
//! Query parameters:
//! - `preset` – a named range (`last7`, `last24h`, `last30d`, `yearly`, ...), or
//! - `start` / `end` – epoch milliseconds; `end` defaults to now
//! - `device` – `mobile` | `desktop` (default desktop)
//! - `network` – `slow` | `fast` (default fast)
//! - `view` – optional regrouping: `hourly` | `daily` | `weekly` | `monthly` | `yearly`
//! - `client` – optional client key; a new query from the same client
//!   cancels that client's in-flight one, which then answers `cancelled`
//!
//! Bad parameters answer 400, store failures 503, everything else 200.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use super::AppState;
use crate::cancel::{CancelToken, QueryController};
use crate::cascade::ViewPeriod;
use crate::range::{Preset, QueryRange, MAX_TIMESTAMP};
use crate::series::{SeriesOutcome, SeriesRequest};
use crate::store::TimeSeriesStore;
use crate::tier::ClientProfile;
use crate::{now_millis, EpochMillis};

// ---

#[derive(Debug, Default, Deserialize)]
pub struct SeriesQuery {
    pub preset: Option<String>,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub device: Option<String>,
    pub network: Option<String>,
    pub view: Option<String>,
    pub client: Option<String>,
}

impl SeriesQuery {
    /// Validate the parameters into a [`SeriesRequest`] evaluated at `now`.
    pub fn to_request(&self, now: EpochMillis) -> Result<SeriesRequest> {
        // ---
        let range = match (&self.preset, self.start) {
            (Some(_), Some(_)) => return Err(anyhow!("use either preset or start/end, not both")),
            (Some(preset), None) => preset.parse::<Preset>()?.to_range(now),
            (None, Some(start)) => {
                let end = self.end.unwrap_or(now);
                if end <= start {
                    return Err(anyhow!("start must be before end"));
                }
                if start < 0 || end > MAX_TIMESTAMP {
                    return Err(anyhow!("start and end must lie between 0 and {MAX_TIMESTAMP}"));
                }
                QueryRange::new(start, end)
            }
            (None, None) => return Err(anyhow!("missing preset or start")),
        };

        let mut profile = ClientProfile::default();
        if let Some(device) = &self.device {
            profile.device = device.parse()?;
        }
        if let Some(network) = &self.network {
            profile.network = network.parse()?;
        }
        let view = self.view.as_deref().map(str::parse::<ViewPeriod>).transpose()?;

        Ok(SeriesRequest { range, profile, view })
    }
}

/// One [`QueryController`] per client key with a query in flight.
#[derive(Debug, Default)]
pub struct ClientQueries {
    controllers: Mutex<HashMap<String, QueryController>>,
}

impl ClientQueries {
    /// Start a query; supersedes that client's previous one.
    ///
    /// The client's entry is released when the returned guard drops and no
    /// newer query from the same client has started.
    pub fn begin(&self, client: Option<&str>) -> ClientQuery<'_> {
        // ---
        let Some(key) = client else {
            return ClientQuery {
                owner: None,
                token: CancelToken::never(),
            };
        };
        let mut map = self.controllers.lock().unwrap_or_else(|e| e.into_inner());
        let (number, token) = map.entry(key.to_string()).or_default().begin_numbered();
        ClientQuery {
            owner: Some((self, key.to_string(), number)),
            token,
        }
    }

    /// Clients with a query in flight.
    pub fn len(&self) -> usize {
        self.controllers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn finish(&self, key: &str, number: u64) {
        // ---
        let mut map = self.controllers.lock().unwrap_or_else(|e| e.into_inner());
        if map.get(key).is_some_and(|controller| controller.finish(number)) {
            map.remove(key);
        }
    }
}

/// One in-flight query of a [`ClientQueries`] client.
#[derive(Debug)]
pub struct ClientQuery<'a> {
    owner: Option<(&'a ClientQueries, String, u64)>,
    token: CancelToken,
}

impl ClientQuery<'_> {
    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

impl Drop for ClientQuery<'_> {
    fn drop(&mut self) {
        if let Some((queries, key, number)) = &self.owner {
            queries.finish(key, *number);
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct CancelledBody {
    status: &'static str,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

async fn get_series<S: TimeSeriesStore>(
    State((service, queries)): State<AppState<S>>,
    Query(params): Query<SeriesQuery>,
) -> Response {
    // ---
    let now = now_millis();
    let request = match params.to_request(now) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Rejected series query");
            return error_response(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    let query = queries.begin(params.client.as_deref());
    match service.get_series(&request, now, query.token()).await {
        Ok(SeriesOutcome::Ready(response)) => (StatusCode::OK, Json(response)).into_response(),
        Ok(SeriesOutcome::Cancelled) => {
            (StatusCode::OK, Json(CancelledBody { status: "cancelled" })).into_response()
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "Series query failed");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "store unavailable")
        }
    }
}

pub fn router<S: TimeSeriesStore>() -> Router<AppState<S>> {
    Router::new().route("/series", get(get_series::<S>))
}
