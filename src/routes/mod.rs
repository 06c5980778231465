//! HTTP gateway.
//!
//! Each sibling module exports a subrouter; this gateway merges them and
//! attaches the shared state, so `main.rs` only needs [`router`].

use std::sync::Arc;

use axum::Router;

use crate::series::SeriesService;
use crate::store::TimeSeriesStore;

mod health;
mod live;
mod series;

pub use live::snapshots;
pub use series::{ClientQueries, ClientQuery, SeriesQuery};

// ---

/// State shared by every route: the query service and per-client query controllers.
pub type AppState<S> = (Arc<SeriesService<S>>, Arc<ClientQueries>);

pub fn router<S: TimeSeriesStore>(service: Arc<SeriesService<S>>) -> Router {
    // ---
    Router::new()
        .merge(series::router())
        .merge(live::router())
        .merge(health::router())
        .with_state((service, Arc::new(ClientQueries::default())))
}
