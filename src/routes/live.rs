//! `GET /series/live`: server-sent events carrying the newest readings.
//!
//! Each connection owns one [`LiveSubscription`]. A `snapshot` event goes out
//! on connect and again whenever the newest readings change. When the client
//! disconnects axum drops the event stream, and the subscription with it.

use std::sync::Arc;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures_util::stream::{self, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::info;

use super::AppState;
use crate::series::SeriesService;
use crate::store::TimeSeriesStore;
use crate::subscription::LiveSnapshot;

// ---

/// Snapshots for one subscriber; dropping the stream stops its subscription.
pub fn snapshots<S: TimeSeriesStore>(
    service: Arc<SeriesService<S>>,
) -> impl Stream<Item = LiveSnapshot> + Send + 'static {
    // ---
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = service.subscribe_latest(move |snapshot| {
        let _ = tx.send(snapshot);
    });

    stream::unfold((rx, subscription), |(mut rx, subscription)| async move {
        let snapshot = rx.recv().await?;
        Some((snapshot, (rx, subscription)))
    })
}

async fn live<S: TimeSeriesStore>(
    State((service, _)): State<AppState<S>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    // ---
    info!("Live subscriber connected");
    let events = snapshots(service).map(|snapshot| Event::default().event("snapshot").json_data(snapshot));
    Sse::new(events).keep_alive(KeepAlive::default())
}

pub fn router<S: TimeSeriesStore>() -> Router<AppState<S>> {
    Router::new().route("/series/live", get(live::<S>))
}
