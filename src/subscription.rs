//! Live "most recent N readings" subscription.
//!
//! The handle owns a polling task and the callback slot. [`LiveSubscription::stop`]
//! clears the slot under the same lock the poller holds while invoking the
//! callback, so once `stop` returns no further callback can run. Dropping the
//! handle stops the subscription.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::cancel::{cancel_pair, CancelHandle, CancelToken};
use crate::fields::FieldMap;
use crate::models::RawReading;
use crate::series::describe_coverage;
use crate::store::TimeSeriesStore;
use crate::tier::Tier;
use crate::EpochMillis;

// ---

/// One delivery to the subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveSnapshot {
    pub readings: Vec<RawReading>,
    pub coverage_description: String,
}

type Callback = Box<dyn FnMut(LiveSnapshot) + Send>;
type CallbackSlot = Arc<Mutex<Option<Callback>>>;

pub struct LiveSubscription {
    // ---
    slot: CallbackSlot,
    cancel: CancelHandle,
    task: JoinHandle<()>,
}

impl LiveSubscription {
    // ---
    /// Start polling the `count` newest readings every `poll_interval`.
    ///
    /// The first poll always delivers; later polls deliver only when the set
    /// of newest readings changed. The callback must not call [`stop`](Self::stop)
    /// on its own subscription.
    pub fn start<S, F>(
        store: Arc<S>,
        fields: FieldMap,
        count: usize,
        poll_interval: Duration,
        callback: F,
    ) -> Self
    where
        S: TimeSeriesStore,
        F: FnMut(LiveSnapshot) + Send + 'static,
    {
        // ---
        let callback: Callback = Box::new(callback);
        let slot: CallbackSlot = Arc::new(Mutex::new(Some(callback)));
        let (cancel, token) = cancel_pair();
        let task = tokio::spawn(poll_loop(store, fields, count, poll_interval, slot.clone(), token));
        Self { slot, cancel, task }
    }

    pub fn is_active(&self) -> bool {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.is_some()
    }

    /// Stop delivering. Blocks until an in-flight callback has returned.
    pub fn stop(&self) {
        // ---
        self.cancel.cancel();
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.take().is_some() {
            debug!("Live subscription stopped");
        }
        drop(slot);
        self.task.abort();
    }
}

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}

fn signature(readings: &[RawReading]) -> Option<(EpochMillis, usize)> {
    readings.last().map(|r| (r.timestamp, readings.len()))
}

async fn poll_loop<S: TimeSeriesStore>(
    store: Arc<S>,
    fields: FieldMap,
    count: usize,
    poll_interval: Duration,
    slot: CallbackSlot,
    cancel: CancelToken,
) {
    // ---
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen: Option<Option<(EpochMillis, usize)>> = None;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let records = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = store.latest_raw(count) => result,
        };
        let records = match records {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Live poll failed, retrying next tick");
                continue;
            }
        };

        let readings = fields.resolve_all(&records);
        let current = signature(&readings);
        if last_seen == Some(current) {
            continue;
        }
        last_seen = Some(current);

        let snapshot = LiveSnapshot {
            coverage_description: describe_coverage(readings.len(), 0, Tier::Raw, 1, true),
            readings,
        };

        let mut guard = slot.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_mut() {
            Some(callback) => callback(snapshot),
            None => return,
        }
    }
}
