//! Cooperative cancellation for query-time work.
//!
//! A [`CancelToken`] is a cheap clone of a `watch` receiver; the paired
//! [`CancelHandle`] flips it once. [`QueryController`] hands out a fresh token
//! per query and cancels the one it replaces.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::watch;

// ---

/// Owner side; cancelling is permanent.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Observer side, passed into fetches.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    // ---
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelHandle {
    // ---
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelToken {
    // ---
    /// A token nobody can cancel.
    pub fn never() -> Self {
        let (_handle, token) = cancel_pair();
        token
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled; pends forever if the handle is dropped first.
    pub async fn cancelled(&self) {
        // ---
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Issues one token per query; starting a query supersedes the previous one.
#[derive(Debug, Default)]
pub struct QueryController {
    current: Mutex<Option<(u64, CancelHandle)>>,
    issued: AtomicU64,
}

impl QueryController {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the in-flight query, if any, and return a token for the next.
    pub fn begin(&self) -> CancelToken {
        self.begin_numbered().1
    }

    /// Like [`begin`](Self::begin), also returning the query's number for
    /// a later [`finish`](Self::finish).
    pub fn begin_numbered(&self) -> (u64, CancelToken) {
        // ---
        let number = self.issued.fetch_add(1, Ordering::Relaxed) + 1;
        let (handle, token) = cancel_pair();
        let mut slot = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, previous)) = slot.replace((number, handle)) {
            previous.cancel();
        }
        (number, token)
    }

    /// Release query `number` if it is still the current one.
    ///
    /// Returns true when nothing is in flight afterwards.
    pub fn finish(&self, number: u64) -> bool {
        // ---
        let mut slot = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(slot.as_ref(), Some((current, _)) if *current == number) {
            slot.take();
        }
        slot.is_none()
    }

    /// Cancel the in-flight query without starting another.
    pub fn cancel_current(&self) {
        let mut slot = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, previous)) = slot.take() {
            previous.cancel();
        }
    }
}
