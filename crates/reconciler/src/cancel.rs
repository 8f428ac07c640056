//! Run-level cancellation.
//!
//! Cancelling stops the controller from dispatching further identities;
//! pipelines already running are left to finish.

use std::future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Create a connected handle/signal pair.
#[must_use]
pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx })
}

/// Requests cancellation.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Observes cancellation.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        let (_, signal) = cancellation();
        signal
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested.
    ///
    /// Pends forever if every handle is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                future::pending::<()>().await;
            }
        }
    }
}

/// Cancellation signal combined with an optional run deadline.
#[derive(Debug, Clone)]
pub(crate) struct StopCondition {
    signal: CancelSignal,
    deadline: Option<Instant>,
}

impl StopCondition {
    pub(crate) fn new(signal: CancelSignal, deadline: Option<Duration>) -> Self {
        Self {
            signal,
            deadline: deadline.map(|after| Instant::now() + after),
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.signal.is_cancelled() || self.deadline.is_some_and(|at| Instant::now() >= at)
    }

    pub(crate) async fn stopped(&self) {
        match self.deadline {
            Some(at) => {
                tokio::select! {
                    () = self.signal.cancelled() => {}
                    () = tokio::time::sleep_until(at) => {}
                }
            }
            None => self.signal.cancelled().await,
        }
    }
}
