//! Cancellation signal threaded through every command execution
//!
//! A `CancelHandle` owns the sending side; any number of `CancelSignal`s
//! observe it. Once cancelled, a handle stays cancelled.

use std::sync::Arc;

use tokio::sync::watch;

/// Sending side of a cancellation signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Create a new, not-yet-cancelled handle.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Create a signal observing this handle.
    #[must_use]
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Fire the signal. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        // The sender is dropped right away; `cancelled()` then pends forever.
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    /// Returns true if the signal has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal fires. Never resolves for `CancelSignal::never()`.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
