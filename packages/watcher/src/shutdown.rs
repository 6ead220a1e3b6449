//! Cooperative cancellation
//!
//! A write-once trigger owned by the signal listener and read-only
//! handles polled by the watcher loop.

use tokio::sync::watch;

/// Create a linked trigger/handle pair
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

/// Fires the shutdown signal
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Signal shutdown to every handle; later calls are no-ops
    pub fn trigger(&self) {
        self.tx.send_if_modified(|cancelled| !std::mem::replace(cancelled, true));
    }
}

/// Read-only view of the shutdown signal
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Check whether shutdown has been requested
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is requested
    ///
    /// If the trigger is dropped without firing, this never resolves.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
