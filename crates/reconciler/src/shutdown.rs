//! Shutdown signalling shared by the reconcile loop and in-flight passes.

use tokio::sync::watch;

/// Create a linked stopper/shutdown pair.
pub fn shutdown_channel() -> (LoopStopper, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (LoopStopper { stop_tx: tx }, Shutdown { rx: Some(rx) })
}

/// Handle to stop a reconcile loop and cancel its in-flight passes.
#[derive(Debug, Clone)]
pub struct LoopStopper {
    stop_tx: watch::Sender<bool>,
}

impl LoopStopper {
    /// Signal shutdown.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Receiving side of the shutdown signal.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: Option<watch::Receiver<bool>>,
}

impl Shutdown {
    /// A signal that never fires.
    pub const fn never() -> Self {
        Self { rx: None }
    }

    /// Whether shutdown has been signalled.
    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolve once shutdown is signalled.
    ///
    /// If every stopper is dropped without signalling, this never resolves.
    pub async fn cancelled(&self) {
        let Some(mut rx) = self.rx.clone() else {
            return std::future::pending().await;
        };
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
