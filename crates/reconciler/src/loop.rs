//! Worker pool delivering keys to the reconciler.
//!
//! Distinct keys run in parallel up to `OperatorConfig::workers`. A key that
//! is enqueued while its pass is running is marked dirty and run again right
//! after, never concurrently.

use std::collections::HashSet;
use std::sync::Arc;

use nxo_core::OperatorConfig;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::reconciler::Reconciler;
use crate::remote::SessionResolver;
use crate::resource::ResourceSpec;
use crate::shutdown::{shutdown_channel, LoopStopper, Shutdown};
use crate::store::DeclarationStore;
use crate::types::{Action, ObjectKey};

#[derive(Debug, Default)]
struct Flight {
    in_flight: HashSet<ObjectKey>,
    dirty: HashSet<ObjectKey>,
}

/// Cloneable handle for enqueueing keys.
#[derive(Debug, Clone)]
pub struct Enqueuer {
    tx: mpsc::UnboundedSender<ObjectKey>,
}

impl Enqueuer {
    /// Ask for a pass over `key`. Returns `false` once the loop is gone.
    pub fn enqueue(&self, key: ObjectKey) -> bool {
        self.tx.send(key).is_ok()
    }
}

/// Everything a spawned pass needs.
struct Worker<S: ResourceSpec> {
    reconciler: Arc<Reconciler<S>>,
    permits: Arc<Semaphore>,
    flight: Arc<Mutex<Flight>>,
    requeue: Enqueuer,
    shutdown: Shutdown,
}

impl<S: ResourceSpec> Clone for Worker<S> {
    fn clone(&self) -> Self {
        Self {
            reconciler: Arc::clone(&self.reconciler),
            permits: Arc::clone(&self.permits),
            flight: Arc::clone(&self.flight),
            requeue: self.requeue.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<S: ResourceSpec> Worker<S> {
    /// Run passes for `key` until it is no longer dirty, then schedule the
    /// last pass's retry directive.
    async fn drive(self, key: ObjectKey) {
        loop {
            let action = match Arc::clone(&self.permits).acquire_owned().await {
                Ok(_permit) if !self.shutdown.is_cancelled() => {
                    self.reconciler.run_once(&key).await
                }
                _ => Action::done(),
            };

            let rerun = {
                let mut flight = self.flight.lock().await;
                if flight.dirty.remove(&key) && !self.shutdown.is_cancelled() {
                    true
                } else {
                    flight.in_flight.remove(&key);
                    false
                }
            };
            if rerun {
                debug!(kind = %S::KIND, key = %key, "Key changed during pass, running again");
                continue;
            }
            self.schedule(key, action);
            return;
        }
    }

    fn schedule(&self, key: ObjectKey, action: Action) {
        let Some(delay) = action.requeue_after else {
            return;
        };
        let requeue = self.requeue.clone();
        let shutdown = self.shutdown.clone();
        debug!(kind = %S::KIND, key = %key, delay_ms = delay.as_millis(), "Requeue scheduled");
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => {
                    requeue.enqueue(key);
                }
                () = shutdown.cancelled() => {}
            }
        });
    }
}

/// Delivers enqueued keys of one kind to a [`Reconciler`].
pub struct ReconcileLoop<S: ResourceSpec> {
    worker: Worker<S>,
    queue_rx: mpsc::UnboundedReceiver<ObjectKey>,
    stopper: LoopStopper,
    workers: usize,
}

impl<S: ResourceSpec> ReconcileLoop<S> {
    /// Create a new loop with its own shutdown signal.
    pub fn new(
        store: Arc<dyn DeclarationStore<S>>,
        resolver: Arc<dyn SessionResolver>,
        config: OperatorConfig,
    ) -> Self {
        let (stopper, shutdown) = shutdown_channel();
        let (tx, queue_rx) = mpsc::unbounded_channel();
        let workers = config.workers.max(1);
        let reconciler = Reconciler::new(store, resolver, config).with_shutdown(shutdown.clone());
        Self {
            worker: Worker {
                reconciler: Arc::new(reconciler),
                permits: Arc::new(Semaphore::new(workers)),
                flight: Arc::new(Mutex::new(Flight::default())),
                requeue: Enqueuer { tx },
                shutdown,
            },
            queue_rx,
            stopper,
            workers,
        }
    }

    /// Handle for enqueueing keys, usable before and while the loop runs.
    pub fn handle(&self) -> Enqueuer {
        self.worker.requeue.clone()
    }

    /// Get a stopper handle.
    pub fn stopper(&self) -> LoopStopper {
        self.stopper.clone()
    }

    /// The reconciler passes are delivered to.
    pub fn reconciler(&self) -> &Arc<Reconciler<S>> {
        &self.worker.reconciler
    }

    /// Enqueue every key currently in the store.
    ///
    /// # Errors
    ///
    /// Store failure while listing keys.
    pub async fn enqueue_all(&self) -> Result<usize> {
        let keys = self
            .worker
            .reconciler
            .store()
            .list_keys()
            .await
            .map_err(Error::from)?;
        let handle = self.handle();
        Ok(keys.into_iter().filter(|key| handle.enqueue(key.clone())).count())
    }

    /// Run until stopped, then wait for in-flight passes to wind down.
    pub async fn run(mut self) {
        info!(kind = %S::KIND, workers = self.workers, "Starting reconcile loop");
        let mut passes = JoinSet::new();
        let shutdown = self.worker.shutdown.clone();

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                Some(key) = self.queue_rx.recv() => {
                    self.dispatch(key, &mut passes).await;
                }
                Some(joined) = passes.join_next(), if !passes.is_empty() => {
                    if let Err(e) = joined {
                        warn!(kind = %S::KIND, error = %e, "Pass task failed");
                    }
                }
            }
        }

        while let Some(joined) = passes.join_next().await {
            if let Err(e) = joined {
                warn!(kind = %S::KIND, error = %e, "Pass task failed during shutdown");
            }
        }
        info!(kind = %S::KIND, "Reconcile loop stopped");
    }

    async fn dispatch(&self, key: ObjectKey, passes: &mut JoinSet<()>) {
        {
            let mut flight = self.worker.flight.lock().await;
            if flight.in_flight.contains(&key) {
                flight.dirty.insert(key);
                return;
            }
            flight.in_flight.insert(key.clone());
        }
        passes.spawn(self.worker.clone().drive(key));
    }
}
