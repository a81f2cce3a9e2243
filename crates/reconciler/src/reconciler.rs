//! The per-key reconcile pass.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use itertools::Itertools;
use nxo_core::OperatorConfig;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::finalizer::{FinalizerLifecycle, FinalizerState};
use crate::handler::PassContext;
use crate::remote::{resolve_bounded, BoundSession, SessionResolver};
use crate::resource::ResourceSpec;
use crate::shutdown::Shutdown;
use crate::status::{apply_status, status_for};
use crate::store::DeclarationStore;
use crate::types::{Action, Declaration, ObjectKey, Status};

/// Reconciles declarations of one kind against the remote system.
///
/// A pass assumes no other pass for the same key runs concurrently; the
/// delivery loop guarantees that. All declaration writes are conditional on
/// the version the pass read, so a concurrent user edit makes the pass fail
/// with a conflict and run again from the start.
pub struct Reconciler<S: ResourceSpec> {
    store: Arc<dyn DeclarationStore<S>>,
    resolver: Arc<dyn SessionResolver>,
    config: OperatorConfig,
    shutdown: Shutdown,
}

impl<S: ResourceSpec> Reconciler<S> {
    /// Create a new reconciler.
    pub fn new(
        store: Arc<dyn DeclarationStore<S>>,
        resolver: Arc<dyn SessionResolver>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            config,
            shutdown: Shutdown::never(),
        }
    }

    /// Abort passes promptly once `shutdown` fires.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Get the configuration.
    pub const fn config(&self) -> &OperatorConfig {
        &self.config
    }

    /// Get the declaration store.
    pub fn store(&self) -> &Arc<dyn DeclarationStore<S>> {
        &self.store
    }

    /// Run one pass and fold any error into the retry directive.
    pub async fn run_once(&self, key: &ObjectKey) -> Action {
        match self.reconcile(key).await {
            Ok(action) => action,
            Err(e) => self.error_policy(key, &e),
        }
    }

    /// Run one pass for each distinct key, up to `workers` at a time.
    ///
    /// Duplicate keys are dropped so no key is processed twice concurrently.
    pub async fn sweep(&self, keys: impl IntoIterator<Item = ObjectKey>) -> Vec<(ObjectKey, Action)> {
        let keys: Vec<ObjectKey> = keys.into_iter().unique().collect();
        stream::iter(keys)
            .map(|key| async move {
                let action = self.run_once(&key).await;
                (key, action)
            })
            .buffer_unordered(self.config.workers.max(1))
            .collect()
            .await
    }

    /// Run one pass for `key`.
    ///
    /// # Errors
    ///
    /// Any error that ended the pass early; feed it to
    /// [`Reconciler::error_policy`] to get the retry directive.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let Some(declaration) = self.store.get(key).await? else {
            debug!(kind = %S::KIND, key = %key, "Declaration gone, nothing to do");
            return Ok(Action::done());
        };

        if declaration.metadata.is_deleting() {
            self.cleanup(declaration).await
        } else {
            self.apply(declaration).await
        }
    }

    /// Map a failed pass to a retry directive.
    ///
    /// Retries use a fixed interval rather than exponential backoff.
    pub fn error_policy(&self, key: &ObjectKey, err: &Error) -> Action {
        match err {
            Error::Conflict { .. } => {
                debug!(kind = %S::KIND, key = %key, error = %err, "Write conflict, re-running pass");
                Action::requeue(self.config.conflict_retry_interval)
            }
            e if e.is_retryable() => {
                warn!(
                    kind = %S::KIND,
                    key = %key,
                    error = %e,
                    retry_in_secs = self.config.retry_interval.as_secs(),
                    "Reconcile failed, will retry"
                );
                Action::requeue(self.config.retry_interval)
            }
            e => {
                info!(kind = %S::KIND, key = %key, error = %e, "Reconcile stopped without retry");
                Action::done()
            }
        }
    }

    async fn apply(&self, declaration: Declaration<S>) -> Result<Action> {
        let key = declaration.key();

        // Admission already ran this check; specs persisted before the rule
        // existed can still get here.
        if let Err(invalid) = declaration.spec.validate_create() {
            let err = Error::from(invalid);
            warn!(kind = %S::KIND, key = %key, error = %err, "Declaration is invalid");
            apply_status(self.store.as_ref(), &declaration, Status::error(err.to_string())).await?;
            return Ok(Action::done());
        }

        let session = match self.session_for(&declaration).await {
            Ok(session) => session,
            Err(Error::SessionNotFound { connection }) => {
                info!(kind = %S::KIND, key = %key, connection = %connection, "Connection not found, skipping");
                return Ok(Action::done());
            }
            Err(e) => return Err(e),
        };

        let lifecycle = FinalizerLifecycle::new(self.store.as_ref(), &self.config.finalizer);
        let declaration = lifecycle.ensure_marked(declaration).await?;

        let ctx = PassContext {
            declaration: &declaration,
            session: &session,
            shutdown: &self.shutdown,
        };
        let outcome = S::apply_chain().run(&ctx).await;
        if outcome.is_ok() {
            debug!(kind = %S::KIND, key = %key, "Declaration converged");
        }
        self.settle(&declaration, outcome).await
    }

    async fn cleanup(&self, declaration: Declaration<S>) -> Result<Action> {
        let key = declaration.key();
        let lifecycle = FinalizerLifecycle::new(self.store.as_ref(), &self.config.finalizer);
        if lifecycle.state(&declaration) != FinalizerState::Deleting {
            debug!(kind = %S::KIND, key = %key, "Deleting without finalizer, nothing to clean up");
            return Ok(Action::done());
        }

        let session = match self.session_for(&declaration).await {
            Ok(session) => session,
            Err(Error::SessionNotFound { connection }) => {
                warn!(
                    kind = %S::KIND,
                    key = %key,
                    connection = %connection,
                    "Connection gone, releasing finalizer without remote cleanup"
                );
                lifecycle.release(&declaration).await?;
                return Ok(Action::done());
            }
            Err(e) => return Err(e),
        };

        let ctx = PassContext {
            declaration: &declaration,
            session: &session,
            shutdown: &self.shutdown,
        };
        match S::delete_chain().run(&ctx).await {
            Ok(()) => {
                lifecycle.release(&declaration).await?;
                Ok(Action::done())
            }
            Err(e) => self.settle(&declaration, Err(e)).await,
        }
    }

    /// Project the chain outcome onto the status, then return it.
    async fn settle(&self, declaration: &Declaration<S>, outcome: Result<()>) -> Result<Action> {
        if let Some(status) = status_for(&outcome) {
            let written = apply_status(self.store.as_ref(), declaration, status).await;
            match (&outcome, written) {
                (Ok(()), Err(e)) => return Err(e),
                (Err(_), Err(e)) => {
                    warn!(kind = %S::KIND, key = %declaration.key(), error = %e, "Failed to record error status");
                }
                (_, Ok(_)) => {}
            }
        }
        outcome.map(|()| Action::done())
    }

    async fn session_for(&self, declaration: &Declaration<S>) -> Result<BoundSession> {
        let session = resolve_bounded(
            self.resolver.as_ref(),
            &declaration.metadata.namespace,
            declaration.spec.connection(),
            self.config.resolve_timeout,
            &self.shutdown,
        )
        .await?;
        Ok(BoundSession::new(
            session,
            self.config.remote_timeout,
            self.shutdown.clone(),
        ))
    }
}
