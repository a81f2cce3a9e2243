//! Handler chains: ordered, idempotent steps run once per pass.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::converge::ConvergenceEngine;
use crate::error::{Error, Result};
use crate::remote::BoundSession;
use crate::resource::ResourceSpec;
use crate::shutdown::Shutdown;
use crate::types::Declaration;

/// Everything a handler sees during one pass.
pub struct PassContext<'a, S> {
    pub declaration: &'a Declaration<S>,
    pub session: &'a BoundSession,
    pub shutdown: &'a Shutdown,
}

impl<S> PassContext<'_, S> {
    /// Convergence engine over this pass's session.
    pub const fn engine(&self) -> ConvergenceEngine<'_> {
        ConvergenceEngine::new(self.session)
    }
}

/// One step of a chain.
#[async_trait]
pub trait Handler<S: ResourceSpec>: Send + Sync {
    /// Step name for logs.
    fn name(&self) -> &'static str;

    /// Run the step.
    async fn handle(&self, ctx: &PassContext<'_, S>) -> Result<()>;
}

/// Ordered handlers; the first failure stops the chain.
///
/// Chains hold no state between passes and are rebuilt for each one.
pub struct HandlerChain<S> {
    handlers: Vec<Box<dyn Handler<S>>>,
}

impl<S: ResourceSpec> HandlerChain<S> {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Append a handler.
    #[must_use]
    pub fn then(mut self, handler: impl Handler<S> + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Handler names in execution order.
    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Number of handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the chain has no handlers.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run every handler in order.
    ///
    /// # Errors
    ///
    /// The first handler error, or `Cancelled` if shutdown is signalled
    /// between steps.
    pub async fn run(&self, ctx: &PassContext<'_, S>) -> Result<()> {
        let key = ctx.declaration.key();
        for handler in &self.handlers {
            if ctx.shutdown.is_cancelled() {
                return Err(Error::Cancelled);
            }
            debug!(kind = %S::KIND, key = %key, handler = handler.name(), "Running handler");
            handler.handle(ctx).await.inspect_err(|e| {
                warn!(kind = %S::KIND, key = %key, handler = handler.name(), error = %e, "Handler failed");
            })?;
        }
        Ok(())
    }
}

impl<S: ResourceSpec> Default for HandlerChain<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Create or update the declared entity.
pub struct EnsureEntity;

#[async_trait]
impl<S: ResourceSpec> Handler<S> for EnsureEntity {
    fn name(&self) -> &'static str {
        "ensure-entity"
    }

    async fn handle(&self, ctx: &PassContext<'_, S>) -> Result<()> {
        let spec = &ctx.declaration.spec;
        let key = spec.remote_key()?;
        let desired = spec.desired_state()?;
        ctx.engine().converge(S::KIND, &key, &desired).await?;
        Ok(())
    }
}

/// Delete the declared entity; absence counts as success.
pub struct DeleteEntity;

#[async_trait]
impl<S: ResourceSpec> Handler<S> for DeleteEntity {
    fn name(&self) -> &'static str {
        "delete-entity"
    }

    async fn handle(&self, ctx: &PassContext<'_, S>) -> Result<()> {
        let key = ctx.declaration.spec.remote_key()?;
        ctx.engine().remove(S::KIND, &key).await?;
        Ok(())
    }
}
