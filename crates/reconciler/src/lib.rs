//! Desired-state reconciliation for repository-manager entities.
//!
//! Users declare entities (repositories, blob stores, users, roles, cleanup
//! policies, scripts) as [`Declaration`]s. The engine drives the remote
//! system towards each declaration's spec and reports the outcome back in its
//! status:
//!
//! - **Admission**: one-of and immutability rules run before a spec is stored
//! - **Finalizer**: a mark added on the first pass keeps the declaration
//!   around until its remote counterpart is deleted
//! - **Convergence**: fetch, field diff, then at most one create or update
//! - **Status**: `{created}` or `{error, message}`, written only on change
//! - **Retry**: any recoverable failure requeues the key after a fixed interval
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use nxo_core::OperatorConfig;
//! use nxo_reconciler::{
//!     kinds::RepositorySpec, DeclarationStore, InMemoryRemote, InMemoryStore,
//!     ReconcileLoop, StaticResolver,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let remote = Arc::new(InMemoryRemote::new());
//!     let resolver = Arc::new(StaticResolver::new().with_session("nexus", remote));
//!     let store = Arc::new(InMemoryStore::<RepositorySpec>::new());
//!
//!     let reconcile_loop = ReconcileLoop::new(store, resolver, OperatorConfig::default());
//!     let stopper = reconcile_loop.stopper();
//!     reconcile_loop.enqueue_all().await.ok();
//!
//!     // Run until stopped
//!     // reconcile_loop.run().await;
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod admission;
pub mod converge;
pub mod diff;
pub mod error;
pub mod finalizer;
pub mod handler;
pub mod kinds;
pub mod r#loop;
pub mod reconciler;
pub mod remote;
pub mod resource;
pub mod shutdown;
pub mod status;
pub mod store;
pub mod types;
pub mod validate;

// Re-export main types
pub use converge::{ConvergeOutcome, ConvergenceEngine, RemoveOutcome};
pub use error::{Error, Result};
pub use finalizer::{FinalizerLifecycle, FinalizerState};
pub use handler::{DeleteEntity, EnsureEntity, Handler, HandlerChain, PassContext};
pub use r#loop::{Enqueuer, ReconcileLoop};
pub use reconciler::Reconciler;
pub use remote::{
    BoundSession, InMemoryRemote, Operation, RemoteCall, RemoteError, RemoteSession,
    ResolveError, SessionResolver, SnapshotEntry, StaticResolver,
};
pub use resource::{ResourceKind, ResourceSpec};
pub use shutdown::{shutdown_channel, LoopStopper, Shutdown};
pub use store::{DeclarationStore, InMemoryStore, StoreError, StoreResult};
pub use types::{
    Action, ConnectionRef, Declaration, ObjectKey, ObjectMeta, Status, StatusValue,
    DEFAULT_NAMESPACE,
};
pub use validate::ValidationError;
