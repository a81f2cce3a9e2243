//! Contracts consumed from the remote repository manager.
//!
//! The wire client and credential lookup live outside this crate; the engine
//! only sees a [`SessionResolver`] and the [`RemoteSession`] it hands out.

mod memory;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::error::{Error, Result};
use crate::resource::ResourceKind;
use crate::shutdown::Shutdown;
use crate::types::ConnectionRef;

pub use memory::{InMemoryRemote, Operation, RemoteCall, SnapshotEntry, StaticResolver};

/// Failure classification of a remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The entity does not exist remotely.
    #[error("{kind} '{key}' not found")]
    NotFound { kind: ResourceKind, key: String },

    /// The remote refused the request.
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The remote could not be reached or failed internally.
    #[error("remote unavailable: {reason}")]
    Unavailable { reason: String },
}

impl RemoteError {
    /// Create a not found error.
    pub fn not_found(kind: ResourceKind, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }

    /// Create a rejection error.
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Create an unavailable error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Whether the entity is absent.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Failure to obtain a session for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// The connection entity does not exist.
    #[error("connection '{connection}' not found")]
    NotFound { connection: String },

    /// Credentials or endpoint are unusable right now.
    #[error("connection '{connection}' unavailable: {reason}")]
    Unavailable { connection: String, reason: String },
}

impl From<ResolveError> for Error {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound { connection } => Self::SessionNotFound { connection },
            ResolveError::Unavailable { connection, reason } => {
                Self::resolution(connection, reason)
            }
        }
    }
}

/// Authenticated handle to the remote system.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Fetch an entity by its natural key.
    async fn get(&self, kind: ResourceKind, key: &str) -> std::result::Result<Value, RemoteError>;

    /// Create an entity from a full payload.
    async fn create(
        &self,
        kind: ResourceKind,
        key: &str,
        payload: &Value,
    ) -> std::result::Result<(), RemoteError>;

    /// Replace an entity with a full payload.
    async fn update(
        &self,
        kind: ResourceKind,
        key: &str,
        payload: &Value,
    ) -> std::result::Result<(), RemoteError>;

    /// Delete an entity.
    async fn delete(&self, kind: ResourceKind, key: &str) -> std::result::Result<(), RemoteError>;
}

/// Turns a connection reference into a session.
#[async_trait]
pub trait SessionResolver: Send + Sync {
    /// Resolve the connection referenced from a declaration in `namespace`.
    async fn resolve(
        &self,
        namespace: &str,
        connection: &ConnectionRef,
    ) -> std::result::Result<Arc<dyn RemoteSession>, ResolveError>;
}

/// A session whose calls are bounded by a timeout and by shutdown.
#[derive(Clone)]
pub struct BoundSession {
    session: Arc<dyn RemoteSession>,
    timeout: Duration,
    shutdown: Shutdown,
}

impl BoundSession {
    /// Wrap a session.
    pub fn new(session: Arc<dyn RemoteSession>, timeout: Duration, shutdown: Shutdown) -> Self {
        Self {
            session,
            timeout,
            shutdown,
        }
    }

    /// Fetch an entity; `Ok(None)` when it does not exist.
    ///
    /// # Errors
    ///
    /// Any failure other than "not found".
    pub async fn fetch(&self, kind: ResourceKind, key: &str) -> Result<Option<Value>> {
        match self.call("get", key, self.session.get(kind, key)).await {
            Ok(value) => Ok(Some(value)),
            Err(Error::Remote { source, .. }) if source.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create an entity.
    ///
    /// # Errors
    ///
    /// Remote failure, timeout or cancellation.
    pub async fn create(&self, kind: ResourceKind, key: &str, payload: &Value) -> Result<()> {
        self.call("create", key, self.session.create(kind, key, payload))
            .await
    }

    /// Replace an entity.
    ///
    /// # Errors
    ///
    /// Remote failure, timeout or cancellation.
    pub async fn update(&self, kind: ResourceKind, key: &str, payload: &Value) -> Result<()> {
        self.call("update", key, self.session.update(kind, key, payload))
            .await
    }

    /// Delete an entity; `Ok(false)` when it was already absent.
    ///
    /// # Errors
    ///
    /// Any failure other than "not found".
    pub async fn delete(&self, kind: ResourceKind, key: &str) -> Result<bool> {
        match self.call("delete", key, self.session.delete(kind, key)).await {
            Ok(()) => Ok(true),
            Err(Error::Remote { source, .. }) if source.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn call<T, F>(&self, operation: &'static str, key: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, RemoteError>>,
    {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(Error::Cancelled),
            outcome = tokio::time::timeout(self.timeout, fut) => match outcome {
                Ok(result) => result.map_err(|e| Error::remote(operation, key, e)),
                Err(_) => Err(Error::timeout(operation, self.timeout)),
            },
        }
    }
}

/// Resolve a session bounded by `timeout` and shutdown.
///
/// # Errors
///
/// `SessionNotFound` for a missing connection, `Resolution` when it is
/// unusable or the lookup times out, `Cancelled` on shutdown.
pub async fn resolve_bounded(
    resolver: &dyn SessionResolver,
    namespace: &str,
    connection: &ConnectionRef,
    timeout: Duration,
    shutdown: &Shutdown,
) -> Result<Arc<dyn RemoteSession>> {
    tokio::select! {
        biased;
        () = shutdown.cancelled() => Err(Error::Cancelled),
        outcome = tokio::time::timeout(timeout, resolver.resolve(namespace, connection)) => match outcome {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::resolution(
                connection.name.clone(),
                format!("timed out after {}ms", timeout.as_millis()),
            )),
        },
    }
}
