//! Error types for the reconciler crate.

use std::time::Duration;

use thiserror::Error;

use crate::remote::RemoteError;
use crate::store::StoreError;
use crate::validate::ValidationError;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors a reconcile pass can end with.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The spec violates a schema invariant. Terminal.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No session could be obtained for the connection.
    #[error("cannot resolve session for connection '{connection}': {reason}")]
    Resolution { connection: String, reason: String },

    /// The connection entity does not exist. Treated as a no-op.
    #[error("connection '{connection}' not found")]
    SessionNotFound { connection: String },

    /// A remote get/create/update/delete call failed.
    #[error("remote {operation} of '{key}' failed: {source}")]
    Remote {
        operation: &'static str,
        key: String,
        #[source]
        source: RemoteError,
    },

    /// A bounded call did not finish in time.
    #[error("{operation} timed out after {}ms", .timeout.as_millis())]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// The optimistic-concurrency token was stale.
    #[error("conflicting write to '{key}': expected version {expected}, found {actual}")]
    Conflict {
        key: String,
        expected: u64,
        actual: u64,
    },

    /// Any other declaration store failure.
    #[error("store error: {reason}")]
    Store { reason: String },

    /// Building the remote projection of a spec failed.
    #[error("cannot project spec: {reason}")]
    Projection { reason: String },

    /// The pass was aborted by shutdown.
    #[error("reconcile pass cancelled")]
    Cancelled,
}

impl Error {
    /// Create a resolution error.
    pub fn resolution(connection: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resolution {
            connection: connection.into(),
            reason: reason.into(),
        }
    }

    /// Create a remote operation error.
    pub fn remote(operation: &'static str, key: impl Into<String>, source: RemoteError) -> Self {
        Self::Remote {
            operation,
            key: key.into(),
            source,
        }
    }

    /// Create a timeout error.
    pub const fn timeout(operation: &'static str, timeout: Duration) -> Self {
        Self::Timeout { operation, timeout }
    }

    /// Create a store error.
    pub fn store(reason: impl Into<String>) -> Self {
        Self::Store {
            reason: reason.into(),
        }
    }

    /// Create a projection error.
    pub fn projection(reason: impl Into<String>) -> Self {
        Self::Projection {
            reason: reason.into(),
        }
    }

    /// Whether this error is projected onto the declaration's status.
    ///
    /// Resolution failures, store conflicts and cancellation leave the last
    /// written status untouched.
    pub const fn reflects_in_status(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Remote { .. } | Self::Timeout { .. } | Self::Projection { .. }
        )
    }

    /// Whether re-running the pass can succeed without a spec change.
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Validation(_) | Self::Cancelled | Self::SessionNotFound { .. })
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict {
                key,
                expected,
                actual,
            } => Self::Conflict {
                key,
                expected,
                actual,
            },
            StoreError::Rejected(validation) => Self::Validation(validation),
            other => Self::store(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::resolution("nexus", "connection refused");
        assert!(err.to_string().contains("nexus"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_status_projection_policy() {
        assert!(!Error::resolution("nexus", "down").reflects_in_status());
        assert!(Error::remote("create", "raw/hosted/r", RemoteError::unavailable("503")).reflects_in_status());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn test_conflict_from_store() {
        let err: Error = StoreError::Conflict {
            key: "default/x".into(),
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(matches!(err, Error::Conflict { expected: 1, actual: 2, .. }));
    }
}
