//! Core types for the reconciler: declarations, their metadata and status,
//! and the action a pass reports back to the delivery loop.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Namespace used when a manifest leaves it out.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Identity of a declaration inside the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    /// Create a new key.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Weak reference to the connection entity that supplies the endpoint and
/// credentials for the remote system.
///
/// Resolving it is a lookup; a declaration never owns its connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionRef {
    pub name: String,
    #[serde(default = "default_connection_kind")]
    pub kind: String,
}

impl ConnectionRef {
    /// Reference a connection by name with the default kind.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: default_connection_kind(),
        }
    }
}

impl fmt::Display for ConnectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

fn default_connection_kind() -> String {
    "Nexus".to_string()
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// Store-managed metadata of a declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Optimistic-concurrency token, bumped by the store on every write.
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    /// Set by the store when deletion is requested while finalizers remain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_requested_at: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Metadata for a fresh declaration.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            resource_version: 0,
            finalizers: Vec::new(),
            deletion_requested_at: None,
        }
    }

    /// The store key of this declaration.
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }

    /// Whether deletion has been requested.
    pub const fn is_deleting(&self) -> bool {
        self.deletion_requested_at.is_some()
    }

    /// Whether the given finalizer is present.
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Add a finalizer; returns false if it was already present.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers.push(finalizer.to_string());
        true
    }

    /// Remove a finalizer; returns false if it was not present.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        self.finalizers.len() != before
    }
}

/// Observed condition of a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusValue {
    Created,
    Error,
}

impl fmt::Display for StatusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Engine-authored status of a declaration. Users never write it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<StatusValue>,
    #[serde(default)]
    pub error: String,
}

impl Status {
    /// Status after a successful convergence.
    pub const fn created() -> Self {
        Self {
            value: Some(StatusValue::Created),
            error: String::new(),
        }
    }

    /// Status after a failed convergence or validation.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            value: Some(StatusValue::Error),
            error: message.into(),
        }
    }
}

/// A named, namespaced record of desired state plus its observed status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration<S> {
    pub metadata: ObjectMeta,
    pub spec: S,
    #[serde(default)]
    pub status: Status,
}

impl<S> Declaration<S> {
    /// Create a declaration with empty status.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: S) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: Status::default(),
        }
    }

    /// The store key of this declaration.
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }
}

/// Outcome of a reconcile pass as seen by the delivery loop.
///
/// `requeue_after` is the retry directive: present when the pass should be
/// re-run after the given delay, absent on terminal success or terminal
/// validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Action {
    pub requeue_after: Option<Duration>,
}

impl Action {
    /// Nothing further to do until the declaration changes.
    pub const fn done() -> Self {
        Self {
            requeue_after: None,
        }
    }

    /// Re-run the pass after `delay`.
    pub const fn requeue(delay: Duration) -> Self {
        Self {
            requeue_after: Some(delay),
        }
    }

    /// Whether a retry has been requested.
    pub const fn is_requeue(&self) -> bool {
        self.requeue_after.is_some()
    }
}
