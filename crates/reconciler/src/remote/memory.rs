//! In-memory remote system used by tests and the offline CLI modes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use super::{RemoteError, RemoteSession, ResolveError, SessionResolver};
use crate::resource::ResourceKind;
use crate::types::ConnectionRef;

/// Remote call kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Get,
    Create,
    Update,
    Delete,
}

impl Operation {
    /// Whether the call mutates remote state.
    pub const fn is_write(self) -> bool {
        !matches!(self, Self::Get)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "get"),
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// A call recorded by [`InMemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCall {
    pub operation: Operation,
    pub kind: ResourceKind,
    pub key: String,
}

impl fmt::Display for RemoteCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.operation, self.kind, self.key)
    }
}

/// One stored entity in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub kind: ResourceKind,
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Default)]
struct RemoteState {
    entities: BTreeMap<(ResourceKind, String), Value>,
    calls: Vec<RemoteCall>,
    failures: HashSet<(Operation, ResourceKind)>,
    in_flight: HashMap<String, usize>,
    max_in_flight: usize,
}

/// In-memory stand-in for the remote repository manager.
///
/// Records every call, can be told to fail specific operations, and never
/// returns write-only fields from `get`, like the real API.
#[derive(Debug, Default)]
pub struct InMemoryRemote {
    state: Mutex<RemoteState>,
    latency: Option<Duration>,
}

impl InMemoryRemote {
    /// Create an empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Build a remote pre-populated from snapshot entries.
    pub fn from_snapshot(entries: Vec<SnapshotEntry>) -> Self {
        let entities = entries
            .into_iter()
            .map(|entry| ((entry.kind, entry.key), entry.value))
            .collect();
        Self {
            state: Mutex::new(RemoteState {
                entities,
                ..RemoteState::default()
            }),
            latency: None,
        }
    }

    /// Store an entity directly, bypassing call recording.
    pub async fn seed(&self, kind: ResourceKind, key: impl Into<String>, value: Value) {
        self.state
            .lock()
            .await
            .entities
            .insert((kind, key.into()), value);
    }

    /// The stored value of an entity, including write-only fields.
    pub async fn stored(&self, kind: ResourceKind, key: &str) -> Option<Value> {
        self.state
            .lock()
            .await
            .entities
            .get(&(kind, key.to_string()))
            .cloned()
    }

    /// Every entity currently stored.
    pub async fn snapshot(&self) -> Vec<SnapshotEntry> {
        self.state
            .lock()
            .await
            .entities
            .iter()
            .map(|((kind, key), value)| SnapshotEntry {
                kind: *kind,
                key: key.clone(),
                value: value.clone(),
            })
            .collect()
    }

    /// Make every `operation` on `kind` fail until cleared.
    pub async fn fail(&self, operation: Operation, kind: ResourceKind) {
        self.state.lock().await.failures.insert((operation, kind));
    }

    /// Remove all injected failures.
    pub async fn clear_failures(&self) {
        self.state.lock().await.failures.clear();
    }

    /// All calls recorded so far.
    pub async fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().await.calls.clone()
    }

    /// Recorded calls that mutate remote state.
    pub async fn writes(&self) -> Vec<RemoteCall> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.operation.is_write())
            .cloned()
            .collect()
    }

    /// Forget recorded calls.
    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    /// Highest number of simultaneous calls observed for a single key.
    pub async fn max_concurrent_per_key(&self) -> usize {
        self.state.lock().await.max_in_flight
    }

    async fn enter(
        &self,
        operation: Operation,
        kind: ResourceKind,
        key: &str,
    ) -> Result<(), RemoteError> {
        {
            let mut state = self.state.lock().await;
            state.calls.push(RemoteCall {
                operation,
                kind,
                key: key.to_string(),
            });
            let count = state.in_flight.entry(key.to_string()).or_insert(0);
            *count = count.saturating_add(1);
            let current = *count;
            state.max_in_flight = state.max_in_flight.max(current);
        }

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().await;
        if let Some(count) = state.in_flight.get_mut(key) {
            *count = count.saturating_sub(1);
        }
        if state.failures.contains(&(operation, kind)) {
            return Err(RemoteError::unavailable(format!(
                "injected failure for {operation} {kind}"
            )));
        }
        Ok(())
    }
}

fn redact(mut value: Value, write_only: &[&str]) -> Value {
    for path in write_only {
        let mut segments: Vec<&str> = path.split('.').collect();
        let Some(leaf) = segments.pop() else {
            continue;
        };
        let parent = segments
            .iter()
            .try_fold(&mut value, |node, segment| node.get_mut(*segment));
        if let Some(Value::Object(object)) = parent {
            object.remove(leaf);
        }
    }
    value
}

#[async_trait]
impl RemoteSession for InMemoryRemote {
    async fn get(&self, kind: ResourceKind, key: &str) -> Result<Value, RemoteError> {
        self.enter(Operation::Get, kind, key).await?;
        let state = self.state.lock().await;
        state
            .entities
            .get(&(kind, key.to_string()))
            .map(|value| redact(value.clone(), kind.write_only_fields()))
            .ok_or_else(|| RemoteError::not_found(kind, key))
    }

    async fn create(&self, kind: ResourceKind, key: &str, payload: &Value) -> Result<(), RemoteError> {
        self.enter(Operation::Create, kind, key).await?;
        let mut state = self.state.lock().await;
        let slot = (kind, key.to_string());
        if state.entities.contains_key(&slot) {
            return Err(RemoteError::rejected(409, format!("{kind} '{key}' already exists")));
        }
        state.entities.insert(slot, payload.clone());
        Ok(())
    }

    async fn update(&self, kind: ResourceKind, key: &str, payload: &Value) -> Result<(), RemoteError> {
        self.enter(Operation::Update, kind, key).await?;
        let mut state = self.state.lock().await;
        match state.entities.get_mut(&(kind, key.to_string())) {
            Some(existing) => {
                *existing = payload.clone();
                Ok(())
            }
            None => Err(RemoteError::not_found(kind, key)),
        }
    }

    async fn delete(&self, kind: ResourceKind, key: &str) -> Result<(), RemoteError> {
        self.enter(Operation::Delete, kind, key).await?;
        let mut state = self.state.lock().await;
        state
            .entities
            .remove(&(kind, key.to_string()))
            .map(|_| ())
            .ok_or_else(|| RemoteError::not_found(kind, key))
    }
}

/// Resolver backed by a fixed table of sessions keyed by connection name.
#[derive(Default)]
pub struct StaticResolver {
    sessions: HashMap<String, Arc<dyn RemoteSession>>,
    unavailable: Mutex<HashSet<String>>,
}

impl StaticResolver {
    /// Create an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the session for a connection name.
    #[must_use]
    pub fn with_session(mut self, connection: impl Into<String>, session: Arc<dyn RemoteSession>) -> Self {
        self.sessions.insert(connection.into(), session);
        self
    }

    /// Make resolution of `connection` fail (or succeed again).
    pub async fn set_unavailable(&self, connection: &str, unavailable: bool) {
        let mut set = self.unavailable.lock().await;
        if unavailable {
            set.insert(connection.to_string());
        } else {
            set.remove(connection);
        }
    }
}

#[async_trait]
impl SessionResolver for StaticResolver {
    async fn resolve(
        &self,
        _namespace: &str,
        connection: &ConnectionRef,
    ) -> Result<Arc<dyn RemoteSession>, ResolveError> {
        if self.unavailable.lock().await.contains(&connection.name) {
            return Err(ResolveError::Unavailable {
                connection: connection.name.clone(),
                reason: "credentials rejected".to_string(),
            });
        }
        self.sessions
            .get(&connection.name)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound {
                connection: connection.name.clone(),
            })
    }
}
