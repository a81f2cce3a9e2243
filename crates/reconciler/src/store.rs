//! Declaration persistence.
//!
//! Every write is a compare-and-set on `resource_version`. The status is a
//! separate sub-resource: `update` never touches it and `update_status` never
//! touches anything else.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::admission;
use crate::resource::ResourceSpec;
use crate::types::{Declaration, ObjectKey};
use crate::validate::ValidationError;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Declaration store failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("'{key}' not found")]
    NotFound { key: String },

    #[error("'{key}' already exists")]
    AlreadyExists { key: String },

    #[error("conflicting write to '{key}': expected version {expected}, found {actual}")]
    Conflict {
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("admission rejected: {0}")]
    Rejected(#[from] ValidationError),
}

/// CRUD surface over declarations of one kind.
#[async_trait]
pub trait DeclarationStore<S: ResourceSpec>: Send + Sync {
    /// Read the current declaration, if any.
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<Declaration<S>>>;

    /// Persist a new declaration.
    async fn create(&self, declaration: Declaration<S>) -> StoreResult<Declaration<S>>;

    /// Write spec and metadata. Returns `None` when the write released the
    /// last finalizer of a deleting declaration and the record was removed.
    async fn update(&self, declaration: &Declaration<S>) -> StoreResult<Option<Declaration<S>>>;

    /// Write only the status.
    async fn update_status(&self, declaration: &Declaration<S>) -> StoreResult<Declaration<S>>;

    /// Request deletion. Removes the record at once if it carries no finalizers.
    async fn delete(&self, key: &ObjectKey) -> StoreResult<()>;

    /// Keys of every stored declaration.
    async fn list_keys(&self) -> StoreResult<Vec<ObjectKey>>;
}

/// In-memory declaration store with admission on every spec write.
pub struct InMemoryStore<S> {
    records: RwLock<HashMap<ObjectKey, Declaration<S>>>,
    status_writes: AtomicUsize,
}

impl<S> Default for InMemoryStore<S> {
    fn default() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            status_writes: AtomicUsize::new(0),
        }
    }
}

impl<S: ResourceSpec> InMemoryStore<S> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted status writes so far.
    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    /// Replace the spec of an existing declaration, as a user edit would.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent, `Rejected` if admission refuses the change.
    pub async fn apply_spec(&self, key: &ObjectKey, spec: S) -> StoreResult<Declaration<S>> {
        let Some(mut current) = self.get(key).await? else {
            return Err(StoreError::NotFound {
                key: key.to_string(),
            });
        };
        current.spec = spec;
        self.update(&current).await?.ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })
    }
}

fn check_version(key: &ObjectKey, expected: u64, actual: u64) -> StoreResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(StoreError::Conflict {
            key: key.to_string(),
            expected,
            actual,
        })
    }
}

#[async_trait]
impl<S: ResourceSpec> DeclarationStore<S> for InMemoryStore<S> {
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<Declaration<S>>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn create(&self, mut declaration: Declaration<S>) -> StoreResult<Declaration<S>> {
        let key = declaration.key();
        admission::review_create(&key, &declaration.spec)?;

        let mut records = self.records.write().await;
        if records.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                key: key.to_string(),
            });
        }
        declaration.metadata.resource_version = 1;
        declaration.metadata.deletion_requested_at = None;
        records.insert(key, declaration.clone());
        Ok(declaration)
    }

    async fn update(&self, declaration: &Declaration<S>) -> StoreResult<Option<Declaration<S>>> {
        let key = declaration.key();
        let mut records = self.records.write().await;
        let Some(current) = records.get(&key) else {
            return Err(StoreError::NotFound {
                key: key.to_string(),
            });
        };
        check_version(
            &key,
            declaration.metadata.resource_version,
            current.metadata.resource_version,
        )?;
        if current.spec != declaration.spec {
            admission::review_update(&key, &current.spec, &declaration.spec)?;
        }

        let mut next = declaration.clone();
        next.status = current.status.clone();
        next.metadata.deletion_requested_at = current.metadata.deletion_requested_at;
        next.metadata.resource_version = current.metadata.resource_version.saturating_add(1);

        if next.metadata.is_deleting() && next.metadata.finalizers.is_empty() {
            records.remove(&key);
            return Ok(None);
        }
        records.insert(key, next.clone());
        Ok(Some(next))
    }

    async fn update_status(&self, declaration: &Declaration<S>) -> StoreResult<Declaration<S>> {
        let key = declaration.key();
        let mut records = self.records.write().await;
        let Some(current) = records.get_mut(&key) else {
            return Err(StoreError::NotFound {
                key: key.to_string(),
            });
        };
        check_version(
            &key,
            declaration.metadata.resource_version,
            current.metadata.resource_version,
        )?;

        current.status = declaration.status.clone();
        current.metadata.resource_version = current.metadata.resource_version.saturating_add(1);
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(current.clone())
    }

    async fn delete(&self, key: &ObjectKey) -> StoreResult<()> {
        let mut records = self.records.write().await;
        let Some(current) = records.get_mut(key) else {
            return Err(StoreError::NotFound {
                key: key.to_string(),
            });
        };
        if current.metadata.finalizers.is_empty() {
            records.remove(key);
            return Ok(());
        }
        if current.metadata.deletion_requested_at.is_none() {
            current.metadata.deletion_requested_at = Some(Utc::now());
            current.metadata.resource_version = current.metadata.resource_version.saturating_add(1);
        }
        Ok(())
    }

    async fn list_keys(&self) -> StoreResult<Vec<ObjectKey>> {
        let mut keys: Vec<ObjectKey> = self.records.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use serde_json::json;

    use super::*;
    use crate::kinds::{RepositorySpec, ScriptSpec};
    use crate::types::{ConnectionRef, Status};

    fn script(content: &str) -> ScriptSpec {
        ScriptSpec {
            connection: ConnectionRef::named("nexus"),
            name: "hello".into(),
            content: content.into(),
            script_type: "groovy".into(),
        }
    }

    fn key() -> ObjectKey {
        ObjectKey::new("default", "hello")
    }

    #[tokio::test]
    async fn test_create_assigns_version() {
        let store = InMemoryStore::new();
        let created = store
            .create(Declaration::new("default", "hello", script("1")))
            .await
            .unwrap();
        assert_eq!(created.metadata.resource_version, 1);

        let again = store
            .create(Declaration::new("default", "hello", script("1")))
            .await;
        assert!(matches!(again, Err(StoreError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_create_runs_admission() {
        let store = InMemoryStore::<RepositorySpec>::new();
        let spec: RepositorySpec = serde_json::from_value(json!({
            "connection": {"name": "nexus"},
            "go": {"proxy": {"name": "a", "remoteUrl": "https://x"}},
            "npm": {"hosted": {"name": "b"}}
        }))
        .unwrap();
        let rejected = store.create(Declaration::new("default", "two", spec)).await;
        assert!(matches!(
            rejected,
            Err(StoreError::Rejected(ValidationError::MultipleFormats { .. }))
        ));
        assert!(store.list_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = InMemoryStore::new();
        let created = store
            .create(Declaration::new("default", "hello", script("1")))
            .await
            .unwrap();

        let mut first = created.clone();
        first.spec.content = "2".into();
        store.update(&first).await.unwrap();

        let mut stale = created;
        stale.spec.content = "3".into();
        assert_eq!(
            store.update(&stale).await,
            Err(StoreError::Conflict {
                key: "default/hello".into(),
                expected: 1,
                actual: 2
            })
        );
    }

    #[tokio::test]
    async fn test_update_and_status_are_separate() {
        let store = InMemoryStore::new();
        let created = store
            .create(Declaration::new("default", "hello", script("1")))
            .await
            .unwrap();

        let mut with_status = created.clone();
        with_status.status = Status::created();
        with_status.spec.content = "ignored".into();
        let stored = store.update_status(&with_status).await.unwrap();
        assert_eq!(stored.status, Status::created());
        assert_eq!(stored.spec.content, "1");
        assert_eq!(store.status_writes(), 1);

        let mut edited = stored.clone();
        edited.spec.content = "2".into();
        edited.status = Status::error("ignored");
        let stored = store.update(&edited).await.unwrap().unwrap();
        assert_eq!(stored.status, Status::created());
        assert_eq!(stored.spec.content, "2");
    }

    #[tokio::test]
    async fn test_delete_waits_for_finalizers() {
        let store = InMemoryStore::new();
        let mut created = store
            .create(Declaration::new("default", "hello", script("1")))
            .await
            .unwrap();
        created.metadata.add_finalizer("nxo.dev/finalizer");
        let marked = store.update(&created).await.unwrap().unwrap();

        store.delete(&key()).await.unwrap();
        let deleting = store.get(&key()).await.unwrap().unwrap();
        assert!(deleting.metadata.is_deleting());
        assert!(deleting.metadata.resource_version > marked.metadata.resource_version);

        let mut released = deleting;
        released.metadata.remove_finalizer("nxo.dev/finalizer");
        assert_eq!(store.update(&released).await.unwrap(), None);
        assert_eq!(store.get(&key()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_without_finalizers_is_immediate() {
        let store = InMemoryStore::new();
        store
            .create(Declaration::new("default", "hello", script("1")))
            .await
            .unwrap();
        store.delete(&key()).await.unwrap();
        assert_eq!(store.get(&key()).await.unwrap(), None);
        assert!(matches!(
            store.delete(&key()).await,
            Err(StoreError::NotFound { .. })
        ));
    }
}
