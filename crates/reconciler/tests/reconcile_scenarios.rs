//! End-to-end reconcile passes against the in-memory store and remote.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::indexing_slicing)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use nxo_core::OperatorConfig;
use nxo_reconciler::kinds::{BlobStoreSpec, RepositorySpec, ScriptSpec};
use nxo_reconciler::{
    ConnectionRef, Declaration, DeclarationStore, InMemoryRemote, InMemoryStore, ObjectKey,
    Operation, Reconciler, ResourceKind, ResourceSpec, Status, StaticResolver, StatusValue,
    StoreError, StoreResult, ValidationError,
};
use serde_json::{json, Value};

const FINALIZER: &str = nxo_core::DEFAULT_FINALIZER;

struct Harness<S: nxo_reconciler::ResourceSpec> {
    store: Arc<InMemoryStore<S>>,
    remote: Arc<InMemoryRemote>,
    resolver: Arc<StaticResolver>,
    reconciler: Reconciler<S>,
}

fn harness<S: nxo_reconciler::ResourceSpec>() -> Harness<S> {
    let store = Arc::new(InMemoryStore::new());
    let remote = Arc::new(InMemoryRemote::new());
    let resolver = Arc::new(StaticResolver::new().with_session("nexus", remote.clone()));
    let config = OperatorConfig::default().remote_timeout(Duration::from_secs(1));
    let reconciler = Reconciler::new(store.clone(), resolver.clone(), config);
    Harness {
        store,
        remote,
        resolver,
        reconciler,
    }
}

fn go_proxy(remote_url: &str) -> RepositorySpec {
    serde_json::from_value(json!({
        "connection": {"name": "nexus"},
        "go": {"proxy": {"name": "go-proxy", "remoteUrl": remote_url}}
    }))
    .unwrap()
}

fn key(name: &str) -> ObjectKey {
    ObjectKey::new("default", name)
}

/// Given a go proxy declared against an empty remote
/// When it is reconciled, edited, and deleted
/// Then the remote sees exactly one create, one update and one delete
#[tokio::test]
async fn go_proxy_lifecycle() {
    let h = harness::<RepositorySpec>();
    h.store
        .create(Declaration::new("default", "go", go_proxy("https://x")))
        .await
        .unwrap();

    let action = h.reconciler.run_once(&key("go")).await;
    assert!(!action.is_requeue());
    let writes = h.remote.writes().await;
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].operation, Operation::Create);
    assert_eq!(writes[0].key, "go/proxy/go-proxy");

    let stored = h.store.get(&key("go")).await.unwrap().unwrap();
    assert_eq!(stored.status, Status::created());
    assert_eq!(stored.status.error, "");
    assert!(stored.metadata.has_finalizer(FINALIZER));

    h.remote.clear_calls().await;
    h.reconciler.run_once(&key("go")).await;
    assert!(h.remote.writes().await.is_empty());

    h.store
        .apply_spec(&key("go"), go_proxy("https://proxy.golang.org"))
        .await
        .unwrap();
    h.remote.clear_calls().await;
    h.reconciler.run_once(&key("go")).await;
    let writes = h.remote.writes().await;
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].operation, Operation::Update);
    let remote_value = h
        .remote
        .stored(ResourceKind::Repository, "go/proxy/go-proxy")
        .await
        .unwrap();
    assert_eq!(remote_value["remoteUrl"], "https://proxy.golang.org");

    h.store.delete(&key("go")).await.unwrap();
    assert!(h.store.get(&key("go")).await.unwrap().is_some());
    h.remote.clear_calls().await;
    h.reconciler.run_once(&key("go")).await;
    let writes = h.remote.writes().await;
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].operation, Operation::Delete);
    assert_eq!(h.store.get(&key("go")).await.unwrap(), None);
    assert_eq!(
        h.remote
            .stored(ResourceKind::Repository, "go/proxy/go-proxy")
            .await,
        None
    );
}

/// Given a converged declaration whose remote delete always fails
/// When deletion is requested and retried many times
/// Then the declaration and its finalizer survive every attempt
#[tokio::test]
async fn finalizer_survives_failing_deletes() {
    let h = harness::<RepositorySpec>();
    h.store
        .create(Declaration::new("default", "go", go_proxy("https://x")))
        .await
        .unwrap();
    h.reconciler.run_once(&key("go")).await;

    h.remote
        .fail(Operation::Delete, ResourceKind::Repository)
        .await;
    h.store.delete(&key("go")).await.unwrap();

    for _ in 0..5 {
        let action = h.reconciler.run_once(&key("go")).await;
        assert_eq!(action.requeue_after, Some(Duration::from_secs(30)));
        let stored = h.store.get(&key("go")).await.unwrap().unwrap();
        assert!(stored.metadata.has_finalizer(FINALIZER));
        assert_eq!(stored.status.value, Some(StatusValue::Error));
    }

    h.remote.clear_failures().await;
    let action = h.reconciler.run_once(&key("go")).await;
    assert!(!action.is_requeue());
    assert_eq!(h.store.get(&key("go")).await.unwrap(), None);
}

/// Given a converged declaration
/// When it is reconciled repeatedly without changes
/// Then the status is written once
#[tokio::test]
async fn unchanged_status_is_written_once() {
    let h = harness::<ScriptSpec>();
    let spec = ScriptSpec {
        connection: ConnectionRef::named("nexus"),
        name: "hello".into(),
        content: "return 'hi'".into(),
        script_type: "groovy".into(),
    };
    h.store
        .create(Declaration::new("default", "hello", spec))
        .await
        .unwrap();

    for _ in 0..4 {
        h.reconciler.run_once(&key("hello")).await;
    }
    assert_eq!(h.store.status_writes(), 1);
}

/// Given a remote failure that persists across passes
/// When the same error is reported again
/// Then the error status is not rewritten
#[tokio::test]
async fn repeated_error_status_is_written_once() {
    let h = harness::<RepositorySpec>();
    h.remote
        .fail(Operation::Create, ResourceKind::Repository)
        .await;
    h.store
        .create(Declaration::new("default", "go", go_proxy("https://x")))
        .await
        .unwrap();

    for _ in 0..3 {
        let action = h.reconciler.run_once(&key("go")).await;
        assert!(action.is_requeue());
    }
    assert_eq!(h.store.status_writes(), 1);
    let stored = h.store.get(&key("go")).await.unwrap().unwrap();
    assert_eq!(stored.status.value, Some(StatusValue::Error));
    assert!(stored.status.error.contains("injected failure"));
}

/// Given a stored repository
/// When its format or type is changed
/// Then the store rejects the write and keeps the original spec
#[tokio::test]
async fn format_and_type_are_immutable() {
    let h = harness::<RepositorySpec>();
    h.store
        .create(Declaration::new("default", "go", go_proxy("https://x")))
        .await
        .unwrap();

    let group: RepositorySpec = serde_json::from_value(json!({
        "connection": {"name": "nexus"},
        "go": {"group": {"name": "go-proxy", "memberNames": ["a"]}}
    }))
    .unwrap();
    assert!(matches!(
        h.store.apply_spec(&key("go"), group).await,
        Err(StoreError::Rejected(ValidationError::TypeImmutable { .. }))
    ));

    let npm: RepositorySpec = serde_json::from_value(json!({
        "connection": {"name": "nexus"},
        "npm": {"proxy": {"name": "go-proxy", "remoteUrl": "https://registry.npmjs.org"}}
    }))
    .unwrap();
    assert!(matches!(
        h.store.apply_spec(&key("go"), npm).await,
        Err(StoreError::Rejected(ValidationError::FormatImmutable { .. }))
    ));

    let stored = h.store.get(&key("go")).await.unwrap().unwrap();
    assert_eq!(stored.spec, go_proxy("https://x"));
}

/// Given a declaration whose connection cannot be resolved
/// When it is reconciled
/// Then the pass is retried and the prior status is left alone
#[tokio::test]
async fn resolution_failure_preserves_status() {
    let h = harness::<RepositorySpec>();
    h.store
        .create(Declaration::new("default", "go", go_proxy("https://x")))
        .await
        .unwrap();
    h.reconciler.run_once(&key("go")).await;
    let writes_before = h.store.status_writes();

    h.resolver.set_unavailable("nexus", true).await;
    h.store
        .apply_spec(&key("go"), go_proxy("https://y"))
        .await
        .unwrap();
    let action = h.reconciler.run_once(&key("go")).await;
    assert_eq!(action.requeue_after, Some(Duration::from_secs(30)));
    assert_eq!(h.store.status_writes(), writes_before);
    let stored = h.store.get(&key("go")).await.unwrap().unwrap();
    assert_eq!(stored.status, Status::created());
}

/// Given a declaration naming a connection that does not exist
/// When it is reconciled
/// Then nothing happens and nothing is retried
#[tokio::test]
async fn unknown_connection_is_a_no_op() {
    let h = harness::<RepositorySpec>();
    let mut spec = go_proxy("https://x");
    spec.connection = ConnectionRef::named("elsewhere");
    h.store
        .create(Declaration::new("default", "go", spec))
        .await
        .unwrap();

    let action = h.reconciler.run_once(&key("go")).await;
    assert!(!action.is_requeue());
    assert!(h.remote.calls().await.is_empty());
    let stored = h.store.get(&key("go")).await.unwrap().unwrap();
    assert!(stored.metadata.finalizers.is_empty());
    assert_eq!(stored.status.value, None);
}

/// Given a remote entity that already matches, apart from a write-only field
/// When the declaration is reconciled
/// Then no update is sent
#[tokio::test]
async fn write_only_fields_do_not_cause_drift() {
    let h = harness::<RepositorySpec>();
    let spec: RepositorySpec = serde_json::from_value(json!({
        "connection": {"name": "nexus"},
        "raw": {"proxy": {
            "name": "files",
            "remoteUrl": "https://files.example.com",
            "httpAuth": {"username": "bot", "password": "hunter2"}
        }}
    }))
    .unwrap();
    h.store
        .create(Declaration::new("default", "files", spec))
        .await
        .unwrap();

    h.reconciler.run_once(&key("files")).await;
    h.remote.clear_calls().await;
    h.reconciler.run_once(&key("files")).await;
    assert!(h.remote.writes().await.is_empty());

    let stored: Value = h
        .remote
        .stored(ResourceKind::Repository, "raw/proxy/files")
        .await
        .unwrap();
    assert_eq!(stored["httpAuth"]["password"], "hunter2");
}

/// Given several declarations of one kind
/// When they are swept together
/// Then every one converges
#[tokio::test]
async fn sweep_converges_every_key() {
    let h = harness::<ScriptSpec>();
    let names = ["a", "b", "c"];
    for name in names {
        let spec = ScriptSpec {
            connection: ConnectionRef::named("nexus"),
            name: name.into(),
            content: "return 1".into(),
            script_type: "groovy".into(),
        };
        h.store
            .create(Declaration::new("default", name, spec))
            .await
            .unwrap();
    }

    let keys = h.store.list_keys().await.unwrap();
    let actions = h
        .reconciler
        .sweep(keys.iter().cloned().chain(keys.iter().cloned()))
        .await;
    assert_eq!(actions.len(), names.len());
    assert!(actions.iter().all(|(_, action)| !action.is_requeue()));
    assert_eq!(h.remote.writes().await.len(), names.len());
}

/// Given a blob store with a soft quota converged on the remote
/// When the declaration is deleted and reconciled
/// Then both the quota and the blob store are removed before the finalizer goes
#[tokio::test]
async fn blob_store_delete_removes_quota() {
    let h = harness::<BlobStoreSpec>();
    let spec: BlobStoreSpec = serde_json::from_value(json!({
        "connection": {"name": "nexus"},
        "name": "artifacts",
        "file": {"path": "/nexus-data/blobs/artifacts"},
        "softQuota": {"type": "spaceUsedQuota", "limit": 10}
    }))
    .unwrap();
    h.store
        .create(Declaration::new("default", "artifacts", spec))
        .await
        .unwrap();
    h.reconciler.run_once(&key("artifacts")).await;
    assert!(h
        .remote
        .stored(ResourceKind::BlobStoreQuota, "artifacts")
        .await
        .is_some());

    h.store.delete(&key("artifacts")).await.unwrap();
    let action = h.reconciler.run_once(&key("artifacts")).await;
    assert!(!action.is_requeue());
    assert_eq!(h.store.get(&key("artifacts")).await.unwrap(), None);
    assert_eq!(h.remote.stored(ResourceKind::BlobStore, "artifacts").await, None);
    assert_eq!(
        h.remote
            .stored(ResourceKind::BlobStoreQuota, "artifacts")
            .await,
        None
    );
}

/// Store that lets one concurrent edit land right after a read.
struct EditAfterRead<S> {
    inner: Arc<InMemoryStore<S>>,
    armed: AtomicBool,
}

#[async_trait]
impl<S: ResourceSpec> DeclarationStore<S> for EditAfterRead<S> {
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<Declaration<S>>> {
        let read = self.inner.get(key).await?;
        if let Some(current) = &read {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.inner.update(current).await?;
            }
        }
        Ok(read)
    }

    async fn create(&self, declaration: Declaration<S>) -> StoreResult<Declaration<S>> {
        self.inner.create(declaration).await
    }

    async fn update(&self, declaration: &Declaration<S>) -> StoreResult<Option<Declaration<S>>> {
        self.inner.update(declaration).await
    }

    async fn update_status(&self, declaration: &Declaration<S>) -> StoreResult<Declaration<S>> {
        self.inner.update_status(declaration).await
    }

    async fn delete(&self, key: &ObjectKey) -> StoreResult<()> {
        self.inner.delete(key).await
    }

    async fn list_keys(&self) -> StoreResult<Vec<ObjectKey>> {
        self.inner.list_keys().await
    }
}

/// Given a declaration edited concurrently between the pass's read and write
/// When the pass runs
/// Then it is requeued after the conflict interval and nothing is written
#[tokio::test]
async fn concurrent_edit_requeues_pass() {
    let inner = Arc::new(InMemoryStore::new());
    let remote = Arc::new(InMemoryRemote::new());
    let resolver = Arc::new(StaticResolver::new().with_session("nexus", remote.clone()));
    let store = Arc::new(EditAfterRead {
        inner: inner.clone(),
        armed: AtomicBool::new(true),
    });
    let config = OperatorConfig::default();
    let conflict_retry = config.conflict_retry_interval;
    let reconciler = Reconciler::new(store, resolver, config);

    inner
        .create(Declaration::new("default", "go", go_proxy("https://x")))
        .await
        .unwrap();

    let action = reconciler.run_once(&key("go")).await;
    assert_eq!(action.requeue_after, Some(conflict_retry));
    assert_eq!(conflict_retry, Duration::from_secs(1));

    let stored = inner.get(&key("go")).await.unwrap().unwrap();
    assert!(!stored.metadata.has_finalizer(FINALIZER));
    assert_eq!(stored.status, Status::default());
    assert_eq!(stored.metadata.resource_version, 2);
    assert_eq!(inner.status_writes(), 0);
    assert!(remote.writes().await.is_empty());

    let action = reconciler.run_once(&key("go")).await;
    assert!(!action.is_requeue());
    assert_eq!(remote.writes().await.len(), 1);
}
