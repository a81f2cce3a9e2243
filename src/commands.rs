//! CLI command handlers.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use nxo_core::{OperatorConfig, ResultExt};
use nxo_reconciler::{
    Declaration, DeclarationStore, InMemoryRemote, InMemoryStore, LoopStopper, ReconcileLoop,
    Reconciler, RemoteCall, ResourceKind, ResourceSpec, SnapshotEntry, StaticResolver, Status,
};
use serde::Serialize;
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::cli::Commands;
use crate::manifest::{ByKind, Manifest};

/// Execute a CLI command.
pub async fn execute_command(command: Commands, config: OperatorConfig) -> Result<()> {
    match command {
        Commands::Validate { manifest, previous } => cmd_validate(&manifest, previous.as_deref()),
        Commands::Plan {
            manifest,
            remote,
            json,
        } => cmd_plan(&manifest, remote.as_deref(), json, &config).await,
        Commands::Run { manifest, remote } => cmd_run(&manifest, remote.as_deref(), &config).await,
    }
}

/// Admission verdict for one declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub kind: ResourceKind,
    pub key: String,
    pub update: bool,
    pub rejection: Option<String>,
}

/// Status left behind by a planning pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStatus {
    pub kind: ResourceKind,
    pub key: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_in_secs: Option<u64>,
}

/// Writes a pass would issue and the statuses it would leave.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlanReport {
    pub writes: Vec<RemoteCall>,
    pub statuses: Vec<PlannedStatus>,
}

fn cmd_validate(path: &Path, previous: Option<&Path>) -> Result<()> {
    let manifest = Manifest::from_file(path)
        .with_context(|| format!("Failed to load manifest {}", path.display()))?;
    let previous = previous
        .map(|p| {
            Manifest::from_file(p)
                .with_context(|| format!("Failed to load previous manifest {}", p.display()))
        })
        .transpose()?;

    let verdicts = review(&manifest, previous.as_ref());
    for verdict in &verdicts {
        let action = if verdict.update { "update" } else { "create" };
        match &verdict.rejection {
            None => println!("ok      {} {} ({action})", verdict.kind, verdict.key),
            Some(reason) => println!("REJECT  {} {} ({action}): {reason}", verdict.kind, verdict.key),
        }
    }

    let rejected = verdicts.iter().filter(|v| v.rejection.is_some()).count();
    if rejected > 0 {
        bail!("{rejected} of {} declarations rejected", verdicts.len());
    }
    info!(count = verdicts.len(), "All declarations admitted");
    Ok(())
}

/// Run admission over every document, as an update where `previous` has a
/// declaration of the same kind and key.
pub fn review(manifest: &Manifest, previous: Option<&Manifest>) -> Vec<Verdict> {
    manifest
        .documents
        .iter()
        .map(|document| {
            let old = previous.and_then(|p| p.find(document));
            let outcome = match old {
                Some(old) => document.review_update(old),
                None => document.review_create(),
            };
            Verdict {
                kind: document.kind(),
                key: document.key().to_string(),
                update: old.is_some(),
                rejection: outcome.err().map(|e| e.to_string()),
            }
        })
        .collect()
}

async fn cmd_plan(
    path: &Path,
    remote: Option<&Path>,
    json: bool,
    config: &OperatorConfig,
) -> Result<()> {
    let manifest = Manifest::from_file(path)
        .with_context(|| format!("Failed to load manifest {}", path.display()))?;
    let remote = Arc::new(load_remote(remote)?);
    let report = plan(manifest, remote, config).await?;

    if json {
        let rendered = serde_json::to_string_pretty(&report).context("Failed to render plan")?;
        println!("{rendered}");
        return Ok(());
    }

    if report.writes.is_empty() {
        println!("No changes. Remote is up to date.");
    } else {
        println!("Remote writes:");
        for call in &report.writes {
            println!("  {call}");
        }
    }
    println!("Statuses:");
    for planned in &report.statuses {
        let value = planned
            .status
            .value
            .map_or_else(|| "-".to_string(), |v| format!("{v:?}").to_lowercase());
        let retry = planned
            .retry_in_secs
            .map(|secs| format!(" (retry in {secs}s)"))
            .unwrap_or_default();
        if planned.status.error.is_empty() {
            println!("  {} {}: {value}{retry}", planned.kind, planned.key);
        } else {
            println!(
                "  {} {}: {value}: {}{retry}",
                planned.kind, planned.key, planned.status.error
            );
        }
    }
    Ok(())
}

/// Run one pass over every declaration against `remote`.
///
/// Kinds are processed in dependency order so that, for example, blob stores
/// exist before the repositories that use them.
///
/// # Errors
///
/// A declaration rejected by admission, or a store failure.
pub async fn plan(
    manifest: Manifest,
    remote: Arc<InMemoryRemote>,
    config: &OperatorConfig,
) -> Result<PlanReport> {
    let resolver = Arc::new(resolver_for(&manifest, &remote));
    let ByKind {
        blob_stores,
        cleanup_policies,
        repositories,
        roles,
        users,
        scripts,
    } = manifest.by_kind();

    let mut statuses = Vec::new();
    statuses.extend(plan_kind(blob_stores, &resolver, config).await?);
    statuses.extend(plan_kind(cleanup_policies, &resolver, config).await?);
    statuses.extend(plan_kind(repositories, &resolver, config).await?);
    statuses.extend(plan_kind(roles, &resolver, config).await?);
    statuses.extend(plan_kind(users, &resolver, config).await?);
    statuses.extend(plan_kind(scripts, &resolver, config).await?);

    Ok(PlanReport {
        writes: remote.writes().await,
        statuses,
    })
}

async fn plan_kind<S: ResourceSpec>(
    declarations: Vec<Declaration<S>>,
    resolver: &Arc<StaticResolver>,
    config: &OperatorConfig,
) -> Result<Vec<PlannedStatus>> {
    if declarations.is_empty() {
        return Ok(Vec::new());
    }
    let store = Arc::new(seed_store(declarations).await?);
    let reconciler = Reconciler::new(store.clone(), resolver.clone(), config.clone());
    let keys = store.list_keys().await.context("Failed to list declarations")?;

    let mut statuses = Vec::new();
    for (key, action) in reconciler.sweep(keys).await {
        let status = store
            .get(&key)
            .await
            .context("Failed to read declaration")?
            .map(|d| d.status)
            .unwrap_or_default();
        statuses.push(PlannedStatus {
            kind: S::KIND,
            key: key.to_string(),
            status,
            retry_in_secs: action.requeue_after.map(|delay| delay.as_secs()),
        });
    }
    statuses.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(statuses)
}

async fn cmd_run(path: &Path, remote: Option<&Path>, config: &OperatorConfig) -> Result<()> {
    let manifest = Manifest::from_file(path)
        .with_context(|| format!("Failed to load manifest {}", path.display()))?;
    let remote = Arc::new(load_remote(remote)?);
    let resolver = Arc::new(resolver_for(&manifest, &remote));
    let ByKind {
        blob_stores,
        cleanup_policies,
        repositories,
        roles,
        users,
        scripts,
    } = manifest.by_kind();

    let mut loops = JoinSet::new();
    let stoppers = vec![
        start_kind(blob_stores, &resolver, config, &mut loops).await?,
        start_kind(cleanup_policies, &resolver, config, &mut loops).await?,
        start_kind(repositories, &resolver, config, &mut loops).await?,
        start_kind(roles, &resolver, config, &mut loops).await?,
        start_kind(users, &resolver, config, &mut loops).await?,
        start_kind(scripts, &resolver, config, &mut loops).await?,
    ];

    info!(loops = loops.len(), "nxo is running. Press Ctrl+C to stop.");
    wait_for_shutdown().await;

    stoppers.iter().flatten().for_each(LoopStopper::stop);
    while let Some(joined) = loops.join_next().await {
        joined.into_option_logged("Reconcile loop task failed");
    }
    info!(
        entities = remote.snapshot().await.len(),
        writes = remote.writes().await.len(),
        "nxo stopped"
    );
    Ok(())
}

async fn start_kind<S: ResourceSpec>(
    declarations: Vec<Declaration<S>>,
    resolver: &Arc<StaticResolver>,
    config: &OperatorConfig,
    loops: &mut JoinSet<()>,
) -> Result<Option<LoopStopper>> {
    if declarations.is_empty() {
        return Ok(None);
    }
    let store = Arc::new(seed_store(declarations).await?);
    let reconcile_loop = ReconcileLoop::new(store, resolver.clone(), config.clone());
    let queued = reconcile_loop
        .enqueue_all()
        .await
        .context("Failed to enqueue declarations")?;
    info!(kind = %S::KIND, queued, "Reconcile loop starting");

    let stopper = reconcile_loop.stopper();
    loops.spawn(reconcile_loop.run());
    Ok(Some(stopper))
}

async fn seed_store<S: ResourceSpec>(declarations: Vec<Declaration<S>>) -> Result<InMemoryStore<S>> {
    let store = InMemoryStore::new();
    for declaration in declarations {
        let key = declaration.key();
        store
            .create(declaration)
            .await
            .with_context(|| format!("{} {key} rejected", S::KIND))?;
    }
    Ok(store)
}

/// Register `remote` under every connection the manifest references.
fn resolver_for(manifest: &Manifest, remote: &Arc<InMemoryRemote>) -> StaticResolver {
    manifest
        .connections()
        .into_iter()
        .fold(StaticResolver::new(), |resolver, name| {
            resolver.with_session(name, remote.clone())
        })
}

fn load_remote(path: Option<&Path>) -> Result<InMemoryRemote> {
    let Some(path) = path else {
        return Ok(InMemoryRemote::new());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read remote snapshot {}", path.display()))?;
    let entries: Vec<SnapshotEntry> = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse remote snapshot {}", path.display()))?;
    Ok(InMemoryRemote::from_snapshot(entries))
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::indexing_slicing)]

    use std::io::Write;

    use nxo_reconciler::{Operation, StatusValue};
    use serde_json::json;

    use super::*;

    const MANIFEST: &str = r"
kind: Repository
metadata:
  name: go-proxy
spec:
  connection:
    name: nexus
  go:
    proxy:
      name: go-proxy
      remoteUrl: https://x
---
kind: BlobStore
metadata:
  name: artifacts
spec:
  connection:
    name: nexus
  name: artifacts
  file:
    path: /nexus-data/blobs/artifacts
";

    #[tokio::test]
    async fn test_plan_against_empty_remote() {
        let manifest = Manifest::parse(MANIFEST).unwrap();
        let remote = Arc::new(InMemoryRemote::new());
        let report = plan(manifest, remote, &OperatorConfig::default()).await.unwrap();

        let writes: Vec<(Operation, ResourceKind)> = report
            .writes
            .iter()
            .map(|call| (call.operation, call.kind))
            .collect();
        assert_eq!(
            writes,
            vec![
                (Operation::Create, ResourceKind::BlobStore),
                (Operation::Create, ResourceKind::Repository),
            ]
        );
        assert!(
            report
                .statuses
                .iter()
                .all(|s| s.status.value == Some(StatusValue::Created))
        );
    }

    #[tokio::test]
    async fn test_plan_against_converged_remote() {
        let manifest = Manifest::parse(MANIFEST).unwrap();
        let first = Arc::new(InMemoryRemote::new());
        plan(manifest.clone(), first.clone(), &OperatorConfig::default())
            .await
            .unwrap();

        let second = Arc::new(InMemoryRemote::from_snapshot(first.snapshot().await));
        let report = plan(manifest, second, &OperatorConfig::default()).await.unwrap();
        assert!(report.writes.is_empty());
    }

    #[test]
    fn test_review_flags_rejections() {
        let previous = Manifest::parse(MANIFEST).unwrap();
        let edited = Manifest::parse(&MANIFEST.replace("file:\n    path", "s3:\n    bucket")).unwrap();
        let verdicts = review(&edited, Some(&previous));
        assert_eq!(verdicts.len(), 2);
        assert_eq!(verdicts[0].rejection, None);
        assert!(verdicts[0].update);
        assert!(
            verdicts[1]
                .rejection
                .as_deref()
                .is_some_and(|reason| reason.contains("backend cannot change"))
        );
    }

    #[tokio::test]
    async fn test_load_remote_snapshot() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let snapshot = json!([
            {"kind": "Script", "key": "hello", "value": {"name": "hello", "content": "1", "type": "groovy"}}
        ]);
        write!(file, "{snapshot}").unwrap();

        let remote = load_remote(Some(file.path())).unwrap();
        assert_eq!(
            remote.stored(ResourceKind::Script, "hello").await,
            Some(json!({"name": "hello", "content": "1", "type": "groovy"}))
        );
        assert!(load_remote(None).is_ok());
    }
}
