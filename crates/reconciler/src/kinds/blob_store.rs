//! Blob stores and their soft quota.
//!
//! The backend (`file` or `s3`) follows the same one-of rule as repository
//! formats: exactly one, fixed at creation. The soft quota is converged as a
//! separate remote sub-resource by [`EnsureQuota`] and removed ahead of the
//! store itself by [`DeleteQuota`].

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::handler::{DeleteEntity, EnsureEntity, Handler, HandlerChain, PassContext};
use crate::resource::{project, ResourceKind, ResourceSpec};
use crate::types::ConnectionRef;
use crate::validate::{cardinality, describe, require_non_blank, require_same_key, Cardinality, ValidationError};

/// Local filesystem backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileBackend {
    pub path: String,
}

/// S3 backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Backend {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    /// Write-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// What a soft quota measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QuotaType {
    SpaceRemainingQuota,
    SpaceUsedQuota,
}

/// Soft quota on a blob store. Limit in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoftQuota {
    #[serde(rename = "type")]
    pub quota_type: QuotaType,
    pub limit: u64,
}

/// Desired state of a blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobStoreSpec {
    pub connection: ConnectionRef,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileBackend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Backend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_quota: Option<SoftQuota>,
}

impl BlobStoreSpec {
    fn backends(&self) -> BTreeSet<&'static str> {
        [("file", self.file.is_some()), ("s3", self.s3.is_some())]
            .into_iter()
            .filter_map(|(name, set)| set.then_some(name))
            .collect()
    }

    /// The single configured backend.
    ///
    /// # Errors
    ///
    /// `NoBackend` or `MultipleBackends`.
    pub fn backend(&self) -> std::result::Result<&'static str, ValidationError> {
        match cardinality(&self.backends()) {
            Cardinality::One(backend) => Ok(backend),
            Cardinality::None => Err(ValidationError::NoBackend),
            Cardinality::Many(many) => Err(ValidationError::MultipleBackends {
                backends: describe(many),
            }),
        }
    }
}

impl ResourceSpec for BlobStoreSpec {
    const KIND: ResourceKind = ResourceKind::BlobStore;

    fn connection(&self) -> &ConnectionRef {
        &self.connection
    }

    fn remote_key(&self) -> std::result::Result<String, ValidationError> {
        require_non_blank("name", &self.name)?;
        Ok(self.name.clone())
    }

    /// Backend settings plus a `type` tag. The quota is left to [`EnsureQuota`].
    fn desired_state(&self) -> Result<Value> {
        let backend = self.backend()?;
        let mut value = project(self)?;
        if let Some(object) = value.as_object_mut() {
            object.remove("softQuota");
            object.insert("type".into(), Value::from(backend));
        }
        Ok(value)
    }

    fn validate_create(&self) -> std::result::Result<(), ValidationError> {
        require_non_blank("name", &self.name)?;
        if let Some(s3) = &self.s3 {
            require_non_blank("s3.bucket", &s3.bucket)?;
        }
        if let Some(file) = &self.file {
            require_non_blank("file.path", &file.path)?;
        }
        self.backend().map(|_| ())
    }

    fn validate_update(&self, old: &Self) -> std::result::Result<(), ValidationError> {
        self.validate_create()?;
        let (from, to) = (old.backend()?, self.backend()?);
        if from != to {
            return Err(ValidationError::BackendImmutable {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        require_same_key("name", &old.name, &self.name)
    }

    fn apply_chain() -> HandlerChain<Self> {
        HandlerChain::new().then(EnsureEntity).then(EnsureQuota)
    }

    fn delete_chain() -> HandlerChain<Self> {
        HandlerChain::new().then(DeleteQuota).then(DeleteEntity)
    }
}

/// Converge the soft quota of a blob store, or remove it when none is declared.
pub struct EnsureQuota;

#[async_trait]
impl Handler<BlobStoreSpec> for EnsureQuota {
    fn name(&self) -> &'static str {
        "ensure-quota"
    }

    async fn handle(&self, ctx: &PassContext<'_, BlobStoreSpec>) -> Result<()> {
        let spec = &ctx.declaration.spec;
        let key = spec.remote_key()?;
        match &spec.soft_quota {
            Some(quota) => {
                let desired =
                    serde_json::to_value(quota).map_err(|e| Error::projection(e.to_string()))?;
                ctx.engine()
                    .converge(ResourceKind::BlobStoreQuota, &key, &desired)
                    .await?;
            }
            None => {
                if ctx.session.fetch(ResourceKind::BlobStoreQuota, &key).await?.is_some() {
                    ctx.engine().remove(ResourceKind::BlobStoreQuota, &key).await?;
                } else {
                    debug!(key = %key, "No quota declared or present");
                }
            }
        }
        Ok(())
    }
}

/// Remove the soft quota of a deleted blob store; absence counts as success.
pub struct DeleteQuota;

#[async_trait]
impl Handler<BlobStoreSpec> for DeleteQuota {
    fn name(&self) -> &'static str {
        "delete-quota"
    }

    async fn handle(&self, ctx: &PassContext<'_, BlobStoreSpec>) -> Result<()> {
        let key = ctx.declaration.spec.remote_key()?;
        ctx.engine().remove(ResourceKind::BlobStoreQuota, &key).await?;
        Ok(())
    }
}
