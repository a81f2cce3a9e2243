//! Entity kinds and the trait every managed spec implements.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::handler::{DeleteEntity, EnsureEntity, HandlerChain};
use crate::types::ConnectionRef;
use crate::validate::ValidationError;

/// Kinds of entity held by the remote repository manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    User,
    Role,
    Repository,
    BlobStore,
    /// Soft quota attached to a blob store. Remote-only, never declared.
    BlobStoreQuota,
    CleanupPolicy,
    Script,
}

impl ResourceKind {
    /// Dotted paths of fields the remote accepts but never returns.
    ///
    /// They are left out of the convergence diff, otherwise every pass would
    /// see a difference and issue an update.
    pub const fn write_only_fields(self) -> &'static [&'static str] {
        match self {
            Self::User => &["password"],
            Self::Repository => &["httpAuth.password", "signingKeypair", "signingPassphrase"],
            Self::BlobStore => &["s3.secretAccessKey"],
            Self::Role | Self::BlobStoreQuota | Self::CleanupPolicy | Self::Script => &[],
        }
    }

    /// Short lowercase label used in logs and snapshots.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Role => "role",
            Self::Repository => "repository",
            Self::BlobStore => "blobstore",
            Self::BlobStoreQuota => "blobstore-quota",
            Self::CleanupPolicy => "cleanup-policy",
            Self::Script => "script",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-authored spec the engine can converge.
///
/// One implementation per entity kind; the engine itself is generic over it.
pub trait ResourceSpec:
    fmt::Debug + Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Remote kind this spec maps onto.
    const KIND: ResourceKind;

    /// Connection supplying the remote session.
    fn connection(&self) -> &ConnectionRef;

    /// Natural key of the entity in the remote system.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the key cannot be derived, e.g. for a
    /// polymorphic spec that has no single populated slot.
    fn remote_key(&self) -> std::result::Result<String, ValidationError>;

    /// Full desired projection sent on create and update.
    ///
    /// # Errors
    ///
    /// Returns an error if the spec is invalid or cannot be serialized.
    fn desired_state(&self) -> Result<Value> {
        project(self)
    }

    /// Admission check for a new declaration.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    fn validate_create(&self) -> std::result::Result<(), ValidationError> {
        Ok(())
    }

    /// Admission check for a spec change.
    ///
    /// The default re-runs [`ResourceSpec::validate_create`] and rejects a
    /// change of the remote natural key.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    fn validate_update(&self, old: &Self) -> std::result::Result<(), ValidationError> {
        self.validate_create()?;
        let (old_key, new_key) = (old.remote_key()?, self.remote_key()?);
        crate::validate::require_same_key("name", &old_key, &new_key)
    }

    /// Steps run on every pass of a live declaration.
    fn apply_chain() -> HandlerChain<Self> {
        HandlerChain::new().then(EnsureEntity)
    }

    /// Steps run once deletion is requested.
    fn delete_chain() -> HandlerChain<Self> {
        HandlerChain::new().then(DeleteEntity)
    }
}

/// Serialize a spec into its remote projection, dropping the connection ref.
///
/// # Errors
///
/// Returns [`Error::Projection`] if serialization fails or does not yield an
/// object.
pub fn project<S: Serialize>(spec: &S) -> Result<Value> {
    let mut value = serde_json::to_value(spec).map_err(|e| Error::projection(e.to_string()))?;
    let Some(object) = value.as_object_mut() else {
        return Err(Error::projection("spec did not serialize to an object"));
    };
    object.remove("connection");
    Ok(value)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use serde_json::json;

    use super::*;

    #[derive(Serialize)]
    struct Sample {
        connection: ConnectionRef,
        name: String,
    }

    #[test]
    fn test_project_drops_connection() {
        let value = project(&Sample {
            connection: ConnectionRef::named("nexus"),
            name: "thing".into(),
        })
        .unwrap();
        assert_eq!(value, json!({"name": "thing"}));
    }

    #[test]
    fn test_project_rejects_non_object() {
        assert!(matches!(project(&42), Err(Error::Projection { .. })));
    }

    #[test]
    fn test_write_only_fields() {
        assert_eq!(ResourceKind::User.write_only_fields(), &["password"]);
        assert!(ResourceKind::Script.write_only_fields().is_empty());
    }
}
