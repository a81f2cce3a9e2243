//! Multi-document YAML manifests of declarations.

use std::collections::HashSet;
use std::path::Path;

use nxo_core::{Error, Result};
use nxo_reconciler::admission;
use nxo_reconciler::kinds::{
    BlobStoreSpec, CleanupPolicySpec, RepositorySpec, RoleSpec, ScriptSpec, UserSpec,
};
use nxo_reconciler::{Declaration, ObjectKey, ResourceKind, ValidationError};
use serde::Deserialize;

/// One manifest document, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind")]
pub enum Document {
    User(Declaration<UserSpec>),
    Role(Declaration<RoleSpec>),
    Repository(Declaration<RepositorySpec>),
    BlobStore(Declaration<BlobStoreSpec>),
    CleanupPolicy(Declaration<CleanupPolicySpec>),
    Script(Declaration<ScriptSpec>),
}

impl Document {
    /// Entity kind of the declaration.
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::User(_) => ResourceKind::User,
            Self::Role(_) => ResourceKind::Role,
            Self::Repository(_) => ResourceKind::Repository,
            Self::BlobStore(_) => ResourceKind::BlobStore,
            Self::CleanupPolicy(_) => ResourceKind::CleanupPolicy,
            Self::Script(_) => ResourceKind::Script,
        }
    }

    /// Store key of the declaration.
    pub fn key(&self) -> ObjectKey {
        match self {
            Self::User(d) => d.key(),
            Self::Role(d) => d.key(),
            Self::Repository(d) => d.key(),
            Self::BlobStore(d) => d.key(),
            Self::CleanupPolicy(d) => d.key(),
            Self::Script(d) => d.key(),
        }
    }

    /// Name of the connection the declaration points at.
    pub fn connection(&self) -> &str {
        match self {
            Self::User(d) => &d.spec.connection.name,
            Self::Role(d) => &d.spec.connection.name,
            Self::Repository(d) => &d.spec.connection.name,
            Self::BlobStore(d) => &d.spec.connection.name,
            Self::CleanupPolicy(d) => &d.spec.connection.name,
            Self::Script(d) => &d.spec.connection.name,
        }
    }

    /// Run admission as a create.
    ///
    /// # Errors
    ///
    /// The violated invariant.
    pub fn review_create(&self) -> std::result::Result<(), ValidationError> {
        let key = self.key();
        match self {
            Self::User(d) => admission::review_create(&key, &d.spec),
            Self::Role(d) => admission::review_create(&key, &d.spec),
            Self::Repository(d) => admission::review_create(&key, &d.spec),
            Self::BlobStore(d) => admission::review_create(&key, &d.spec),
            Self::CleanupPolicy(d) => admission::review_create(&key, &d.spec),
            Self::Script(d) => admission::review_create(&key, &d.spec),
        }
    }

    /// Run admission as an update of `previous`, which must be the same
    /// kind and key.
    ///
    /// # Errors
    ///
    /// The violated invariant.
    pub fn review_update(&self, previous: &Self) -> std::result::Result<(), ValidationError> {
        let key = self.key();
        match (previous, self) {
            (Self::User(old), Self::User(new)) => admission::review_update(&key, &old.spec, &new.spec),
            (Self::Role(old), Self::Role(new)) => admission::review_update(&key, &old.spec, &new.spec),
            (Self::Repository(old), Self::Repository(new)) => {
                admission::review_update(&key, &old.spec, &new.spec)
            }
            (Self::BlobStore(old), Self::BlobStore(new)) => {
                admission::review_update(&key, &old.spec, &new.spec)
            }
            (Self::CleanupPolicy(old), Self::CleanupPolicy(new)) => {
                admission::review_update(&key, &old.spec, &new.spec)
            }
            (Self::Script(old), Self::Script(new)) => {
                admission::review_update(&key, &old.spec, &new.spec)
            }
            _ => Err(ValidationError::invalid_field(
                "kind",
                format!("cannot change from {} to {}", previous.kind(), self.kind()),
            )),
        }
    }
}

/// Parsed manifest, documents in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    pub documents: Vec<Document>,
}

/// Declarations of a manifest grouped by kind.
#[derive(Debug, Default)]
pub struct ByKind {
    pub blob_stores: Vec<Declaration<BlobStoreSpec>>,
    pub cleanup_policies: Vec<Declaration<CleanupPolicySpec>>,
    pub repositories: Vec<Declaration<RepositorySpec>>,
    pub roles: Vec<Declaration<RoleSpec>>,
    pub users: Vec<Declaration<UserSpec>>,
    pub scripts: Vec<Declaration<ScriptSpec>>,
}

impl Manifest {
    /// Read and parse a manifest file.
    ///
    /// # Errors
    ///
    /// Unreadable file, malformed YAML, or a duplicated kind and key.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
        Self::parse(&text)
    }

    /// Parse manifest text. Empty documents are skipped.
    ///
    /// # Errors
    ///
    /// Malformed YAML, or a duplicated kind and key.
    pub fn parse(text: &str) -> Result<Self> {
        let mut documents = Vec::new();
        let mut seen = HashSet::new();
        for (index, raw) in serde_yaml::Deserializer::from_str(text).enumerate() {
            let value = serde_yaml::Value::deserialize(raw)
                .map_err(|e| Error::yaml_parse_failed(format!("document {index}: {e}")))?;
            if value.is_null() {
                continue;
            }
            let document: Document = serde_yaml::from_value(value)
                .map_err(|e| Error::yaml_parse_failed(format!("document {index}: {e}")))?;
            if !seen.insert((document.kind(), document.key())) {
                return Err(Error::invalid_manifest(format!(
                    "{} '{}' is declared more than once",
                    document.kind(),
                    document.key()
                )));
            }
            documents.push(document);
        }
        Ok(Self { documents })
    }

    /// The document with the same kind and key as `document`, if any.
    pub fn find(&self, document: &Document) -> Option<&Document> {
        let (kind, key) = (document.kind(), document.key());
        self.documents
            .iter()
            .find(|d| d.kind() == kind && d.key() == key)
    }

    /// Distinct connection names referenced by the manifest.
    pub fn connections(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .documents
            .iter()
            .map(|d| d.connection().to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Split the documents by kind.
    pub fn by_kind(self) -> ByKind {
        self.documents
            .into_iter()
            .fold(ByKind::default(), |mut groups, document| {
                match document {
                    Document::BlobStore(d) => groups.blob_stores.push(d),
                    Document::CleanupPolicy(d) => groups.cleanup_policies.push(d),
                    Document::Repository(d) => groups.repositories.push(d),
                    Document::Role(d) => groups.roles.push(d),
                    Document::User(d) => groups.users.push(d),
                    Document::Script(d) => groups.scripts.push(d),
                }
                groups
            })
    }
}
