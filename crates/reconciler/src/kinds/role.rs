//! Roles.

use serde::{Deserialize, Serialize};

use crate::resource::{ResourceKind, ResourceSpec};
use crate::types::ConnectionRef;
use crate::validate::{require_non_blank, ValidationError};

/// Desired state of a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleSpec {
    pub connection: ConnectionRef,
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub privileges: Vec<String>,
    /// Contained roles.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl ResourceSpec for RoleSpec {
    const KIND: ResourceKind = ResourceKind::Role;

    fn connection(&self) -> &ConnectionRef {
        &self.connection
    }

    fn remote_key(&self) -> Result<String, ValidationError> {
        require_non_blank("id", &self.id)?;
        Ok(self.id.clone())
    }

    fn validate_create(&self) -> Result<(), ValidationError> {
        require_non_blank("id", &self.id)?;
        require_non_blank("name", &self.name)?;
        if self.roles.contains(&self.id) {
            return Err(ValidationError::invalid_field(
                "roles",
                "a role cannot contain itself",
            ));
        }
        Ok(())
    }
}
