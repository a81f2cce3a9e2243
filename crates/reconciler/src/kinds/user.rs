//! Users.

use serde::{Deserialize, Serialize};

use crate::resource::{ResourceKind, ResourceSpec};
use crate::types::ConnectionRef;
use crate::validate::{require_non_blank, ValidationError};

/// Account state of a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Disabled,
}

/// Desired state of a local user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    pub connection: ConnectionRef,
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email_address: String,
    /// Write-only: sent on create and update, never returned by the remote.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub status: UserStatus,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl ResourceSpec for UserSpec {
    const KIND: ResourceKind = ResourceKind::User;

    fn connection(&self) -> &ConnectionRef {
        &self.connection
    }

    fn remote_key(&self) -> Result<String, ValidationError> {
        require_non_blank("userId", &self.user_id)?;
        Ok(self.user_id.clone())
    }

    fn validate_create(&self) -> Result<(), ValidationError> {
        require_non_blank("userId", &self.user_id)?;
        if !self.email_address.contains('@') {
            return Err(ValidationError::invalid_field(
                "emailAddress",
                format!("'{}' is not an email address", self.email_address),
            ));
        }
        Ok(())
    }
}
