//! Stored scripts.

use serde::{Deserialize, Serialize};

use crate::resource::{ResourceKind, ResourceSpec};
use crate::types::ConnectionRef;
use crate::validate::{require_non_blank, ValidationError};

/// Desired state of a stored script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptSpec {
    pub connection: ConnectionRef,
    pub name: String,
    pub content: String,
    #[serde(rename = "type", default = "default_script_type")]
    pub script_type: String,
}

fn default_script_type() -> String {
    "groovy".to_string()
}

impl ResourceSpec for ScriptSpec {
    const KIND: ResourceKind = ResourceKind::Script;

    fn connection(&self) -> &ConnectionRef {
        &self.connection
    }

    fn remote_key(&self) -> Result<String, ValidationError> {
        require_non_blank("name", &self.name)?;
        Ok(self.name.clone())
    }

    fn validate_create(&self) -> Result<(), ValidationError> {
        require_non_blank("name", &self.name)?;
        require_non_blank("content", &self.content)
    }
}
