//! Cleanup policies.

use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::repository::RepositoryFormat;
use crate::resource::{ResourceKind, ResourceSpec};
use crate::types::ConnectionRef;
use crate::validate::{require_non_blank, ValidationError};

/// Format value meaning "every format".
pub const ALL_FORMATS: &str = "all";

/// Which component versions a policy matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseType {
    Releases,
    Prereleases,
}

/// Match criteria. A component is removed when it matches all set criteria.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_blob_updated_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_downloaded_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_type: Option<ReleaseType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_regex: Option<String>,
}

impl CleanupCriteria {
    fn is_empty(&self) -> bool {
        self.last_blob_updated_days.is_none()
            && self.last_downloaded_days.is_none()
            && self.release_type.is_none()
            && self.asset_regex.is_none()
    }
}

/// Desired state of a cleanup policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupPolicySpec {
    pub connection: ConnectionRef,
    pub name: String,
    #[serde(default)]
    pub notes: String,
    /// A repository format, or `all`.
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub criteria: CleanupCriteria,
}

fn default_format() -> String {
    ALL_FORMATS.to_string()
}

impl ResourceSpec for CleanupPolicySpec {
    const KIND: ResourceKind = ResourceKind::CleanupPolicy;

    fn connection(&self) -> &ConnectionRef {
        &self.connection
    }

    fn remote_key(&self) -> Result<String, ValidationError> {
        require_non_blank("name", &self.name)?;
        Ok(self.name.clone())
    }

    fn validate_create(&self) -> Result<(), ValidationError> {
        require_non_blank("name", &self.name)?;
        if self.format != ALL_FORMATS {
            RepositoryFormat::from_str(&self.format)
                .map_err(|reason| ValidationError::invalid_field("format", reason))?;
        }
        if self.criteria.is_empty() {
            return Err(ValidationError::invalid_field(
                "criteria",
                "at least one criterion must be set",
            ));
        }
        if let Some(pattern) = &self.criteria.asset_regex {
            Regex::new(pattern)
                .map_err(|e| ValidationError::invalid_field("criteria.assetRegex", e.to_string()))?;
        }
        Ok(())
    }
}
