//! Get-or-create-or-update convergence of a single remote entity.

use serde_json::Value;
use tracing::{debug, info};

use crate::diff::field_diff;
use crate::error::Result;
use crate::remote::BoundSession;
use crate::resource::ResourceKind;

/// What a convergence call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergeOutcome {
    /// The entity was absent and has been created.
    Created,
    /// The entity drifted on these fields and has been replaced.
    Updated { fields: Vec<String> },
    /// Already converged; no write issued.
    Unchanged,
}

/// What a removal call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Deleted,
    AlreadyAbsent,
}

/// Converges remote entities through a bound session.
///
/// Issues at most one write per call, and none when the remote already
/// matches. Any failure aborts the call; the next pass repeats it from the
/// fetch.
pub struct ConvergenceEngine<'a> {
    session: &'a BoundSession,
}

impl<'a> ConvergenceEngine<'a> {
    /// Create an engine over a session.
    pub const fn new(session: &'a BoundSession) -> Self {
        Self { session }
    }

    /// Bring the entity `kind`/`key` in line with `desired`.
    ///
    /// Creation always sends the full desired state. An update is sent only
    /// when the field diff is non-empty and also carries the full desired
    /// state, never a patch.
    ///
    /// # Errors
    ///
    /// Fails on any remote error other than "not found" on fetch.
    pub async fn converge(&self, kind: ResourceKind, key: &str, desired: &Value) -> Result<ConvergeOutcome> {
        let Some(actual) = self.session.fetch(kind, key).await? else {
            self.session.create(kind, key, desired).await?;
            info!(%kind, key, "Created remote entity");
            return Ok(ConvergeOutcome::Created);
        };

        let fields = field_diff(desired, &actual, kind.write_only_fields());
        if fields.is_empty() {
            debug!(%kind, key, "Remote entity already converged");
            return Ok(ConvergeOutcome::Unchanged);
        }

        self.session.update(kind, key, desired).await?;
        info!(%kind, key, fields = ?fields, "Updated remote entity");
        Ok(ConvergeOutcome::Updated { fields })
    }

    /// Delete the entity `kind`/`key`; absence counts as success.
    ///
    /// # Errors
    ///
    /// Fails on any remote error other than "not found".
    pub async fn remove(&self, kind: ResourceKind, key: &str) -> Result<RemoveOutcome> {
        if self.session.delete(kind, key).await? {
            info!(%kind, key, "Deleted remote entity");
            Ok(RemoveOutcome::Deleted)
        } else {
            debug!(%kind, key, "Remote entity already absent");
            Ok(RemoveOutcome::AlreadyAbsent)
        }
    }
}
