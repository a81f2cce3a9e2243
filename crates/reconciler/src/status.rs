//! Status write-back with suppression of no-op writes.
//!
//! Every status write re-triggers the declaration's watch, so writing an
//! unchanged status would make the engine loop on itself.

use tracing::debug;

use crate::error::{Error, Result};
use crate::resource::ResourceSpec;
use crate::store::DeclarationStore;
use crate::types::{Declaration, Status};

/// Status a pass should leave behind for a given outcome.
pub fn status_for(outcome: &Result<()>) -> Option<Status> {
    match outcome {
        Ok(()) => Some(Status::created()),
        Err(e) if e.reflects_in_status() => Some(Status::error(e.to_string())),
        Err(_) => None,
    }
}

/// Write `status` only if it differs from the declaration's current status.
///
/// Returns the declaration as now persisted, and whether a write happened.
///
/// # Errors
///
/// Store failures, including a conflict.
pub async fn apply_status<S: ResourceSpec>(
    store: &dyn DeclarationStore<S>,
    declaration: &Declaration<S>,
    status: Status,
) -> Result<(Declaration<S>, bool)> {
    if declaration.status == status {
        debug!(kind = %S::KIND, key = %declaration.key(), "Status unchanged, skipping write");
        return Ok((declaration.clone(), false));
    }

    let mut next = declaration.clone();
    next.status = status;
    let stored = store.update_status(&next).await.map_err(Error::from)?;
    debug!(
        kind = %S::KIND,
        key = %declaration.key(),
        value = ?stored.status.value,
        "Status written"
    );
    Ok((stored, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteError;
    use crate::types::StatusValue;

    #[test]
    fn test_status_for_outcomes() {
        assert_eq!(status_for(&Ok(())), Some(Status::created()));

        let remote = Err(Error::remote("update", "k", RemoteError::unavailable("503")));
        let status = status_for(&remote);
        assert_eq!(status.as_ref().and_then(|s| s.value), Some(StatusValue::Error));
        assert!(status.is_some_and(|s| s.error.contains("503")));

        assert_eq!(status_for(&Err(Error::resolution("nexus", "down"))), None);
    }
}
