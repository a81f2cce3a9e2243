//! Admission boundary: spec writes are checked here before they are
//! persisted, so invalid specs never reach the reconcile queue.

use tracing::{debug, warn};

use crate::resource::ResourceSpec;
use crate::types::ObjectKey;
use crate::validate::ValidationError;

/// Check a new declaration's spec.
///
/// # Errors
///
/// Returns the violated invariant; the write must be rejected.
pub fn review_create<S: ResourceSpec>(key: &ObjectKey, spec: &S) -> Result<(), ValidationError> {
    spec.validate_create()
        .inspect(|()| debug!(kind = %S::KIND, key = %key, "Admitted create"))
        .inspect_err(|e| warn!(kind = %S::KIND, key = %key, error = %e, "Rejected create"))
}

/// Check a spec change against the currently persisted spec.
///
/// # Errors
///
/// Returns the violated invariant; the write must be rejected.
pub fn review_update<S: ResourceSpec>(
    key: &ObjectKey,
    old: &S,
    new: &S,
) -> Result<(), ValidationError> {
    new.validate_update(old)
        .inspect(|()| debug!(kind = %S::KIND, key = %key, "Admitted update"))
        .inspect_err(|e| warn!(kind = %S::KIND, key = %key, error = %e, "Rejected update"))
}
