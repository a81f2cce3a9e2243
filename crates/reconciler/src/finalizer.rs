//! Deletion gating through a finalizer mark.
//!
//! ```text
//! NoFinalizer --first pass--> Finalized --delete requested--> Deleting --cleanup ok--> Removed
//! ```
//!
//! The mark is persisted before the first remote write, so any declaration
//! that ever produced a remote entity is held back from removal until its
//! delete chain succeeds.

use tracing::info;

use crate::error::Result;
use crate::resource::ResourceSpec;
use crate::store::DeclarationStore;
use crate::types::{Declaration, ObjectMeta};

/// Lifecycle position of a declaration with respect to one finalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizerState {
    /// Live, not yet marked.
    NoFinalizer,
    /// Live and marked.
    Finalized,
    /// Deletion requested, remote cleanup pending.
    Deleting,
    /// Deletion requested and nothing left to clean up.
    Removed,
}

impl FinalizerState {
    /// Classify metadata against the finalizer token.
    pub fn of(meta: &ObjectMeta, finalizer: &str) -> Self {
        match (meta.is_deleting(), meta.has_finalizer(finalizer)) {
            (false, false) => Self::NoFinalizer,
            (false, true) => Self::Finalized,
            (true, true) => Self::Deleting,
            (true, false) => Self::Removed,
        }
    }
}

/// Adds and releases the finalizer mark through the store.
pub struct FinalizerLifecycle<'a, S: ResourceSpec> {
    store: &'a dyn DeclarationStore<S>,
    finalizer: &'a str,
}

impl<'a, S: ResourceSpec> FinalizerLifecycle<'a, S> {
    /// Create a lifecycle helper.
    pub const fn new(store: &'a dyn DeclarationStore<S>, finalizer: &'a str) -> Self {
        Self { store, finalizer }
    }

    /// Current state of a declaration.
    pub fn state(&self, declaration: &Declaration<S>) -> FinalizerState {
        FinalizerState::of(&declaration.metadata, self.finalizer)
    }

    /// Make sure the mark is persisted, returning the up-to-date declaration.
    ///
    /// # Errors
    ///
    /// Store failures, including a conflict when the declaration changed
    /// since it was read.
    pub async fn ensure_marked(&self, declaration: Declaration<S>) -> Result<Declaration<S>> {
        if declaration.metadata.has_finalizer(self.finalizer) {
            return Ok(declaration);
        }
        let mut marked = declaration;
        marked.metadata.add_finalizer(self.finalizer);
        let key = marked.key();
        let stored = self.store.update(&marked).await?;
        info!(kind = %S::KIND, key = %key, finalizer = self.finalizer, "Added finalizer");
        Ok(stored.unwrap_or(marked))
    }

    /// Drop the mark once remote cleanup succeeded.
    ///
    /// # Errors
    ///
    /// Store failures, including a conflict.
    pub async fn release(&self, declaration: &Declaration<S>) -> Result<()> {
        let mut released = declaration.clone();
        if !released.metadata.remove_finalizer(self.finalizer) {
            return Ok(());
        }
        let removed = self.store.update(&released).await?.is_none();
        info!(
            kind = %S::KIND,
            key = %declaration.key(),
            removed,
            "Released finalizer"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_table() {
        let mut meta = ObjectMeta::new("default", "x");
        assert_eq!(FinalizerState::of(&meta, "f"), FinalizerState::NoFinalizer);
        meta.add_finalizer("f");
        assert_eq!(FinalizerState::of(&meta, "f"), FinalizerState::Finalized);
        meta.deletion_requested_at = Some(chrono::Utc::now());
        assert_eq!(FinalizerState::of(&meta, "f"), FinalizerState::Deleting);
        meta.remove_finalizer("f");
        assert_eq!(FinalizerState::of(&meta, "f"), FinalizerState::Removed);
    }

    #[test]
    fn test_foreign_finalizer_does_not_count() {
        let mut meta = ObjectMeta::new("default", "x");
        meta.add_finalizer("someone-else/finalizer");
        assert_eq!(FinalizerState::of(&meta, "f"), FinalizerState::NoFinalizer);
    }
}
