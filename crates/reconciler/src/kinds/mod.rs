//! Concrete entity kinds.

pub mod blob_store;
pub mod cleanup_policy;
pub mod repository;
pub mod role;
pub mod script;
pub mod user;

pub use blob_store::{BlobStoreSpec, DeleteQuota, EnsureQuota, FileBackend, S3Backend, SoftQuota};
pub use cleanup_policy::{CleanupCriteria, CleanupPolicySpec, ReleaseType};
pub use repository::{RepositoryFormat, RepositorySpec, RepositoryType, Selection};
pub use role::RoleSpec;
pub use script::ScriptSpec;
pub use user::{UserSpec, UserStatus};
