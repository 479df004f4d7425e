//! Windex Store - versioned history of a watched directory
//!
//! Every relevant change is committed into a history kept outside the
//! watched tree. The history is mirrored once at creation and then
//! periodically into timestamped snapshots, of which a bounded number
//! is kept.
//!
//! The store drives an external tool through [`RevisionBackend`];
//! [`GitCli`] is the production implementation.

mod backend;
mod error;
pub mod rotation;
mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use backend::{CommitOutcome, GitCli, RevisionBackend, COMMITTER_EMAIL, COMMITTER_NAME};
pub use error::{Result, StoreError};
pub use rotation::{RetentionPlan, Snapshot};
pub use store::{BackupOutcome, RevisionStore, StoreLayout, DEFAULT_BACKUP_THRESHOLD};
