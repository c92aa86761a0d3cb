#![forbid(unsafe_code)]

//! The Windows change-set committer.
//!
//! Rule mutations on the Windows pipeline do not take effect when written;
//! they sit in durable [`RuleChangeSet`] batches until this worker reconciles
//! them against the external policy service's REST API. Commits for one
//! blockable are serialized by the task queue's per-key lanes; the
//! `is_committed` flag on each rule makes redelivery harmless.
//!
//! [`RuleChangeSet`]: quorum_types::model::RuleChangeSet

pub mod api;
pub mod change_set;

pub use api::{PolicyApi, RestPolicyApi};
pub use change_set::{ChangeSetCommitter, CommitChangesHandler};
