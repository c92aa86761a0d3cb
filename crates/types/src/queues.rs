//! Names of the deferred-task queues the engine schedules work on.

/// Queue draining pending rule change sets into the external policy service.
/// Tasks are keyed by blockable id, which serializes commits per blockable.
pub const COMMIT_CHANGES_QUEUE: &str = "commit-changes";

/// Queue retrying post-commit creation of locally-scoped allow rules.
pub const LOCAL_RULES_QUEUE: &str = "local-rules";
