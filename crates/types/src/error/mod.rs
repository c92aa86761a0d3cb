//! Core error types for the Quorum policy engine.

use crate::model::{BlockableState, Platform};
use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Errors from the entity store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The requested entity does not exist.
    #[error("Entity not found")]
    NotFound,
    /// A transaction lost an optimistic-concurrency race and exhausted its
    /// retry budget.
    #[error("Transaction contention persisted past {attempts} attempts")]
    Contention {
        /// How many attempts were made before giving up.
        attempts: u32,
    },
    /// A transaction touched more entity groups than the store permits.
    #[error("Transaction touched {got} entity groups (limit {limit})")]
    TooManyGroups {
        /// The configured cross-group limit.
        limit: usize,
        /// How many distinct groups the transaction touched.
        got: usize,
    },
    /// A stored value failed canonical decoding.
    #[error("Decode error: {0}")]
    Decode(String),
    /// An error in the storage backend.
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl ErrorCode for StoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "STORE_NOT_FOUND",
            Self::Contention { .. } => "STORE_CONTENTION",
            Self::TooManyGroups { .. } => "STORE_TOO_MANY_GROUPS",
            Self::Decode(_) => "STORE_DECODE_ERROR",
            Self::Backend(_) => "STORE_BACKEND_ERROR",
        }
    }
}

/// Why voting on a blockable is currently not permitted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProhibitedReason {
    /// The blockable's state disables voting for everyone.
    #[error("Voting is prohibited in state {0}")]
    ProhibitedState(BlockableState),
    /// The blockable is only votable by admins right now.
    #[error("Voting on this blockable is restricted to admins")]
    AdminOnly,
    /// The voter lacks the capability to cast votes.
    #[error("The user does not have permission to vote")]
    InsufficientPermission,
    /// A member of the package is flagged or has a flagged certificate.
    #[error("Package member {0} is flagged")]
    FlaggedMember(String),
    /// Packages cannot be voted against.
    #[error("Downvoting is not supported for packages")]
    DownvoteUnsupported,
    /// Packages cannot be reset.
    #[error("Resetting is not supported for packages")]
    ResetUnsupported,
}

/// Errors surfaced by the voting entry points (`Vote`, `Recount`, `Reset`).
#[derive(Error, Debug)]
pub enum VoteError {
    /// The target id does not correspond to a known blockable.
    #[error("No blockable found for id {0}")]
    BlockableNotFound(String),
    /// The voter id does not correspond to a known user.
    #[error("No user found for id {0}")]
    UserNotFound(String),
    /// The blockable belongs to a platform this deployment does not manage.
    #[error("Unsupported platform for blockable {0}")]
    UnsupportedPlatform(String),
    /// The supplied vote weight is negative.
    #[error("Invalid vote weight {0}")]
    InvalidWeight(i64),
    /// The voter has already cast a vote of the same polarity.
    #[error("User {user} has already cast this vote for blockable {blockable}")]
    DuplicateVote {
        /// The voting user.
        user: String,
        /// The target blockable.
        blockable: String,
    },
    /// The operation is not permitted on this blockable right now.
    #[error("Operation not allowed: {0}")]
    NotAllowed(#[from] ProhibitedReason),
    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for VoteError {
    fn code(&self) -> &'static str {
        match self {
            Self::BlockableNotFound(_) => "VOTE_BLOCKABLE_NOT_FOUND",
            Self::UserNotFound(_) => "VOTE_USER_NOT_FOUND",
            Self::UnsupportedPlatform(_) => "VOTE_UNSUPPORTED_PLATFORM",
            Self::InvalidWeight(_) => "VOTE_INVALID_WEIGHT",
            Self::DuplicateVote { .. } => "VOTE_DUPLICATE",
            Self::NotAllowed(_) => "VOTE_NOT_ALLOWED",
            Self::Store(e) => e.code(),
        }
    }
}

/// Errors surfaced by `SetInstallerPolicy`.
#[derive(Error, Debug)]
pub enum InstallerError {
    /// The target id does not correspond to a known blockable.
    #[error("No blockable found for id {0}")]
    BlockableNotFound(String),
    /// Installer policy only exists on the Windows pipeline.
    #[error("Installer policy is not supported on {0}")]
    BadPlatform(Platform),
    /// Installer policy only applies to binaries.
    #[error("Blockable {0} is not a binary")]
    NotBinary(String),
    /// The supplied policy is not an installer policy.
    #[error("{0} is not an installer policy")]
    NotInstallerPolicy(String),
    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for InstallerError {
    fn code(&self) -> &'static str {
        match self {
            Self::BlockableNotFound(_) => "INSTALLER_BLOCKABLE_NOT_FOUND",
            Self::BadPlatform(_) => "INSTALLER_BAD_PLATFORM",
            Self::NotBinary(_) => "INSTALLER_NOT_BINARY",
            Self::NotInstallerPolicy(_) => "INSTALLER_NOT_INSTALLER_POLICY",
            Self::Store(e) => e.code(),
        }
    }
}

/// Errors raised by deferred-task handlers, steering the runner's retry
/// behavior.
#[derive(Error, Debug)]
pub enum TaskError {
    /// A transient failure; the runner re-delivers with exponential backoff.
    #[error("Transient task failure: {0}")]
    Retry(String),
    /// A permanent failure; the runner logs and drops the task.
    #[error("Permanent task failure: {0}")]
    Permanent(String),
    /// The queue has shut down and can accept no more work.
    #[error("Task queue {0} is closed")]
    QueueClosed(String),
}

impl ErrorCode for TaskError {
    fn code(&self) -> &'static str {
        match self {
            Self::Retry(_) => "TASK_RETRY",
            Self::Permanent(_) => "TASK_PERMANENT_FAILURE",
            Self::QueueClosed(_) => "TASK_QUEUE_CLOSED",
        }
    }
}

/// Errors from the external policy service's REST API.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The request failed in a way worth retrying (timeouts, 5xx, 429).
    #[error("Transient API failure (status {status:?}): {message}")]
    Transient {
        /// The HTTP status, when one was received.
        status: Option<u16>,
        /// Human-readable failure detail.
        message: String,
    },
    /// The request can never succeed as issued (4xx, schema violations).
    #[error("Permanent API failure (status {status:?}): {message}")]
    Permanent {
        /// The HTTP status, when one was received.
        status: Option<u16>,
        /// Human-readable failure detail.
        message: String,
    },
    /// The response body did not match the expected schema.
    #[error("API response decode error: {0}")]
    Decode(String),
}

impl ErrorCode for ApiError {
    fn code(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "API_TRANSIENT",
            Self::Permanent { .. } => "API_PERMANENT",
            Self::Decode(_) => "API_DECODE_ERROR",
        }
    }
}

/// Errors from the change-set committer.
#[derive(Error, Debug)]
pub enum CommitError {
    /// The change set violates the commit rules (e.g. a multi-rule or mixed
    /// deny batch) and can never be applied.
    #[error("Malformed change set: {0}")]
    Malformed(String),
    /// The external API rejected or failed the request.
    #[error(transparent)]
    Api(#[from] ApiError),
    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for CommitError {
    fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "COMMIT_MALFORMED_CHANGE",
            Self::Api(e) => e.code(),
            Self::Store(e) => e.code(),
        }
    }
}

impl From<CommitError> for TaskError {
    /// Maps committer failures onto the retry policy: structural violations
    /// and permanent API errors drop the task, everything else retries.
    fn from(err: CommitError) -> Self {
        match err {
            CommitError::Malformed(m) => TaskError::Permanent(m),
            CommitError::Api(ApiError::Permanent { status, message }) => {
                TaskError::Permanent(format!("API rejected change (status {status:?}): {message}"))
            }
            other => TaskError::Retry(other.to_string()),
        }
    }
}
