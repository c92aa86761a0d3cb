//! Shared fixtures and fake collaborators for Quorum tests.

pub mod fixtures;
pub mod queue;

pub use queue::{QueuedTask, RecordingQueue};
