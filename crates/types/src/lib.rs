//! Core data structures and error types for the Quorum policy engine.
//!
//! Everything that is persisted to the entity store or crosses a crate
//! boundary lives here: the blockable/vote/rule/host/user entity model, the
//! canonical binary codec, the well-known state key layout, the error
//! hierarchy, and the engine configuration structs.

pub mod codec;
pub mod config;
pub mod error;
pub mod keys;
pub mod model;
pub mod queues;
pub mod time;

pub use error::ErrorCode;
