#![forbid(unsafe_code)]

//! The ballot box: the voting and rule-materialization engine.
//!
//! Entry points live on [`voting::VotingEngine`]: `vote`, `recount`, `reset`
//! and `set_installer_policy`. Everything they do happens inside optimistic
//! cross-group transactions against the entity store; irreversible side
//! effects (analytics rows, deferred-task triggers) are buffered during the
//! transaction and externalized only after its commit succeeds.

pub mod bootstrap;
pub mod installer;
pub mod platform;
pub mod voting;

mod ids;
mod rows;

pub use platform::PlatformFlavor;
pub use voting::VotingEngine;
