//! Seam traits decoupling the voting engine from its collaborators.
//!
//! The engine only ever talks to the persistence layer through
//! [`store::EntityStore`] and to the deferred-work facility through
//! [`tasks::TaskQueue`]; concrete backends live in their own crates.

pub mod store;
pub mod tasks;

pub use store::{EntityStore, StoreTxn};
pub use tasks::{TaskHandler, TaskQueue};
