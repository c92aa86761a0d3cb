//! The persisted entity model: blockables, votes, rules, hosts, users and
//! change sets.

mod blockable;
mod changeset;
mod host;
mod rule;
mod user;
mod vote;

pub use blockable::*;
pub use changeset::*;
pub use host::*;
pub use rule::*;
pub use user::*;
pub use vote::*;
