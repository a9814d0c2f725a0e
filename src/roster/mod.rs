//! Roster Module
//!
//! Known parties with display names, and the join links that bring a
//! patient into the waiting room.

mod directory;
mod link;

pub use directory::{Party, PartyDirectory, RosterError};
pub use link::{build_join_link, join_link_for};
