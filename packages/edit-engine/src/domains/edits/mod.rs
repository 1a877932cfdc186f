//! Edits domain - proposals against canonical entities, voting and resolution

pub mod activities;
pub mod error;
pub mod models;
pub mod tally;

pub use activities::*;
pub use error::EditError;
pub use models::*;
pub use tally::{evaluate, tally, RejectionReason, Verdict, VoteTally};
