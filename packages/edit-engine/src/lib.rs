// Edit-proposal and voting engine
//
// Changes to canonical metadata (performers, studios, scenes, tags, images)
// are proposed as edits, voted on, and applied by a scheduled resolver once
// they clear the configured thresholds.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;

pub use config::*;
