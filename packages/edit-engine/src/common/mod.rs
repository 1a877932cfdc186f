// Common types shared by the engine and its storage adapters

pub mod auth;
pub mod entity_ids;
pub mod id;

pub use auth::{Actor, AuthError, Capability, CapabilityCheck};
pub use entity_ids::*;
pub use id::{Id, V7};
