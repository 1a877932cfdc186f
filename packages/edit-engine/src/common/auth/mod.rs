//! Authorization for edit operations
//!
//! Callers arrive already authenticated; the resolver layer hands the engine an
//! `Actor` carrying the user's id and granted capabilities:
//!
//! ```rust
//! use edit_engine::common::{Actor, Capability, UserId};
//!
//! let actor = Actor::new(UserId::new(), [Capability::Vote]);
//! assert!(actor.can(Capability::Vote).check().is_ok());
//! assert!(actor.can(Capability::Moderate).check().is_err());
//! ```

mod builder;
mod capability;
mod errors;

pub use builder::{Actor, CapabilityCheck};
pub use capability::Capability;
pub use errors::AuthError;
