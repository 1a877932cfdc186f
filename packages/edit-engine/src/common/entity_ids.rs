//! Typed ID definitions for the edit engine.
//!
//! Marker types are suffixed with `Entity` so they never collide with the
//! model structs of the same name.

pub use super::id::{Id, V7};

/// Marker for users (editors, voters, moderators).
pub struct UserEntity;

/// Marker for edit proposals.
pub struct EditEntity;

/// Marker for comments posted on an edit.
pub struct CommentEntity;

/// Marker for canonical records (performers, studios, scenes, tags, images).
pub struct CanonicalEntity;

pub type UserId = Id<UserEntity>;

pub type EditId = Id<EditEntity>;

pub type CommentId = Id<CommentEntity>;

/// Canonical records share one id space regardless of their type.
pub type EntityId = Id<CanonicalEntity>;
