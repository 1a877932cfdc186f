use thiserror::Error;

use crate::common::entity_ids::UserId;

/// Authorization errors for edit operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("User {user_id} lacks the {capability} capability")]
    MissingCapability {
        user_id: UserId,
        capability: &'static str,
    },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}
