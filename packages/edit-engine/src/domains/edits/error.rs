use thiserror::Error;
use uuid::Uuid;

use crate::common::{AuthError, EntityId};

/// Errors surfaced by edit operations and the resolution scheduler
#[derive(Error, Debug)]
pub enum EditError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Uuid },

    /// Illegal state transition (voting on a closed edit, double cancel, ...)
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    ValidationFailure(String),

    /// Destroy or merge blocked by live references to the entity.
    #[error("Entity {} is still referenced by {} other entities", .entity_id, .referrers.len())]
    DependencyConflict {
        entity_id: EntityId,
        referrers: Vec<EntityId>,
    },

    /// Timeout, contention or connectivity; safe to retry.
    #[error("Transient store failure: {0}")]
    TransientStoreFailure(String),

    #[error(transparent)]
    Forbidden(#[from] AuthError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EditError {
    pub fn not_found(kind: &'static str, id: impl Into<Uuid>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::ValidationFailure(message.into())
    }

    /// Whether the scheduler should try the same operation again on a later tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientStoreFailure(_) | Self::Internal(_))
    }
}

// Postgres error codes that indicate contention rather than a broken request.
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const LOCK_NOT_AVAILABLE: &str = "55P03";
const QUERY_CANCELED: &str = "57014";

impl From<sqlx::Error> for EditError {
    fn from(err: sqlx::Error) -> Self {
        let transient = match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => true,
            sqlx::Error::Database(db_err) => matches!(
                db_err.code().as_deref(),
                Some(SERIALIZATION_FAILURE)
                    | Some(DEADLOCK_DETECTED)
                    | Some(LOCK_NOT_AVAILABLE)
                    | Some(QUERY_CANCELED)
            ),
            _ => false,
        };

        if transient {
            return Self::TransientStoreFailure(err.to_string());
        }
        if matches!(err, sqlx::Error::RowNotFound) {
            return Self::NotFound {
                kind: "row",
                id: Uuid::nil(),
            };
        }
        Self::Internal(err.into())
    }
}
