//! Edit model - a proposed change to a canonical entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use super::payload::{EditOperation, EditPayload, TargetType};
use crate::common::{EditId, EntityId, UserId};
use crate::domains::edits::error::EditError;

/// Edit status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditStatus {
    Pending,
    Accepted,
    Rejected,
    Applied,
    Canceled,
}

impl EditStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EditStatus::Rejected | EditStatus::Applied | EditStatus::Canceled
        )
    }

    /// Legal moves of the edit state machine.
    ///
    /// `accepted -> rejected` only happens when application fails for good
    /// (retries exhausted or the target vanished).
    pub fn can_transition_to(&self, next: EditStatus) -> bool {
        matches!(
            (self, next),
            (EditStatus::Pending, EditStatus::Accepted)
                | (EditStatus::Pending, EditStatus::Rejected)
                | (EditStatus::Pending, EditStatus::Canceled)
                | (EditStatus::Accepted, EditStatus::Applied)
                | (EditStatus::Accepted, EditStatus::Rejected)
        )
    }
}

impl std::fmt::Display for EditStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditStatus::Pending => write!(f, "pending"),
            EditStatus::Accepted => write!(f, "accepted"),
            EditStatus::Rejected => write!(f, "rejected"),
            EditStatus::Applied => write!(f, "applied"),
            EditStatus::Canceled => write!(f, "canceled"),
        }
    }
}

impl std::str::FromStr for EditStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "pending" => Ok(EditStatus::Pending),
            "accepted" => Ok(EditStatus::Accepted),
            "rejected" => Ok(EditStatus::Rejected),
            // Older rows used "implemented" for what is now "applied".
            "applied" | "implemented" => Ok(EditStatus::Applied),
            "canceled" => Ok(EditStatus::Canceled),
            _ => Err(anyhow::anyhow!("Invalid edit status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edit {
    pub id: EditId,
    pub target_type: TargetType,
    /// Absent for create edits until they are applied.
    pub target_id: Option<EntityId>,
    pub operation: EditOperation,
    pub payload: EditPayload,
    pub status: EditStatus,
    pub created_by: UserId,
    /// Payload revisions made while pending.
    pub update_count: i32,
    /// Transient apply failures so far.
    pub apply_attempts: i32,
    /// Why the last apply attempt failed, or why the edit was rejected.
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Input for proposing a new edit
#[derive(Debug, Clone, TypedBuilder)]
pub struct CreateEdit {
    pub target_type: TargetType,
    #[builder(default, setter(strip_option))]
    pub target_id: Option<EntityId>,
    pub payload: EditPayload,
}

impl Edit {
    pub fn new(input: CreateEdit, created_by: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id: EditId::new(),
            target_type: input.target_type,
            target_id: input.target_id,
            operation: input.payload.operation(),
            payload: input.payload,
            status: EditStatus::Pending,
            created_by,
            update_count: 0,
            apply_attempts: 0,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            applied_at: None,
            closed_at: None,
        }
    }

    pub fn is_destructive(&self) -> bool {
        self.operation.is_destructive()
    }

    /// Time the edit has been open at `now` (zero if `now` precedes creation).
    pub fn elapsed(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.created_at).to_std().unwrap_or_default()
    }

    /// Move to `next`, maintaining the timestamp invariants.
    pub fn transition(&mut self, next: EditStatus, now: DateTime<Utc>) -> Result<(), EditError> {
        if !self.status.can_transition_to(next) {
            return Err(EditError::conflict(format!(
                "edit {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }

        self.status = next;
        self.updated_at = now;
        if next == EditStatus::Applied {
            self.applied_at = Some(now);
        }
        if next.is_terminal() {
            self.closed_at = Some(now);
        }
        Ok(())
    }

    pub fn ensure_status(&self, expected: EditStatus, action: &str) -> Result<(), EditError> {
        if self.status != expected {
            return Err(EditError::conflict(format!(
                "cannot {} edit {}: status is {}",
                action, self.id, self.status
            )));
        }
        Ok(())
    }
}
