// Trait definitions for dependency injection
//
// Infrastructure seams only. Resolution and application logic lives in the
// edits domain and talks to the outside world through these traits.
//
// Naming convention: Base* for trait names (e.g., BaseNotifier, BaseClock)

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::common::{EditId, UserId};
use crate::domains::edits::models::EditStatus;

// =============================================================================
// Notifications
// =============================================================================

/// Something a participant of an edit should hear about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EditNotification {
    /// The edit reached a new status.
    StatusChanged {
        edit_id: EditId,
        status: EditStatus,
        reason: Option<String>,
    },
    /// Application is blocked; the edit stays accepted.
    ApplyBlocked { edit_id: EditId, reason: String },
    /// The creator revised a pending edit and votes were reset.
    Revised { edit_id: EditId, votes_cleared: bool },
}

impl EditNotification {
    pub fn edit_id(&self) -> EditId {
        match self {
            EditNotification::StatusChanged { edit_id, .. }
            | EditNotification::ApplyBlocked { edit_id, .. }
            | EditNotification::Revised { edit_id, .. } => *edit_id,
        }
    }
}

#[async_trait]
pub trait BaseNotifier: Send + Sync {
    /// Deliver a notification. Failures are reported but never roll back the
    /// state change that produced the notification.
    async fn notify(&self, recipients: &[UserId], notification: &EditNotification) -> Result<()>;
}

/// Notifier that only writes structured log lines.
pub struct TracingNotifier;

#[async_trait]
impl BaseNotifier for TracingNotifier {
    async fn notify(&self, recipients: &[UserId], notification: &EditNotification) -> Result<()> {
        tracing::info!(
            edit_id = %notification.edit_id(),
            recipients = recipients.len(),
            notification = %serde_json::to_string(notification)?,
            "Edit notification"
        );
        Ok(())
    }
}

// =============================================================================
// Clock
// =============================================================================

pub trait BaseClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl BaseClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
