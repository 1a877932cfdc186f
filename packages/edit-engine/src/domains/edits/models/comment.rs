//! EditComment model - append-only discussion on an edit

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{CommentId, EditId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct EditComment {
    pub id: CommentId,
    pub edit_id: EditId,
    /// `None` for comments posted by the engine itself (e.g. blocked applies).
    pub author_id: Option<UserId>,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl EditComment {
    pub fn new(edit_id: EditId, author_id: UserId, text: String, now: DateTime<Utc>) -> Self {
        Self {
            id: CommentId::new(),
            edit_id,
            author_id: Some(author_id),
            text,
            created_at: now,
        }
    }

    pub fn system(edit_id: EditId, text: String, now: DateTime<Utc>) -> Self {
        Self {
            id: CommentId::new(),
            edit_id,
            author_id: None,
            text,
            created_at: now,
        }
    }
}
