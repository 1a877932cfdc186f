//! Edit lifecycle actions
//!
//! Proposing, revising, voting on, commenting on, canceling and moderating
//! edits. Each action checks the actor's capability, runs in one store
//! transaction, and notifies participants after commit.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::apply::load_live;
use super::resolution::{apply_accepted_edit, ApplyOutcome};
use crate::common::{Actor, AuthError, Capability, EditId, UserId};
use crate::config::VotingConfig;
use crate::domains::edits::error::EditError;
use crate::domains::edits::models::{
    CreateEdit, Edit, EditComment, EditPayload, EditStatus, Vote, VoteValue,
};
use crate::domains::edits::tally::{tally, VoteTally};
use crate::kernel::{EditNotification, EngineDeps, StoreTransaction};

/// An edit with everything attached to it
#[derive(Debug, Clone, Serialize)]
pub struct EditDetails {
    pub edit: Edit,
    pub votes: Vec<Vote>,
    pub comments: Vec<EditComment>,
    pub tally: VoteTally,
}

/// A pending edit as listed for voters
#[derive(Debug, Clone, Serialize)]
pub struct PendingEdit {
    pub edit: Edit,
    pub tally: VoteTally,
    pub promoted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationDecision {
    Accept,
    Reject,
}

/// Creator plus everyone who voted, without duplicates.
pub(crate) async fn participants(
    tx: &mut dyn StoreTransaction,
    edit: &Edit,
) -> Result<Vec<UserId>, EditError> {
    let mut recipients = vec![edit.created_by];
    for vote in tx.find_votes(edit.id).await? {
        if !recipients.contains(&vote.voter_id) {
            recipients.push(vote.voter_id);
        }
    }
    Ok(recipients)
}

async fn load_edit(tx: &mut dyn StoreTransaction, edit_id: EditId) -> Result<Edit, EditError> {
    tx.find_edit(edit_id)
        .await?
        .ok_or_else(|| EditError::not_found("edit", edit_id))
}

fn ensure_creator(actor: &Actor, edit: &Edit, action: &str) -> Result<(), EditError> {
    if edit.created_by != actor.user_id() {
        return Err(AuthError::PermissionDenied(format!(
            "only the creator may {} edit {}",
            action, edit.id
        ))
        .into());
    }
    Ok(())
}

/// Targets, merge sources and referenced entities must exist and be live.
async fn check_payload_targets(
    tx: &mut dyn StoreTransaction,
    edit: &Edit,
) -> Result<(), EditError> {
    if let Some(target) = edit.target_id {
        load_live(tx, edit.target_type, target).await?;
    }
    for source in edit.payload.merge_sources() {
        load_live(tx, edit.target_type, *source).await?;
    }
    for (referenced_type, id) in edit.payload.referenced_ids(edit.target_type) {
        match tx.get_entity(referenced_type, id).await? {
            Some(record) if !record.is_tombstone() => {}
            _ => {
                return Err(EditError::invalid(format!(
                    "referenced {} {} does not exist",
                    referenced_type, id
                )))
            }
        }
    }
    Ok(())
}

// =============================================================================
// Create
// =============================================================================

pub async fn create_edit(
    deps: &EngineDeps,
    actor: &Actor,
    input: CreateEdit,
) -> Result<Edit, EditError> {
    actor.can(Capability::Edit).check()?;
    input.payload.validate(input.target_type, input.target_id)?;

    let edit = Edit::new(input, actor.user_id(), deps.clock.now());
    let edit = deps
        .transaction(move |tx| Box::pin(insert_new_edit(tx, edit)))
        .await?;

    info!(
        edit_id = %edit.id,
        operation = %edit.operation,
        target_type = %edit.target_type,
        created_by = %edit.created_by,
        "Edit proposed"
    );
    Ok(edit)
}

async fn insert_new_edit(tx: &mut dyn StoreTransaction, edit: Edit) -> Result<Edit, EditError> {
    check_payload_targets(tx, &edit).await?;
    tx.insert_edit(&edit).await?;
    Ok(edit)
}

// =============================================================================
// Revise
// =============================================================================

/// Replace a pending edit's payload.
///
/// Existing votes are discarded unless the revision is flagged as
/// non-substantive (typo fixes and the like).
pub async fn revise_edit(
    deps: &EngineDeps,
    actor: &Actor,
    edit_id: EditId,
    payload: EditPayload,
    non_substantive: bool,
) -> Result<Edit, EditError> {
    actor.can(Capability::Edit).check()?;

    let actor = actor.clone();
    let limit = deps.config.current().edit_update_limit;
    let now = deps.clock.now();
    let (edit, votes_cleared, recipients) = deps
        .transaction(move |tx| {
            Box::pin(revise_in_transaction(
                tx,
                actor,
                edit_id,
                payload,
                non_substantive,
                limit,
                now,
            ))
        })
        .await?;

    info!(
        edit_id = %edit_id,
        update_count = edit.update_count,
        votes_cleared = votes_cleared,
        "Edit revised"
    );
    deps.notify(
        &recipients,
        EditNotification::Revised {
            edit_id,
            votes_cleared: votes_cleared > 0,
        },
    )
    .await;
    Ok(edit)
}

async fn revise_in_transaction(
    tx: &mut dyn StoreTransaction,
    actor: Actor,
    edit_id: EditId,
    payload: EditPayload,
    non_substantive: bool,
    limit: i32,
    now: DateTime<Utc>,
) -> Result<(Edit, u64, Vec<UserId>), EditError> {
    let mut edit = load_edit(tx, edit_id).await?;
    ensure_creator(&actor, &edit, "revise")?;
    edit.ensure_status(EditStatus::Pending, "revise")?;

    if edit.update_count >= limit {
        return Err(EditError::conflict(format!(
            "edit {} has reached its revision limit of {}",
            edit_id, limit
        )));
    }
    if payload.operation() != edit.operation {
        return Err(EditError::invalid(format!(
            "a revision cannot change the operation from {} to {}",
            edit.operation,
            payload.operation()
        )));
    }
    payload.validate(edit.target_type, edit.target_id)?;

    // Recipients are collected before votes go away.
    let recipients = participants(tx, &edit).await?;

    edit.payload = payload;
    edit.update_count += 1;
    edit.updated_at = now;
    check_payload_targets(tx, &edit).await?;

    if !tx.update_edit(&edit, EditStatus::Pending).await? {
        return Err(EditError::conflict(format!("edit {} is no longer pending", edit_id)));
    }

    let votes_cleared = if non_substantive {
        0
    } else {
        tx.delete_votes(edit_id).await?
    };
    Ok((edit, votes_cleared, recipients))
}

// =============================================================================
// Vote
// =============================================================================

pub async fn vote_on_edit(
    deps: &EngineDeps,
    actor: &Actor,
    edit_id: EditId,
    value: VoteValue,
) -> Result<Vote, EditError> {
    actor.can(Capability::Vote).check()?;

    let vote = Vote {
        edit_id,
        voter_id: actor.user_id(),
        value,
        cast_at: deps.clock.now(),
    };
    let vote = deps
        .transaction(move |tx| Box::pin(cast_vote(tx, vote)))
        .await?;

    debug!(edit_id = %edit_id, voter_id = %vote.voter_id, value = %vote.value, "Vote cast");
    Ok(vote)
}

async fn cast_vote(tx: &mut dyn StoreTransaction, vote: Vote) -> Result<Vote, EditError> {
    let edit = load_edit(tx, vote.edit_id).await?;
    edit.ensure_status(EditStatus::Pending, "vote on")?;
    if edit.created_by == vote.voter_id {
        return Err(AuthError::PermissionDenied(format!(
            "cannot vote on your own edit {}",
            edit.id
        ))
        .into());
    }

    tx.upsert_vote(&vote).await?;
    Ok(vote)
}

// =============================================================================
// Comment
// =============================================================================

pub async fn comment_on_edit(
    deps: &EngineDeps,
    actor: &Actor,
    edit_id: EditId,
    text: &str,
) -> Result<EditComment, EditError> {
    actor.can(Capability::Edit).check()?;

    let text = text.trim();
    if text.is_empty() {
        return Err(EditError::invalid("comment text must not be empty"));
    }

    let comment = EditComment::new(edit_id, actor.user_id(), text.to_string(), deps.clock.now());
    let comment = deps
        .transaction(move |tx| Box::pin(insert_comment(tx, comment)))
        .await?;

    debug!(edit_id = %edit_id, comment_id = %comment.id, "Comment added");
    Ok(comment)
}

async fn insert_comment(
    tx: &mut dyn StoreTransaction,
    comment: EditComment,
) -> Result<EditComment, EditError> {
    let edit = load_edit(tx, comment.edit_id).await?;
    if !matches!(edit.status, EditStatus::Pending | EditStatus::Accepted) {
        return Err(EditError::conflict(format!(
            "cannot comment on edit {}: status is {}",
            edit.id, edit.status
        )));
    }
    tx.insert_comment(&comment).await?;
    Ok(comment)
}

// =============================================================================
// Cancel
// =============================================================================

pub async fn cancel_edit(
    deps: &EngineDeps,
    actor: &Actor,
    edit_id: EditId,
) -> Result<Edit, EditError> {
    let actor = actor.clone();
    let now = deps.clock.now();
    let (edit, recipients) = deps
        .transaction(move |tx| Box::pin(cancel_in_transaction(tx, actor, edit_id, now)))
        .await?;

    info!(edit_id = %edit_id, "Edit canceled");
    deps.notify(
        &recipients,
        EditNotification::StatusChanged {
            edit_id,
            status: EditStatus::Canceled,
            reason: None,
        },
    )
    .await;
    Ok(edit)
}

async fn cancel_in_transaction(
    tx: &mut dyn StoreTransaction,
    actor: Actor,
    edit_id: EditId,
    now: DateTime<Utc>,
) -> Result<(Edit, Vec<UserId>), EditError> {
    let mut edit = load_edit(tx, edit_id).await?;
    ensure_creator(&actor, &edit, "cancel")?;
    edit.transition(EditStatus::Canceled, now)?;

    if !tx.update_edit(&edit, EditStatus::Pending).await? {
        return Err(EditError::conflict(format!("edit {} is no longer pending", edit_id)));
    }
    let recipients = participants(tx, &edit).await?;
    Ok((edit, recipients))
}

// =============================================================================
// Moderate
// =============================================================================

/// Close a pending edit without waiting for votes.
///
/// An accepted edit is applied right away; the returned edit reflects the
/// outcome of that attempt. Destructive edits still have to sit out their
/// minimum voting period.
pub async fn moderate_edit(
    deps: &EngineDeps,
    actor: &Actor,
    edit_id: EditId,
    decision: ModerationDecision,
) -> Result<Edit, EditError> {
    actor.can(Capability::Moderate).check()?;

    let moderator = actor.user_id();
    let config = deps.config.current();
    let now = deps.clock.now();
    let (edit, recipients) = deps
        .transaction(move |tx| {
            Box::pin(moderate_in_transaction(tx, moderator, edit_id, decision, config, now))
        })
        .await?;

    info!(
        edit_id = %edit_id,
        moderator = %moderator,
        decision = ?decision,
        "Edit moderated"
    );
    deps.notify(
        &recipients,
        EditNotification::StatusChanged {
            edit_id,
            status: edit.status,
            reason: edit.failure_reason.clone(),
        },
    )
    .await;

    if decision == ModerationDecision::Reject {
        return Ok(edit);
    }

    match apply_accepted_edit(deps, edit_id, now).await? {
        ApplyOutcome::Applied(applied) => Ok(applied),
        _ => get_edit(deps, edit_id).await.map(|details| details.edit),
    }
}

async fn moderate_in_transaction(
    tx: &mut dyn StoreTransaction,
    moderator: UserId,
    edit_id: EditId,
    decision: ModerationDecision,
    config: VotingConfig,
    now: DateTime<Utc>,
) -> Result<(Edit, Vec<UserId>), EditError> {
    let mut edit = load_edit(tx, edit_id).await?;
    edit.ensure_status(EditStatus::Pending, "moderate")?;

    match decision {
        ModerationDecision::Reject => {
            edit.failure_reason = Some(format!("rejected by moderator {}", moderator));
            edit.transition(EditStatus::Rejected, now)?;
        }
        ModerationDecision::Accept => {
            let floor = config.minimum_open_period(true);
            if edit.is_destructive() && edit.elapsed(now) < floor {
                return Err(EditError::conflict(format!(
                    "destructive edit {} must stay open for {:?} before it can be accepted",
                    edit_id, floor
                )));
            }
            edit.transition(EditStatus::Accepted, now)?;
        }
    }

    if !tx.update_edit(&edit, EditStatus::Pending).await? {
        return Err(EditError::conflict(format!("edit {} is no longer pending", edit_id)));
    }
    let recipients = participants(tx, &edit).await?;
    Ok((edit, recipients))
}

// =============================================================================
// Queries
// =============================================================================

pub async fn get_edit(deps: &EngineDeps, edit_id: EditId) -> Result<EditDetails, EditError> {
    deps.transaction(move |tx| Box::pin(load_details(tx, edit_id)))
        .await
}

async fn load_details(
    tx: &mut dyn StoreTransaction,
    edit_id: EditId,
) -> Result<EditDetails, EditError> {
    let edit = tx
        .read_edit(edit_id)
        .await?
        .ok_or_else(|| EditError::not_found("edit", edit_id))?;
    let votes = tx.find_votes(edit_id).await?;
    let comments = tx.find_comments(edit_id).await?;
    let tally = tally(&votes);
    Ok(EditDetails {
        edit,
        votes,
        comments,
        tally,
    })
}

/// Pending edits, promoted ones first, oldest first within each group.
pub async fn list_pending_edits(deps: &EngineDeps) -> Result<Vec<PendingEdit>, EditError> {
    let config = deps.config.current();
    let mut listed = deps
        .transaction(move |tx| Box::pin(load_pending(tx, config)))
        .await?;
    listed.sort_by_key(|pending| !pending.promoted);
    Ok(listed)
}

async fn load_pending(
    tx: &mut dyn StoreTransaction,
    config: VotingConfig,
) -> Result<Vec<PendingEdit>, EditError> {
    let edits = tx.find_edits_by_status(&[EditStatus::Pending]).await?;
    let mut listed = Vec::with_capacity(edits.len());
    for edit in edits {
        let tally = tally(&tx.find_votes(edit.id).await?);
        listed.push(PendingEdit {
            promoted: tally.is_promoted(&config),
            edit,
            tally,
        });
    }
    Ok(listed)
}
