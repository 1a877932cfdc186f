//! Vote resolution
//!
//! `run_vote_tick` is the body of the scheduled job. It settles pending edits
//! from their votes and applies accepted ones. Every status change is a
//! compare-and-set on the stored status, so overlapping ticks (or a tick
//! racing a moderator) can never move the same edit twice.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::apply::execute_edit;
use super::edit_actions::participants;
use crate::common::{EditId, UserId};
use crate::config::VotingConfig;
use crate::domains::edits::error::EditError;
use crate::domains::edits::models::{Edit, EditComment, EditStatus};
use crate::domains::edits::tally::{evaluate, tally, VoteTally, Verdict};
use crate::kernel::{EditNotification, EngineDeps, StoreTransaction};

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Pending edits looked at.
    pub evaluated: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub applied: usize,
    /// Apply attempts that failed transiently, plus evaluations that errored.
    pub failed: usize,
    /// Accepted edits held back by live references.
    pub blocked: usize,
    /// Edits another writer moved first.
    pub skipped: usize,
}

/// Result of trying to apply one accepted edit
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied(Edit),
    /// Still accepted; the reason is recorded on the edit.
    Blocked { reason: String },
    /// Transient failure; will be retried on a later tick.
    Retrying { attempts: i32 },
    Rejected { reason: String },
    /// The edit was no longer accepted when we got to it.
    Skipped,
}

/// Settle pending edits and apply accepted ones as of `now`.
///
/// Thresholds are read once per tick from the live configuration.
pub async fn run_vote_tick(deps: &EngineDeps, now: DateTime<Utc>) -> Result<TickReport, EditError> {
    let config = deps.config.current();
    let mut report = TickReport::default();

    let (mut pending, carried_over) = deps
        .transaction(|tx| Box::pin(load_open_edits(tx)))
        .await?;

    // Promoted edits first; `sort_by_key` is stable so age order holds within each group.
    pending.sort_by_key(|(_, tally)| !tally.is_promoted(&config));

    for (edit, _) in pending {
        report.evaluated += 1;
        let edit_id = edit.id;

        let settled = {
            let config = config.clone();
            deps.transaction(move |tx| Box::pin(settle_pending(tx, edit_id, config, now)))
                .await
        };

        match settled {
            Ok(Settlement::Accepted { edit, recipients }) => {
                report.accepted += 1;
                info!(edit_id = %edit.id, operation = %edit.operation, "Edit accepted by vote");
                deps.notify(
                    &recipients,
                    EditNotification::StatusChanged {
                        edit_id: edit.id,
                        status: EditStatus::Accepted,
                        reason: None,
                    },
                )
                .await;

                match apply_accepted_edit(deps, edit_id, now).await {
                    Ok(outcome) => report.record(&outcome),
                    Err(e) => {
                        report.failed += 1;
                        error!(edit_id = %edit_id, error = %e, "Failed to apply accepted edit");
                    }
                }
            }
            Ok(Settlement::Rejected { edit, recipients }) => {
                report.rejected += 1;
                info!(
                    edit_id = %edit.id,
                    reason = edit.failure_reason.as_deref().unwrap_or_default(),
                    "Edit rejected by vote"
                );
                deps.notify(
                    &recipients,
                    EditNotification::StatusChanged {
                        edit_id: edit.id,
                        status: EditStatus::Rejected,
                        reason: edit.failure_reason.clone(),
                    },
                )
                .await;
            }
            Ok(Settlement::Waiting) => {}
            Ok(Settlement::Moved) => report.skipped += 1,
            Err(e) => {
                report.failed += 1;
                warn!(edit_id = %edit_id, error = %e, "Failed to evaluate pending edit");
            }
        }
    }

    for edit_id in carried_over {
        match apply_accepted_edit(deps, edit_id, now).await {
            Ok(outcome) => report.record(&outcome),
            Err(e) => {
                report.failed += 1;
                error!(edit_id = %edit_id, error = %e, "Failed to retry accepted edit");
            }
        }
    }

    info!(
        evaluated = report.evaluated,
        accepted = report.accepted,
        rejected = report.rejected,
        applied = report.applied,
        failed = report.failed,
        blocked = report.blocked,
        skipped = report.skipped,
        "Vote tick complete"
    );
    Ok(report)
}

impl TickReport {
    fn record(&mut self, outcome: &ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied(_) => self.applied += 1,
            ApplyOutcome::Blocked { .. } => self.blocked += 1,
            ApplyOutcome::Retrying { .. } => self.failed += 1,
            ApplyOutcome::Rejected { .. } => self.rejected += 1,
            ApplyOutcome::Skipped => self.skipped += 1,
        }
    }
}

async fn load_open_edits(
    tx: &mut dyn StoreTransaction,
) -> Result<(Vec<(Edit, VoteTally)>, Vec<EditId>), EditError> {
    let edits = tx
        .find_edits_by_status(&[EditStatus::Pending, EditStatus::Accepted])
        .await?;

    let mut pending = Vec::new();
    let mut accepted = Vec::new();
    for edit in edits {
        match edit.status {
            EditStatus::Pending => {
                let votes = tx.find_votes(edit.id).await?;
                pending.push((edit, tally(&votes)));
            }
            EditStatus::Accepted => accepted.push(edit.id),
            _ => {}
        }
    }
    Ok((pending, accepted))
}

enum Settlement {
    Accepted { edit: Edit, recipients: Vec<UserId> },
    Rejected { edit: Edit, recipients: Vec<UserId> },
    Waiting,
    /// No longer pending.
    Moved,
}

async fn settle_pending(
    tx: &mut dyn StoreTransaction,
    edit_id: EditId,
    config: VotingConfig,
    now: DateTime<Utc>,
) -> Result<Settlement, EditError> {
    let Some(mut edit) = tx.find_edit(edit_id).await? else {
        return Err(EditError::not_found("edit", edit_id));
    };
    if edit.status != EditStatus::Pending {
        return Ok(Settlement::Moved);
    }

    let votes = tx.find_votes(edit_id).await?;
    let current = tally(&votes);
    let verdict = evaluate(&current, &config, edit.is_destructive(), edit.elapsed(now));
    debug!(
        edit_id = %edit_id,
        score = current.score,
        accepts = current.accept_count,
        rejects = current.reject_count,
        verdict = ?verdict,
        "Evaluated pending edit"
    );

    match verdict {
        Verdict::Wait => Ok(Settlement::Waiting),
        Verdict::Accept => {
            edit.transition(EditStatus::Accepted, now)?;
            if !tx.update_edit(&edit, EditStatus::Pending).await? {
                return Ok(Settlement::Moved);
            }
            let recipients = participants(tx, &edit).await?;
            Ok(Settlement::Accepted { edit, recipients })
        }
        Verdict::Reject(reason) => {
            edit.failure_reason = Some(reason.to_string());
            edit.transition(EditStatus::Rejected, now)?;
            if !tx.update_edit(&edit, EditStatus::Pending).await? {
                return Ok(Settlement::Moved);
            }
            let recipients = participants(tx, &edit).await?;
            Ok(Settlement::Rejected { edit, recipients })
        }
    }
}

/// Apply an accepted edit and record the result on it.
///
/// The entity mutation and the `accepted -> applied` move commit together.
/// Failures are sorted into blocked (dependency conflict, stays accepted),
/// retryable (counts toward `max_apply_attempts`) and permanent (rejects).
pub async fn apply_accepted_edit(
    deps: &EngineDeps,
    edit_id: EditId,
    now: DateTime<Utc>,
) -> Result<ApplyOutcome, EditError> {
    let attempt = deps
        .transaction(move |tx| Box::pin(apply_in_transaction(tx, edit_id, now)))
        .await;

    match attempt {
        Ok(Some((edit, recipients))) => {
            info!(
                edit_id = %edit.id,
                operation = %edit.operation,
                target_id = ?edit.target_id,
                "Edit applied"
            );
            deps.notify(
                &recipients,
                EditNotification::StatusChanged {
                    edit_id: edit.id,
                    status: EditStatus::Applied,
                    reason: None,
                },
            )
            .await;
            Ok(ApplyOutcome::Applied(edit))
        }
        Ok(None) | Err(EditError::Conflict(_)) => Ok(ApplyOutcome::Skipped),
        Err(blocked @ EditError::DependencyConflict { .. }) => {
            let reason = blocked.to_string();
            let posted = {
                let reason = reason.clone();
                deps.transaction(move |tx| Box::pin(record_blocked(tx, edit_id, reason, now)))
                    .await?
            };
            if let Some(recipients) = posted {
                warn!(edit_id = %edit_id, reason = %reason, "Edit application blocked");
                deps.notify(
                    &recipients,
                    EditNotification::ApplyBlocked {
                        edit_id,
                        reason: reason.clone(),
                    },
                )
                .await;
            }
            Ok(ApplyOutcome::Blocked { reason })
        }
        Err(e) => {
            let transient = e.is_transient();
            let reason = e.to_string();
            let max_attempts = deps.config.current().max_apply_attempts;

            let recorded = {
                let reason = reason.clone();
                deps.transaction(move |tx| {
                    Box::pin(record_failure(tx, edit_id, reason, transient, max_attempts, now))
                })
                .await?
            };

            match recorded {
                None => Ok(ApplyOutcome::Skipped),
                Some((edit, _)) if edit.status == EditStatus::Accepted => {
                    warn!(
                        edit_id = %edit_id,
                        attempts = edit.apply_attempts,
                        error = %reason,
                        "Edit application failed, will retry"
                    );
                    Ok(ApplyOutcome::Retrying {
                        attempts: edit.apply_attempts,
                    })
                }
                Some((edit, recipients)) => {
                    warn!(edit_id = %edit_id, reason = %reason, "Accepted edit rejected");
                    deps.notify(
                        &recipients,
                        EditNotification::StatusChanged {
                            edit_id,
                            status: EditStatus::Rejected,
                            reason: edit.failure_reason.clone(),
                        },
                    )
                    .await;
                    Ok(ApplyOutcome::Rejected { reason })
                }
            }
        }
    }
}

async fn apply_in_transaction(
    tx: &mut dyn StoreTransaction,
    edit_id: EditId,
    now: DateTime<Utc>,
) -> Result<Option<(Edit, Vec<UserId>)>, EditError> {
    let Some(mut edit) = tx.find_edit(edit_id).await? else {
        return Err(EditError::not_found("edit", edit_id));
    };
    if edit.status != EditStatus::Accepted {
        return Ok(None);
    }

    execute_edit(tx, &mut edit, now).await?;
    edit.failure_reason = None;
    edit.transition(EditStatus::Applied, now)?;
    if !tx.update_edit(&edit, EditStatus::Accepted).await? {
        return Err(EditError::conflict(format!("edit {} moved during apply", edit_id)));
    }

    let recipients = participants(tx, &edit).await?;
    Ok(Some((edit, recipients)))
}

/// Record a dependency block. Returns recipients when the reason is new and a
/// system comment was posted.
async fn record_blocked(
    tx: &mut dyn StoreTransaction,
    edit_id: EditId,
    reason: String,
    now: DateTime<Utc>,
) -> Result<Option<Vec<UserId>>, EditError> {
    let Some(mut edit) = tx.find_edit(edit_id).await? else {
        return Err(EditError::not_found("edit", edit_id));
    };
    if edit.status != EditStatus::Accepted || edit.failure_reason.as_deref() == Some(reason.as_str()) {
        return Ok(None);
    }

    edit.failure_reason = Some(reason.clone());
    edit.updated_at = now;
    if !tx.update_edit(&edit, EditStatus::Accepted).await? {
        return Ok(None);
    }

    let comment = EditComment::system(edit_id, format!("Application blocked: {}", reason), now);
    tx.insert_comment(&comment).await?;

    Ok(Some(participants(tx, &edit).await?))
}

/// Record a failed apply. Transient failures count toward the retry budget;
/// anything else rejects the edit straight away.
async fn record_failure(
    tx: &mut dyn StoreTransaction,
    edit_id: EditId,
    reason: String,
    transient: bool,
    max_attempts: i32,
    now: DateTime<Utc>,
) -> Result<Option<(Edit, Vec<UserId>)>, EditError> {
    let Some(mut edit) = tx.find_edit(edit_id).await? else {
        return Err(EditError::not_found("edit", edit_id));
    };
    if edit.status != EditStatus::Accepted {
        return Ok(None);
    }

    if transient {
        edit.apply_attempts += 1;
    }
    edit.failure_reason = Some(reason.clone());
    edit.updated_at = now;

    if !transient || edit.apply_attempts >= max_attempts {
        let reason = if transient {
            format!(
                "application failed after {} attempts: {}",
                edit.apply_attempts, reason
            )
        } else {
            reason
        };
        edit.failure_reason = Some(reason);
        edit.transition(EditStatus::Rejected, now)?;
    }

    if !tx.update_edit(&edit, EditStatus::Accepted).await? {
        return Ok(None);
    }
    let recipients = participants(tx, &edit).await?;
    Ok(Some((edit, recipients)))
}
