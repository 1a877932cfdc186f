//! Integration tests for the edit lifecycle actions.
//!
//! Covers proposing, revising, voting, commenting, canceling, moderating and
//! listing edits against the in-memory store.

mod common;

use crate::common::*;
use edit_engine::common::{Actor, AuthError, Capability, EntityId, UserId};
use edit_engine::domains::edits::{
    cancel_edit, comment_on_edit, list_pending_edits, moderate_edit, revise_edit, vote_on_edit,
    EditError, EditPayload, EditStatus, FieldChange, ModerationDecision, TargetType, VoteValue,
};
use edit_engine::kernel::EditNotification;
use serde_json::json;

fn rename(name: &str) -> EditPayload {
    EditPayload::Modify {
        changes: vec![FieldChange::set("name", name)],
    }
}

// =============================================================================
// Create
// =============================================================================

#[tokio::test]
async fn create_edit_starts_pending() {
    let ctx = TestHarness::new().await;
    let tag = seed_tag(&ctx, "Outdoor").await;
    let creator = contributor();

    let edit = propose(&ctx, &creator, TargetType::Tag, Some(tag.id), rename("Outdoors")).await;

    assert_eq!(edit.status, EditStatus::Pending);
    assert_eq!(edit.created_by, creator.user_id());
    assert_eq!(edit.created_at, ctx.now());
    assert_eq!(edit.update_count, 0);
    assert!(edit.applied_at.is_none());
    assert!(!edit.is_destructive());
}

#[tokio::test]
async fn create_requires_edit_capability() {
    let ctx = TestHarness::new().await;
    let tag = seed_tag(&ctx, "Outdoor").await;
    let voter_only = Actor::new(UserId::new(), [Capability::Vote]);

    let input = edit_engine::domains::edits::CreateEdit::builder()
        .target_type(TargetType::Tag)
        .target_id(tag.id)
        .payload(rename("Outdoors"))
        .build();
    let err = edit_engine::domains::edits::create_edit(&ctx.deps, &voter_only, input)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EditError::Forbidden(AuthError::MissingCapability { capability: "edit", .. })
    ));
}

#[tokio::test]
async fn create_for_missing_target_is_not_found() {
    let ctx = TestHarness::new().await;

    let input = edit_engine::domains::edits::CreateEdit::builder()
        .target_type(TargetType::Tag)
        .target_id(EntityId::new())
        .payload(rename("Ghost"))
        .build();
    let err = edit_engine::domains::edits::create_edit(&ctx.deps, &contributor(), input)
        .await
        .unwrap_err();

    assert!(matches!(err, EditError::NotFound { kind: "tag", .. }));
}

#[tokio::test]
async fn create_with_unknown_field_is_invalid() {
    let ctx = TestHarness::new().await;
    let tag = seed_tag(&ctx, "Outdoor").await;

    let input = edit_engine::domains::edits::CreateEdit::builder()
        .target_type(TargetType::Tag)
        .target_id(tag.id)
        .payload(EditPayload::Modify {
            changes: vec![FieldChange::set("birthdate", "1990-01-01")],
        })
        .build();
    let err = edit_engine::domains::edits::create_edit(&ctx.deps, &contributor(), input)
        .await
        .unwrap_err();

    assert!(matches!(err, EditError::ValidationFailure(_)));
}

#[tokio::test]
async fn create_rejects_reference_to_missing_entity() {
    let ctx = TestHarness::new().await;

    let input = edit_engine::domains::edits::CreateEdit::builder()
        .target_type(TargetType::Scene)
        .payload(EditPayload::Create {
            changes: vec![
                FieldChange::set("title", "Pilot"),
                FieldChange::set("studio", EntityId::new().to_string()),
            ],
        })
        .build();
    let err = edit_engine::domains::edits::create_edit(&ctx.deps, &contributor(), input)
        .await
        .unwrap_err();

    assert!(matches!(err, EditError::ValidationFailure(_)));
}

// =============================================================================
// Vote
// =============================================================================

#[tokio::test]
async fn second_vote_replaces_first() {
    let ctx = TestHarness::new().await;
    let tag = seed_tag(&ctx, "Outdoor").await;
    let edit = propose(&ctx, &contributor(), TargetType::Tag, Some(tag.id), rename("Outdoors")).await;
    let voter = contributor();

    vote_on_edit(&ctx.deps, &voter, edit.id, VoteValue::Accept)
        .await
        .unwrap();
    vote_on_edit(&ctx.deps, &voter, edit.id, VoteValue::Reject)
        .await
        .unwrap();

    let details = details(&ctx, edit.id).await;
    assert_eq!(details.votes.len(), 1);
    assert_eq!(details.votes[0].value, VoteValue::Reject);
    assert_eq!(details.tally.score, -1);
}

#[tokio::test]
async fn creator_cannot_vote_on_own_edit() {
    let ctx = TestHarness::new().await;
    let tag = seed_tag(&ctx, "Outdoor").await;
    let creator = contributor();
    let edit = propose(&ctx, &creator, TargetType::Tag, Some(tag.id), rename("Outdoors")).await;

    let err = vote_on_edit(&ctx.deps, &creator, edit.id, VoteValue::Accept)
        .await
        .unwrap_err();

    assert!(matches!(err, EditError::Forbidden(AuthError::PermissionDenied(_))));
    assert!(details(&ctx, edit.id).await.votes.is_empty());
}

#[tokio::test]
async fn vote_on_canceled_edit_is_conflict() {
    let ctx = TestHarness::new().await;
    let tag = seed_tag(&ctx, "Outdoor").await;
    let creator = contributor();
    let edit = propose(&ctx, &creator, TargetType::Tag, Some(tag.id), rename("Outdoors")).await;
    cancel_edit(&ctx.deps, &creator, edit.id).await.unwrap();

    let err = vote_on_edit(&ctx.deps, &contributor(), edit.id, VoteValue::Accept)
        .await
        .unwrap_err();

    assert!(matches!(err, EditError::Conflict(_)));
}

#[tokio::test]
async fn abstain_is_recorded_but_not_counted() {
    let ctx = TestHarness::new().await;
    let tag = seed_tag(&ctx, "Outdoor").await;
    let edit = propose(&ctx, &contributor(), TargetType::Tag, Some(tag.id), rename("Outdoors")).await;

    vote_on_edit(&ctx.deps, &contributor(), edit.id, VoteValue::Abstain)
        .await
        .unwrap();

    let details = details(&ctx, edit.id).await;
    assert_eq!(details.votes.len(), 1);
    assert_eq!(details.tally.score, 0);
    assert_eq!(details.tally.accept_count, 0);
}

// =============================================================================
// Comment
// =============================================================================

#[tokio::test]
async fn comments_are_listed_in_order() {
    let ctx = TestHarness::new().await;
    let tag = seed_tag(&ctx, "Outdoor").await;
    let edit = propose(&ctx, &contributor(), TargetType::Tag, Some(tag.id), rename("Outdoors")).await;
    let author = contributor();

    comment_on_edit(&ctx.deps, &author, edit.id, "Source?")
        .await
        .unwrap();
    ctx.advance_hours(1);
    comment_on_edit(&ctx.deps, &author, edit.id, "  Found one.  ")
        .await
        .unwrap();

    let comments = details(&ctx, edit.id).await.comments;
    let texts: Vec<&str> = comments.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(texts, vec!["Source?", "Found one."]);
    assert_eq!(comments[0].author_id, Some(author.user_id()));
}

#[tokio::test]
async fn empty_comment_is_invalid() {
    let ctx = TestHarness::new().await;
    let tag = seed_tag(&ctx, "Outdoor").await;
    let edit = propose(&ctx, &contributor(), TargetType::Tag, Some(tag.id), rename("Outdoors")).await;

    let err = comment_on_edit(&ctx.deps, &contributor(), edit.id, "   ")
        .await
        .unwrap_err();

    assert!(matches!(err, EditError::ValidationFailure(_)));
}

#[tokio::test]
async fn comment_on_closed_edit_is_conflict() {
    let ctx = TestHarness::new().await;
    let tag = seed_tag(&ctx, "Outdoor").await;
    let creator = contributor();
    let edit = propose(&ctx, &creator, TargetType::Tag, Some(tag.id), rename("Outdoors")).await;
    cancel_edit(&ctx.deps, &creator, edit.id).await.unwrap();

    let err = comment_on_edit(&ctx.deps, &creator, edit.id, "too late")
        .await
        .unwrap_err();

    assert!(matches!(err, EditError::Conflict(_)));
}

// =============================================================================
// Cancel
// =============================================================================

#[tokio::test]
async fn cancel_closes_edit_and_notifies() {
    let ctx = TestHarness::new().await;
    let tag = seed_tag(&ctx, "Outdoor").await;
    let creator = contributor();
    let edit = propose(&ctx, &creator, TargetType::Tag, Some(tag.id), rename("Outdoors")).await;
    let voters = cast_votes(&ctx, edit.id, 1, 0).await;

    let canceled = cancel_edit(&ctx.deps, &creator, edit.id).await.unwrap();

    assert_eq!(canceled.status, EditStatus::Canceled);
    assert_eq!(canceled.closed_at, Some(ctx.now()));

    let calls = ctx.notifier.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].recipients, vec![creator.user_id(), voters[0]]);
    assert_eq!(
        calls[0].notification,
        EditNotification::StatusChanged {
            edit_id: edit.id,
            status: EditStatus::Canceled,
            reason: None,
        }
    );
}

#[tokio::test]
async fn cancel_twice_is_conflict() {
    let ctx = TestHarness::new().await;
    let tag = seed_tag(&ctx, "Outdoor").await;
    let creator = contributor();
    let edit = propose(&ctx, &creator, TargetType::Tag, Some(tag.id), rename("Outdoors")).await;

    cancel_edit(&ctx.deps, &creator, edit.id).await.unwrap();
    let err = cancel_edit(&ctx.deps, &creator, edit.id).await.unwrap_err();

    assert!(matches!(err, EditError::Conflict(_)));
}

#[tokio::test]
async fn only_creator_may_cancel() {
    let ctx = TestHarness::new().await;
    let tag = seed_tag(&ctx, "Outdoor").await;
    let edit = propose(&ctx, &contributor(), TargetType::Tag, Some(tag.id), rename("Outdoors")).await;

    let err = cancel_edit(&ctx.deps, &contributor(), edit.id)
        .await
        .unwrap_err();

    assert!(matches!(err, EditError::Forbidden(_)));
    assert_eq!(details(&ctx, edit.id).await.edit.status, EditStatus::Pending);
}

#[tokio::test]
async fn notifier_failure_does_not_fail_cancel() {
    let ctx = TestHarness::new().await;
    ctx.notifier.fail_deliveries();
    let tag = seed_tag(&ctx, "Outdoor").await;
    let creator = contributor();
    let edit = propose(&ctx, &creator, TargetType::Tag, Some(tag.id), rename("Outdoors")).await;

    let canceled = cancel_edit(&ctx.deps, &creator, edit.id).await.unwrap();

    assert_eq!(canceled.status, EditStatus::Canceled);
    assert_eq!(ctx.notifier.calls().len(), 1);
}

// =============================================================================
// Revise
// =============================================================================

#[tokio::test]
async fn substantive_revision_clears_votes() {
    let ctx = TestHarness::new().await;
    let tag = seed_tag(&ctx, "Outdoor").await;
    let creator = contributor();
    let edit = propose(&ctx, &creator, TargetType::Tag, Some(tag.id), rename("Outdoors")).await;
    cast_votes(&ctx, edit.id, 2, 0).await;

    let revised = revise_edit(&ctx.deps, &creator, edit.id, rename("Open Air"), false)
        .await
        .unwrap();

    assert_eq!(revised.update_count, 1);
    assert_eq!(revised.payload, rename("Open Air"));
    assert!(details(&ctx, edit.id).await.votes.is_empty());
    assert!(ctx.notifier.notifications().contains(&EditNotification::Revised {
        edit_id: edit.id,
        votes_cleared: true,
    }));
}

#[tokio::test]
async fn non_substantive_revision_keeps_votes() {
    let ctx = TestHarness::new().await;
    let tag = seed_tag(&ctx, "Outdoor").await;
    let creator = contributor();
    let edit = propose(&ctx, &creator, TargetType::Tag, Some(tag.id), rename("Outdors")).await;
    cast_votes(&ctx, edit.id, 2, 0).await;

    revise_edit(&ctx.deps, &creator, edit.id, rename("Outdoors"), true)
        .await
        .unwrap();

    assert_eq!(details(&ctx, edit.id).await.votes.len(), 2);
}

#[tokio::test]
async fn revision_limit_is_enforced() {
    let ctx = TestHarness::new().await;
    let tag = seed_tag(&ctx, "Outdoor").await;
    let creator = contributor();
    let edit = propose(&ctx, &creator, TargetType::Tag, Some(tag.id), rename("Outdoors")).await;

    revise_edit(&ctx.deps, &creator, edit.id, rename("Open Air"), false)
        .await
        .unwrap();
    let err = revise_edit(&ctx.deps, &creator, edit.id, rename("Alfresco"), false)
        .await
        .unwrap_err();

    assert!(matches!(err, EditError::Conflict(_)));
    assert_eq!(details(&ctx, edit.id).await.edit.payload, rename("Open Air"));
}

#[tokio::test]
async fn revision_cannot_change_operation() {
    let ctx = TestHarness::new().await;
    let tag = seed_tag(&ctx, "Outdoor").await;
    let creator = contributor();
    let edit = propose(&ctx, &creator, TargetType::Tag, Some(tag.id), rename("Outdoors")).await;

    let err = revise_edit(&ctx.deps, &creator, edit.id, EditPayload::Destroy, false)
        .await
        .unwrap_err();

    assert!(matches!(err, EditError::ValidationFailure(_)));
}

#[tokio::test]
async fn only_creator_may_revise() {
    let ctx = TestHarness::new().await;
    let tag = seed_tag(&ctx, "Outdoor").await;
    let edit = propose(&ctx, &contributor(), TargetType::Tag, Some(tag.id), rename("Outdoors")).await;

    let err = revise_edit(&ctx.deps, &contributor(), edit.id, rename("Open Air"), false)
        .await
        .unwrap_err();

    assert!(matches!(err, EditError::Forbidden(_)));
}

// =============================================================================
// Moderate
// =============================================================================

#[tokio::test]
async fn moderator_accept_applies_immediately() {
    let ctx = TestHarness::new().await;
    let tag = seed_tag(&ctx, "Outdoor").await;
    let edit = propose(&ctx, &contributor(), TargetType::Tag, Some(tag.id), rename("Outdoors")).await;

    let moderated = moderate_edit(&ctx.deps, &moderator(), edit.id, ModerationDecision::Accept)
        .await
        .unwrap();

    assert_eq!(moderated.status, EditStatus::Applied);
    let tag = load_entity(&ctx, TargetType::Tag, tag.id).await.unwrap();
    assert_eq!(tag.field("name"), Some(&json!("Outdoors")));
}

#[tokio::test]
async fn moderator_reject_records_reason() {
    let ctx = TestHarness::new().await;
    let tag = seed_tag(&ctx, "Outdoor").await;
    let edit = propose(&ctx, &contributor(), TargetType::Tag, Some(tag.id), rename("Outdoors")).await;
    let moderator = moderator();

    let moderated = moderate_edit(&ctx.deps, &moderator, edit.id, ModerationDecision::Reject)
        .await
        .unwrap();

    assert_eq!(moderated.status, EditStatus::Rejected);
    assert!(moderated
        .failure_reason
        .unwrap()
        .contains(&moderator.user_id().to_string()));
    let tag = load_entity(&ctx, TargetType::Tag, tag.id).await.unwrap();
    assert_eq!(tag.field("name"), Some(&json!("Outdoor")));
}

#[tokio::test]
async fn moderation_requires_capability() {
    let ctx = TestHarness::new().await;
    let tag = seed_tag(&ctx, "Outdoor").await;
    let edit = propose(&ctx, &contributor(), TargetType::Tag, Some(tag.id), rename("Outdoors")).await;

    let err = moderate_edit(&ctx.deps, &contributor(), edit.id, ModerationDecision::Accept)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EditError::Forbidden(AuthError::MissingCapability { capability: "moderate", .. })
    ));
}

#[tokio::test]
async fn moderator_cannot_skip_destructive_floor() {
    let ctx = TestHarness::new().await;
    let tag = seed_tag(&ctx, "Outdoor").await;
    let edit = propose(&ctx, &contributor(), TargetType::Tag, Some(tag.id), EditPayload::Destroy).await;

    ctx.advance_hours(23);
    let err = moderate_edit(&ctx.deps, &moderator(), edit.id, ModerationDecision::Accept)
        .await
        .unwrap_err();
    assert!(matches!(err, EditError::Conflict(_)));

    ctx.advance_hours(1);
    let moderated = moderate_edit(&ctx.deps, &moderator(), edit.id, ModerationDecision::Accept)
        .await
        .unwrap();
    assert_eq!(moderated.status, EditStatus::Applied);
    assert!(load_entity(&ctx, TargetType::Tag, tag.id).await.is_none());
}

// =============================================================================
// Listing
// =============================================================================

#[tokio::test]
async fn pending_list_puts_promoted_edits_first() {
    let ctx = TestHarness::new().await;
    let tag = seed_tag(&ctx, "Outdoor").await;
    let older = propose(&ctx, &contributor(), TargetType::Tag, Some(tag.id), rename("A")).await;
    ctx.advance_hours(1);
    let newer = propose(&ctx, &contributor(), TargetType::Tag, Some(tag.id), rename("B")).await;
    ctx.advance_hours(1);
    let newest = propose(&ctx, &contributor(), TargetType::Tag, Some(tag.id), rename("C")).await;
    cast_votes(&ctx, newer.id, 2, 0).await;

    let listed = list_pending_edits(&ctx.deps).await.unwrap();
    let order: Vec<_> = listed.iter().map(|p| p.edit.id).collect();

    assert_eq!(order, vec![newer.id, older.id, newest.id]);
    assert!(listed[0].promoted);
    assert_eq!(listed[0].tally.score, 2);
    assert!(!listed[1].promoted);
}
