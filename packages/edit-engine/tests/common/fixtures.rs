//! Test fixtures for creating test data.
//!
//! Canonical entities are written straight into the store; edits and votes
//! go through the public actions like real callers.

use edit_engine::common::{Actor, EditId, EntityId, UserId};
use edit_engine::domains::edits::{
    create_edit, get_edit, vote_on_edit, CreateEdit, Edit, EditDetails, EditPayload,
    EntityRecord, FieldChange, TargetType, VoteValue,
};
use edit_engine::kernel::BaseEditStore;

use super::TestHarness;

pub fn contributor() -> Actor {
    Actor::contributor(UserId::new())
}

pub fn moderator() -> Actor {
    Actor::moderator(UserId::new())
}

/// Write a live entity with the given fields.
pub async fn seed_entity(
    ctx: &TestHarness,
    entity_type: TargetType,
    changes: &[FieldChange],
) -> EntityRecord {
    let mut record = EntityRecord::new(EntityId::new(), entity_type, ctx.now());
    record.apply_changes(changes, ctx.now());
    put_entity(ctx, &record).await;
    record
}

pub async fn seed_tag(ctx: &TestHarness, name: &str) -> EntityRecord {
    seed_entity(ctx, TargetType::Tag, &[FieldChange::set("name", name)]).await
}

/// Overwrite an entity outside of any edit (e.g. another edit landed).
pub async fn put_entity(ctx: &TestHarness, record: &EntityRecord) {
    let mut tx = ctx.store.begin().await.expect("begin");
    tx.put_entity(record).await.expect("put entity");
    tx.commit().await.expect("commit");
}

pub async fn load_entity(
    ctx: &TestHarness,
    entity_type: TargetType,
    id: EntityId,
) -> Option<EntityRecord> {
    let mut tx = ctx.store.begin().await.expect("begin");
    tx.get_entity(entity_type, id).await.expect("get entity")
}

pub async fn propose(
    ctx: &TestHarness,
    creator: &Actor,
    target_type: TargetType,
    target_id: Option<EntityId>,
    payload: EditPayload,
) -> Edit {
    let input = match target_id {
        Some(id) => CreateEdit::builder()
            .target_type(target_type)
            .target_id(id)
            .payload(payload)
            .build(),
        None => CreateEdit::builder()
            .target_type(target_type)
            .payload(payload)
            .build(),
    };
    create_edit(&ctx.deps, creator, input)
        .await
        .expect("Failed to create edit")
}

/// Cast `accepts` accept votes and `rejects` reject votes from fresh voters.
pub async fn cast_votes(ctx: &TestHarness, edit_id: EditId, accepts: usize, rejects: usize) -> Vec<UserId> {
    let mut voters = Vec::new();
    let values = std::iter::repeat(VoteValue::Accept)
        .take(accepts)
        .chain(std::iter::repeat(VoteValue::Reject).take(rejects));
    for value in values {
        let voter = contributor();
        vote_on_edit(&ctx.deps, &voter, edit_id, value)
            .await
            .expect("Failed to vote");
        voters.push(voter.user_id());
    }
    voters
}

pub async fn details(ctx: &TestHarness, edit_id: EditId) -> EditDetails {
    get_edit(&ctx.deps, edit_id).await.expect("Failed to load edit")
}
