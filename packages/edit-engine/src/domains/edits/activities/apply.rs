//! Application executor
//!
//! Turns an accepted edit into entity mutations. Everything here runs inside
//! the caller's transaction, so a failure at any step leaves the entity
//! store untouched once the caller rolls back.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::debug;

use crate::common::EntityId;
use crate::domains::edits::error::EditError;
use crate::domains::edits::models::{Edit, EditPayload, EntityRecord, FieldChange, TargetType};
use crate::kernel::StoreTransaction;

/// Perform `edit`'s operation against the entity store.
///
/// For create edits the new entity id is written to `edit.target_id`.
pub async fn execute_edit(
    tx: &mut dyn StoreTransaction,
    edit: &mut Edit,
    now: DateTime<Utc>,
) -> Result<(), EditError> {
    // Re-validate against the schema in force now.
    edit.payload.validate(edit.target_type, edit.target_id)?;

    let target_type = edit.target_type;
    match &edit.payload {
        EditPayload::Create { changes } => {
            let id = create_entity(tx, target_type, changes, now).await?;
            edit.target_id = Some(id);
        }
        EditPayload::Modify { changes } => {
            let target = require_target(edit)?;
            modify_entity(tx, target_type, target, changes, now).await?;
        }
        EditPayload::Destroy => {
            let target = require_target(edit)?;
            destroy_entity(tx, target_type, target).await?;
        }
        EditPayload::Merge {
            source_ids,
            changes,
        } => {
            let target = require_target(edit)?;
            merge_entities(tx, target_type, target, source_ids, changes, now).await?;
        }
    }
    Ok(())
}

fn require_target(edit: &Edit) -> Result<EntityId, EditError> {
    edit.target_id
        .ok_or_else(|| EditError::invalid(format!("edit {} has no target", edit.id)))
}

/// Load a record that must exist and must not have been merged away.
pub(crate) async fn load_live(
    tx: &mut dyn StoreTransaction,
    entity_type: TargetType,
    id: EntityId,
) -> Result<EntityRecord, EditError> {
    let record = tx
        .get_entity(entity_type, id)
        .await?
        .ok_or_else(|| EditError::not_found(entity_type_name(entity_type), id))?;

    if let Some(survivor) = record.redirect_id {
        return Err(EditError::invalid(format!(
            "{} {} was merged into {}",
            entity_type, id, survivor
        )));
    }
    Ok(record)
}

fn entity_type_name(entity_type: TargetType) -> &'static str {
    match entity_type {
        TargetType::Performer => "performer",
        TargetType::Studio => "studio",
        TargetType::Scene => "scene",
        TargetType::Tag => "tag",
        TargetType::Image => "image",
    }
}

/// Every referenced id must resolve to a live entity of the declared type.
pub(crate) async fn check_references(
    tx: &mut dyn StoreTransaction,
    record: &EntityRecord,
) -> Result<(), EditError> {
    for (referenced_type, id) in record.references() {
        if id == record.id {
            return Err(EditError::invalid(format!(
                "{} {} cannot reference itself",
                record.entity_type, id
            )));
        }
        match tx.get_entity(referenced_type, id).await? {
            None => {
                return Err(EditError::invalid(format!(
                    "referenced {} {} does not exist",
                    referenced_type, id
                )))
            }
            Some(referenced) if referenced.is_tombstone() => {
                return Err(EditError::invalid(format!(
                    "referenced {} {} was merged away",
                    referenced_type, id
                )))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

async fn create_entity(
    tx: &mut dyn StoreTransaction,
    entity_type: TargetType,
    changes: &[FieldChange],
    now: DateTime<Utc>,
) -> Result<EntityId, EditError> {
    let mut record = EntityRecord::new(EntityId::new(), entity_type, now);
    record.apply_changes(changes, now);
    check_references(tx, &record).await?;
    tx.put_entity(&record).await?;

    debug!(entity_id = %record.id, entity_type = %entity_type, "Created entity");
    Ok(record.id)
}

async fn modify_entity(
    tx: &mut dyn StoreTransaction,
    entity_type: TargetType,
    target: EntityId,
    changes: &[FieldChange],
    now: DateTime<Utc>,
) -> Result<(), EditError> {
    let mut record = load_live(tx, entity_type, target).await?;
    record.apply_changes(changes, now);
    check_references(tx, &record).await?;
    tx.put_entity(&record).await?;

    debug!(entity_id = %target, changes = changes.len(), "Modified entity");
    Ok(())
}

async fn destroy_entity(
    tx: &mut dyn StoreTransaction,
    entity_type: TargetType,
    target: EntityId,
) -> Result<(), EditError> {
    load_live(tx, entity_type, target).await?;

    let referrers: Vec<EntityId> = tx
        .find_referrers(target)
        .await?
        .into_iter()
        .map(|record| record.id)
        .filter(|id| *id != target)
        .collect();
    if !referrers.is_empty() {
        return Err(EditError::DependencyConflict {
            entity_id: target,
            referrers,
        });
    }

    tx.delete_entity(entity_type, target).await?;
    debug!(entity_id = %target, "Destroyed entity");
    Ok(())
}

async fn merge_entities(
    tx: &mut dyn StoreTransaction,
    entity_type: TargetType,
    target_id: EntityId,
    source_ids: &[EntityId],
    changes: &[FieldChange],
    now: DateTime<Utc>,
) -> Result<(), EditError> {
    ensure_acyclic(tx, entity_type, target_id, source_ids).await?;

    let mut target = load_live(tx, entity_type, target_id).await?;
    let mut sources = Vec::with_capacity(source_ids.len());
    for source_id in source_ids {
        sources.push(load_live(tx, entity_type, *source_id).await?);
    }

    let mut redirected = 0usize;
    for source in &sources {
        for mut referrer in tx.find_referrers(source.id).await? {
            // Sources are tombstoned below; their outgoing references die with them.
            if source_ids.contains(&referrer.id) {
                continue;
            }
            if referrer.id == target_id {
                target.redirect_references(source.id, target_id, now);
                continue;
            }
            if referrer.redirect_references(source.id, target_id, now) {
                tx.put_entity(&referrer).await?;
                redirected += 1;
            }
        }
    }

    target.apply_changes(changes, now);
    check_references(tx, &target).await?;
    tx.put_entity(&target).await?;

    for mut source in sources {
        source.redirect_id = Some(target_id);
        source.updated_at = now;
        tx.put_entity(&source).await?;
    }

    debug!(
        entity_id = %target_id,
        sources = source_ids.len(),
        redirected_referrers = redirected,
        "Merged entities"
    );
    Ok(())
}

/// Refuse merges that would make the redirect graph cyclic.
///
/// Walks the redirect chain starting at the target. The chain must end at
/// the target itself (it is live) and must never pass through a source.
async fn ensure_acyclic(
    tx: &mut dyn StoreTransaction,
    entity_type: TargetType,
    target_id: EntityId,
    source_ids: &[EntityId],
) -> Result<(), EditError> {
    let sources: HashSet<EntityId> = source_ids.iter().copied().collect();
    if sources.len() != source_ids.len() {
        return Err(EditError::invalid("merge sources must be distinct"));
    }

    let mut visited = HashSet::new();
    let mut current = target_id;
    loop {
        if sources.contains(&current) {
            return Err(EditError::invalid(format!(
                "merging into {} would create a redirect cycle through {}",
                target_id, current
            )));
        }
        if !visited.insert(current) {
            return Err(EditError::invalid(format!(
                "redirect chain of {} loops at {}",
                target_id, current
            )));
        }

        let record = tx
            .get_entity(entity_type, current)
            .await?
            .ok_or_else(|| EditError::not_found(entity_type_name(entity_type), current))?;
        match record.redirect_id {
            Some(next) => current = next,
            None => break,
        }
    }

    if current != target_id {
        return Err(EditError::invalid(format!(
            "merge target {} was itself merged into {}",
            target_id, current
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::UserId;
    use crate::domains::edits::models::{CreateEdit, EditStatus};
    use crate::kernel::{BaseEditStore, MemoryEditStore};
    use serde_json::json;

    fn record(entity_type: TargetType, name_field: &str, name: &str) -> EntityRecord {
        let mut record = EntityRecord::new(EntityId::new(), entity_type, Utc::now());
        record.apply_changes(&[FieldChange::set(name_field, name)], Utc::now());
        record
    }

    fn edit(target_type: TargetType, target_id: Option<EntityId>, payload: EditPayload) -> Edit {
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
        let mut edit = Edit::new(input, UserId::new(), Utc::now());
        edit.status = EditStatus::Accepted;
        edit
    }

    async fn seed(store: &MemoryEditStore, records: &[&EntityRecord]) {
        let mut tx = store.begin().await.unwrap();
        for record in records {
            tx.put_entity(record).await.unwrap();
        }
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn create_assigns_target_id() {
        let store = MemoryEditStore::new();
        let mut edit = edit(
            TargetType::Tag,
            None,
            EditPayload::Create {
                changes: vec![FieldChange::set("name", "Outdoor")],
            },
        );

        let mut tx = store.begin().await.unwrap();
        execute_edit(tx.as_mut(), &mut edit, Utc::now()).await.unwrap();

        let id = edit.target_id.unwrap();
        let created = tx.get_entity(TargetType::Tag, id).await.unwrap().unwrap();
        assert_eq!(created.field("name"), Some(&json!("Outdoor")));
    }

    #[tokio::test]
    async fn modify_rejects_dangling_reference() {
        let store = MemoryEditStore::new();
        let scene = record(TargetType::Scene, "title", "Pilot");
        seed(&store, &[&scene]).await;

        let mut edit = edit(
            TargetType::Scene,
            Some(scene.id),
            EditPayload::Modify {
                changes: vec![FieldChange::set("studio", EntityId::new().to_string())],
            },
        );

        let mut tx = store.begin().await.unwrap();
        let err = execute_edit(tx.as_mut(), &mut edit, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, EditError::ValidationFailure(_)));
    }

    #[tokio::test]
    async fn modify_of_missing_target_is_not_found() {
        let store = MemoryEditStore::new();
        let mut edit = edit(
            TargetType::Tag,
            Some(EntityId::new()),
            EditPayload::Modify {
                changes: vec![FieldChange::set("description", "gone")],
            },
        );

        let mut tx = store.begin().await.unwrap();
        let err = execute_edit(tx.as_mut(), &mut edit, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, EditError::NotFound { kind: "tag", .. }));
    }

    #[tokio::test]
    async fn destroy_blocked_by_referrer() {
        let store = MemoryEditStore::new();
        let studio = record(TargetType::Studio, "name", "Northside");
        let mut scene = record(TargetType::Scene, "title", "Pilot");
        scene.apply_changes(&[FieldChange::set("studio", studio.id.to_string())], Utc::now());
        seed(&store, &[&studio, &scene]).await;

        let mut edit = edit(TargetType::Studio, Some(studio.id), EditPayload::Destroy);
        let mut tx = store.begin().await.unwrap();
        let err = execute_edit(tx.as_mut(), &mut edit, Utc::now())
            .await
            .unwrap_err();

        match err {
            EditError::DependencyConflict {
                entity_id,
                referrers,
            } => {
                assert_eq!(entity_id, studio.id);
                assert_eq!(referrers, vec![scene.id]);
            }
            other => panic!("expected dependency conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn merge_redirects_referrers_and_tombstones_sources() {
        let store = MemoryEditStore::new();
        let keep = record(TargetType::Performer, "name", "Ana");
        let dupe = record(TargetType::Performer, "name", "Ana B.");
        let mut scene = record(TargetType::Scene, "title", "Pilot");
        scene.apply_changes(
            &[FieldChange::set(
                "performers",
                json!([dupe.id.to_string(), keep.id.to_string()]),
            )],
            Utc::now(),
        );
        seed(&store, &[&keep, &dupe, &scene]).await;

        let mut edit = edit(
            TargetType::Performer,
            Some(keep.id),
            EditPayload::Merge {
                source_ids: vec![dupe.id],
                changes: vec![FieldChange::add("aliases", ["Ana B."])],
            },
        );

        let mut tx = store.begin().await.unwrap();
        execute_edit(tx.as_mut(), &mut edit, Utc::now()).await.unwrap();

        let scene = tx.get_entity(TargetType::Scene, scene.id).await.unwrap().unwrap();
        assert_eq!(scene.field("performers"), Some(&json!([keep.id.to_string()])));

        let dupe = tx.get_entity(TargetType::Performer, dupe.id).await.unwrap().unwrap();
        assert_eq!(dupe.redirect_id, Some(keep.id));

        let keep = tx.get_entity(TargetType::Performer, keep.id).await.unwrap().unwrap();
        assert_eq!(keep.field("aliases"), Some(&json!(["Ana B."])));
    }

    #[tokio::test]
    async fn merge_into_a_tombstone_is_refused() {
        let store = MemoryEditStore::new();
        let survivor = record(TargetType::Tag, "name", "Beach");
        let mut merged = record(TargetType::Tag, "name", "Seaside");
        merged.redirect_id = Some(survivor.id);
        let other = record(TargetType::Tag, "name", "Coast");
        seed(&store, &[&survivor, &merged, &other]).await;

        let mut edit = edit(
            TargetType::Tag,
            Some(merged.id),
            EditPayload::Merge {
                source_ids: vec![other.id],
                changes: vec![],
            },
        );

        let mut tx = store.begin().await.unwrap();
        let err = execute_edit(tx.as_mut(), &mut edit, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, EditError::ValidationFailure(_)));
    }

    #[tokio::test]
    async fn merge_through_redirect_chain_to_source_is_a_cycle() {
        let store = MemoryEditStore::new();
        let source = record(TargetType::Tag, "name", "Beach");
        let mut target = record(TargetType::Tag, "name", "Seaside");
        target.redirect_id = Some(source.id);
        seed(&store, &[&source, &target]).await;

        let mut tx = store.begin().await.unwrap();
        let err = ensure_acyclic(tx.as_mut(), TargetType::Tag, target.id, &[source.id])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }
}
