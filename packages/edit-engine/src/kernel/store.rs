// Storage traits for the edit engine
//
// Every read and write the engine performs goes through a `StoreTransaction`.
// Edit rows and canonical entity records live behind the same transaction so
// that an entity mutation and the edit status change that records it commit
// or roll back together.

use async_trait::async_trait;

use crate::common::{EditId, EntityId};
use crate::domains::edits::error::EditError;
use crate::domains::edits::models::{
    Edit, EditComment, EditStatus, EntityRecord, TargetType, Vote,
};

#[async_trait]
pub trait BaseEditStore: Send + Sync {
    /// Open a transaction. Dropping it without `commit` discards its writes.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, EditError>;
}

/// Edit, vote and comment rows
#[async_trait]
pub trait EditRepository: Send {
    async fn insert_edit(&mut self, edit: &Edit) -> Result<(), EditError>;

    /// Load an edit and lock it for the rest of the transaction.
    async fn find_edit(&mut self, id: EditId) -> Result<Option<Edit>, EditError>;

    /// Load an edit without locking it, for read-only queries.
    async fn read_edit(&mut self, id: EditId) -> Result<Option<Edit>, EditError>;

    /// Write `edit` only if the stored status still equals `expected`.
    ///
    /// Returns `false` when another writer moved the edit first.
    async fn update_edit(&mut self, edit: &Edit, expected: EditStatus) -> Result<bool, EditError>;

    /// Edits in any of `statuses`, oldest first.
    async fn find_edits_by_status(&mut self, statuses: &[EditStatus]) -> Result<Vec<Edit>, EditError>;

    /// Insert or replace the vote for (edit, voter).
    async fn upsert_vote(&mut self, vote: &Vote) -> Result<(), EditError>;

    async fn find_votes(&mut self, edit_id: EditId) -> Result<Vec<Vote>, EditError>;

    async fn delete_votes(&mut self, edit_id: EditId) -> Result<u64, EditError>;

    async fn insert_comment(&mut self, comment: &EditComment) -> Result<(), EditError>;

    /// Comments on an edit, oldest first.
    async fn find_comments(&mut self, edit_id: EditId) -> Result<Vec<EditComment>, EditError>;
}

/// Canonical entity records (performers, studios, scenes, tags, images)
#[async_trait]
pub trait EntityRepository: Send {
    /// Returns `None` if no record with this id and type exists. Merged-away
    /// records are returned with `redirect_id` set.
    async fn get_entity(
        &mut self,
        entity_type: TargetType,
        id: EntityId,
    ) -> Result<Option<EntityRecord>, EditError>;

    async fn put_entity(&mut self, record: &EntityRecord) -> Result<(), EditError>;

    /// Delete a record. Tombstones redirecting to it are deleted with it.
    async fn delete_entity(&mut self, entity_type: TargetType, id: EntityId) -> Result<bool, EditError>;

    /// Live (non-merged) records whose reference fields point at `id`.
    async fn find_referrers(&mut self, id: EntityId) -> Result<Vec<EntityRecord>, EditError>;
}

#[async_trait]
pub trait StoreTransaction: EditRepository + EntityRepository + Send {
    async fn commit(self: Box<Self>) -> Result<(), EditError>;

    async fn rollback(self: Box<Self>) -> Result<(), EditError>;
}
