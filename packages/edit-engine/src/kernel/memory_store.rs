// In-memory edit store
//
// A transaction takes the store-wide lock and works on a copy of the state;
// commit swaps the copy in. This gives serializable isolation, which is all
// the engine asks of a store. Used for tests and single-process embedding.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::store::{BaseEditStore, EditRepository, EntityRepository, StoreTransaction};
use crate::common::{EditId, EntityId, UserId};
use crate::domains::edits::error::EditError;
use crate::domains::edits::models::{
    Edit, EditComment, EditStatus, EntityRecord, TargetType, Vote,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    edits: BTreeMap<EditId, Edit>,
    votes: BTreeMap<(EditId, UserId), Vote>,
    comments: Vec<EditComment>,
    entities: HashMap<EntityId, EntityRecord>,
}

#[derive(Clone)]
pub struct MemoryEditStore {
    state: Arc<Mutex<MemoryState>>,
    lock_timeout: Duration,
    /// Commits of entity-writing transactions still to fail on purpose.
    injected_failures: Arc<AtomicUsize>,
    entity_commits: Arc<AtomicUsize>,
}

impl Default for MemoryEditStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEditStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(Duration::from_secs(5))
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            lock_timeout,
            injected_failures: Arc::new(AtomicUsize::new(0)),
            entity_commits: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make the next `count` commits that touch entity records fail with a
    /// transient error, leaving the store unchanged.
    pub fn fail_next_entity_commits(&self, count: usize) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    /// Number of committed transactions that wrote entity records.
    pub fn entity_commit_count(&self) -> usize {
        self.entity_commits.load(Ordering::SeqCst)
    }

    /// Hold the store lock, blocking every transaction until the guard drops.
    pub async fn lock(&self) -> StoreLock {
        StoreLock {
            _guard: self.state.clone().lock_owned().await,
        }
    }
}

pub struct StoreLock {
    _guard: OwnedMutexGuard<MemoryState>,
}

#[async_trait]
impl BaseEditStore for MemoryEditStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, EditError> {
        let guard = tokio::time::timeout(self.lock_timeout, self.state.clone().lock_owned())
            .await
            .map_err(|_| {
                EditError::TransientStoreFailure(format!(
                    "store lock not acquired within {:?}",
                    self.lock_timeout
                ))
            })?;
        let working = (*guard).clone();

        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            wrote_entities: false,
            injected_failures: self.injected_failures.clone(),
            entity_commits: self.entity_commits.clone(),
        }))
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    wrote_entities: bool,
    injected_failures: Arc<AtomicUsize>,
    entity_commits: Arc<AtomicUsize>,
}

#[async_trait]
impl EditRepository for MemoryTransaction {
    async fn insert_edit(&mut self, edit: &Edit) -> Result<(), EditError> {
        if self.working.edits.contains_key(&edit.id) {
            return Err(EditError::conflict(format!("edit {} already exists", edit.id)));
        }
        self.working.edits.insert(edit.id, edit.clone());
        Ok(())
    }

    async fn find_edit(&mut self, id: EditId) -> Result<Option<Edit>, EditError> {
        Ok(self.working.edits.get(&id).cloned())
    }

    // The store lock already serializes transactions.
    async fn read_edit(&mut self, id: EditId) -> Result<Option<Edit>, EditError> {
        self.find_edit(id).await
    }

    async fn update_edit(&mut self, edit: &Edit, expected: EditStatus) -> Result<bool, EditError> {
        match self.working.edits.get_mut(&edit.id) {
            Some(stored) if stored.status == expected => {
                *stored = edit.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(EditError::not_found("edit", edit.id)),
        }
    }

    async fn find_edits_by_status(&mut self, statuses: &[EditStatus]) -> Result<Vec<Edit>, EditError> {
        let mut edits: Vec<Edit> = self
            .working
            .edits
            .values()
            .filter(|edit| statuses.contains(&edit.status))
            .cloned()
            .collect();
        edits.sort_by_key(|edit| (edit.created_at, edit.id));
        Ok(edits)
    }

    async fn upsert_vote(&mut self, vote: &Vote) -> Result<(), EditError> {
        if !self.working.edits.contains_key(&vote.edit_id) {
            return Err(EditError::not_found("edit", vote.edit_id));
        }
        self.working
            .votes
            .insert((vote.edit_id, vote.voter_id), vote.clone());
        Ok(())
    }

    async fn find_votes(&mut self, edit_id: EditId) -> Result<Vec<Vote>, EditError> {
        let mut votes: Vec<Vote> = self
            .working
            .votes
            .values()
            .filter(|vote| vote.edit_id == edit_id)
            .cloned()
            .collect();
        votes.sort_by_key(|vote| vote.cast_at);
        Ok(votes)
    }

    async fn delete_votes(&mut self, edit_id: EditId) -> Result<u64, EditError> {
        let before = self.working.votes.len();
        self.working.votes.retain(|(id, _), _| *id != edit_id);
        Ok((before - self.working.votes.len()) as u64)
    }

    async fn insert_comment(&mut self, comment: &EditComment) -> Result<(), EditError> {
        if !self.working.edits.contains_key(&comment.edit_id) {
            return Err(EditError::not_found("edit", comment.edit_id));
        }
        self.working.comments.push(comment.clone());
        Ok(())
    }

    async fn find_comments(&mut self, edit_id: EditId) -> Result<Vec<EditComment>, EditError> {
        Ok(self
            .working
            .comments
            .iter()
            .filter(|comment| comment.edit_id == edit_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EntityRepository for MemoryTransaction {
    async fn get_entity(
        &mut self,
        entity_type: TargetType,
        id: EntityId,
    ) -> Result<Option<EntityRecord>, EditError> {
        Ok(self
            .working
            .entities
            .get(&id)
            .filter(|record| record.entity_type == entity_type)
            .cloned())
    }

    async fn put_entity(&mut self, record: &EntityRecord) -> Result<(), EditError> {
        self.working.entities.insert(record.id, record.clone());
        self.wrote_entities = true;
        Ok(())
    }

    async fn delete_entity(&mut self, entity_type: TargetType, id: EntityId) -> Result<bool, EditError> {
        let matches = self
            .working
            .entities
            .get(&id)
            .is_some_and(|record| record.entity_type == entity_type);
        if !matches {
            return Ok(false);
        }

        // Mirror `ON DELETE CASCADE` on `redirect_id`.
        let mut doomed = vec![id];
        while let Some(next) = doomed.pop() {
            self.working.entities.remove(&next);
            doomed.extend(
                self.working
                    .entities
                    .values()
                    .filter(|record| record.redirect_id == Some(next))
                    .map(|record| record.id),
            );
        }
        self.wrote_entities = true;
        Ok(true)
    }

    async fn find_referrers(&mut self, id: EntityId) -> Result<Vec<EntityRecord>, EditError> {
        let mut referrers: Vec<EntityRecord> = self
            .working
            .entities
            .values()
            .filter(|record| !record.is_tombstone() && record.references_entity(id))
            .cloned()
            .collect();
        referrers.sort_by_key(|record| record.id);
        Ok(referrers)
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<(), EditError> {
        let mut this = self;
        if this.wrote_entities {
            let injected = this
                .injected_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if injected {
                return Err(EditError::TransientStoreFailure(
                    "injected commit failure".to_string(),
                ));
            }
            this.entity_commits.fetch_add(1, Ordering::SeqCst);
        }

        let working = std::mem::take(&mut this.working);
        *this.guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), EditError> {
        Ok(())
    }
}
