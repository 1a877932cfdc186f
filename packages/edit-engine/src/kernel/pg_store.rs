// Postgres edit store
//
// Edits, votes and comments live in their own tables; canonical records are
// stored as JSONB with a side table of outgoing references so that
// `find_referrers` is an index lookup. Every transaction sets `lock_timeout`
// and `statement_timeout` so that a stuck row lock fails fast instead of
// stalling the scheduler.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

use super::store::{BaseEditStore, EditRepository, EntityRepository, StoreTransaction};
use crate::common::{EditId, EntityId, UserId};
use crate::config::ConfigHandle;
use crate::domains::edits::error::EditError;
use crate::domains::edits::models::{
    Edit, EditComment, EditPayload, EditStatus, EntityRecord, TargetType, Vote,
};

/// Apply pending schema migrations.
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run migrations")
}

#[derive(Clone)]
pub struct PgEditStore {
    pool: PgPool,
    config: ConfigHandle,
}

impl PgEditStore {
    pub fn new(pool: PgPool, config: ConfigHandle) -> Self {
        Self { pool, config }
    }
}

#[async_trait]
impl BaseEditStore for PgEditStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, EditError> {
        let timeout_ms = self.config.current().transaction_timeout.as_millis();
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", timeout_ms))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("SET LOCAL statement_timeout = '{}ms'", timeout_ms))
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgTransaction { tx }))
    }
}

pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

// =============================================================================
// Row types
// =============================================================================

#[derive(sqlx::FromRow)]
struct EditRow {
    id: EditId,
    target_type: String,
    target_id: Option<EntityId>,
    operation: String,
    payload: Json<EditPayload>,
    status: String,
    created_by: UserId,
    update_count: i32,
    apply_attempts: i32,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    applied_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
}

impl TryFrom<EditRow> for Edit {
    type Error = EditError;

    fn try_from(row: EditRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            target_type: row.target_type.parse()?,
            target_id: row.target_id,
            operation: row.operation.parse()?,
            payload: row.payload.0,
            status: row.status.parse()?,
            created_by: row.created_by,
            update_count: row.update_count,
            apply_attempts: row.apply_attempts,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
            applied_at: row.applied_at,
            closed_at: row.closed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct VoteRow {
    edit_id: EditId,
    voter_id: UserId,
    value: String,
    cast_at: DateTime<Utc>,
}

impl TryFrom<VoteRow> for Vote {
    type Error = EditError;

    fn try_from(row: VoteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            edit_id: row.edit_id,
            voter_id: row.voter_id,
            value: row.value.parse()?,
            cast_at: row.cast_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EntityRow {
    id: EntityId,
    entity_type: String,
    fields: Json<Map<String, Value>>,
    redirect_id: Option<EntityId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EntityRow> for EntityRecord {
    type Error = EditError;

    fn try_from(row: EntityRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            entity_type: row.entity_type.parse()?,
            fields: row.fields.0,
            redirect_id: row.redirect_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, EditError>
where
    T: TryFrom<R, Error = EditError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// =============================================================================
// Edits, votes, comments
// =============================================================================

#[async_trait]
impl EditRepository for PgTransaction {
    async fn insert_edit(&mut self, edit: &Edit) -> Result<(), EditError> {
        sqlx::query(
            r#"
            INSERT INTO edits (
                id, target_type, target_id, operation, payload, status, created_by,
                update_count, apply_attempts, failure_reason,
                created_at, updated_at, applied_at, closed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(edit.id)
        .bind(edit.target_type.to_string())
        .bind(edit.target_id)
        .bind(edit.operation.to_string())
        .bind(Json(&edit.payload))
        .bind(edit.status.to_string())
        .bind(edit.created_by)
        .bind(edit.update_count)
        .bind(edit.apply_attempts)
        .bind(&edit.failure_reason)
        .bind(edit.created_at)
        .bind(edit.updated_at)
        .bind(edit.applied_at)
        .bind(edit.closed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_edit(&mut self, id: EditId) -> Result<Option<Edit>, EditError> {
        let row = sqlx::query_as::<_, EditRow>("SELECT * FROM edits WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Edit::try_from).transpose()
    }

    async fn read_edit(&mut self, id: EditId) -> Result<Option<Edit>, EditError> {
        let row = sqlx::query_as::<_, EditRow>("SELECT * FROM edits WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Edit::try_from).transpose()
    }

    async fn update_edit(&mut self, edit: &Edit, expected: EditStatus) -> Result<bool, EditError> {
        let result = sqlx::query(
            r#"
            UPDATE edits
            SET target_id = $2,
                payload = $3,
                status = $4,
                update_count = $5,
                apply_attempts = $6,
                failure_reason = $7,
                updated_at = $8,
                applied_at = $9,
                closed_at = $10
            WHERE id = $1 AND status = $11
            "#,
        )
        .bind(edit.id)
        .bind(edit.target_id)
        .bind(Json(&edit.payload))
        .bind(edit.status.to_string())
        .bind(edit.update_count)
        .bind(edit.apply_attempts)
        .bind(&edit.failure_reason)
        .bind(edit.updated_at)
        .bind(edit.applied_at)
        .bind(edit.closed_at)
        .bind(expected.to_string())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_edits_by_status(&mut self, statuses: &[EditStatus]) -> Result<Vec<Edit>, EditError> {
        let statuses: Vec<String> = statuses.iter().map(ToString::to_string).collect();
        let rows = sqlx::query_as::<_, EditRow>(
            r#"
            SELECT * FROM edits
            WHERE status = ANY($1)
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(statuses)
        .fetch_all(&mut *self.tx)
        .await?;
        convert_all(rows)
    }

    async fn upsert_vote(&mut self, vote: &Vote) -> Result<(), EditError> {
        sqlx::query(
            r#"
            INSERT INTO edit_votes (edit_id, voter_id, value, cast_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (edit_id, voter_id)
            DO UPDATE SET value = EXCLUDED.value, cast_at = EXCLUDED.cast_at
            "#,
        )
        .bind(vote.edit_id)
        .bind(vote.voter_id)
        .bind(vote.value.to_string())
        .bind(vote.cast_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_votes(&mut self, edit_id: EditId) -> Result<Vec<Vote>, EditError> {
        let rows = sqlx::query_as::<_, VoteRow>(
            "SELECT * FROM edit_votes WHERE edit_id = $1 ORDER BY cast_at ASC",
        )
        .bind(edit_id)
        .fetch_all(&mut *self.tx)
        .await?;
        convert_all(rows)
    }

    async fn delete_votes(&mut self, edit_id: EditId) -> Result<u64, EditError> {
        let result = sqlx::query("DELETE FROM edit_votes WHERE edit_id = $1")
            .bind(edit_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_comment(&mut self, comment: &EditComment) -> Result<(), EditError> {
        sqlx::query(
            r#"
            INSERT INTO edit_comments (id, edit_id, author_id, text, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(comment.id)
        .bind(comment.edit_id)
        .bind(comment.author_id)
        .bind(&comment.text)
        .bind(comment.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_comments(&mut self, edit_id: EditId) -> Result<Vec<EditComment>, EditError> {
        sqlx::query_as::<_, EditComment>(
            "SELECT * FROM edit_comments WHERE edit_id = $1 ORDER BY created_at ASC",
        )
        .bind(edit_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(Into::into)
    }
}

// =============================================================================
// Canonical entities
// =============================================================================

#[async_trait]
impl EntityRepository for PgTransaction {
    async fn get_entity(
        &mut self,
        entity_type: TargetType,
        id: EntityId,
    ) -> Result<Option<EntityRecord>, EditError> {
        let row = sqlx::query_as::<_, EntityRow>(
            "SELECT * FROM entities WHERE id = $1 AND entity_type = $2 FOR UPDATE",
        )
        .bind(id)
        .bind(entity_type.to_string())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(EntityRecord::try_from).transpose()
    }

    async fn put_entity(&mut self, record: &EntityRecord) -> Result<(), EditError> {
        sqlx::query(
            r#"
            INSERT INTO entities (id, entity_type, fields, redirect_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET fields = EXCLUDED.fields,
                redirect_id = EXCLUDED.redirect_id,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(record.id)
        .bind(record.entity_type.to_string())
        .bind(Json(&record.fields))
        .bind(record.redirect_id)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await?;

        sqlx::query("DELETE FROM entity_references WHERE source_id = $1")
            .bind(record.id)
            .execute(&mut *self.tx)
            .await?;

        if record.is_tombstone() {
            return Ok(());
        }

        let targets: Vec<EntityId> = record.references().into_iter().map(|(_, id)| id).collect();
        if !targets.is_empty() {
            sqlx::query(
                r#"
                INSERT INTO entity_references (source_id, target_id)
                SELECT $1, target FROM UNNEST($2::uuid[]) AS target
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(record.id)
            .bind(targets)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn delete_entity(&mut self, entity_type: TargetType, id: EntityId) -> Result<bool, EditError> {
        let result = sqlx::query("DELETE FROM entities WHERE id = $1 AND entity_type = $2")
            .bind(id)
            .bind(entity_type.to_string())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_referrers(&mut self, id: EntityId) -> Result<Vec<EntityRecord>, EditError> {
        let rows = sqlx::query_as::<_, EntityRow>(
            r#"
            SELECT e.* FROM entities e
            INNER JOIN entity_references r ON r.source_id = e.id
            WHERE r.target_id = $1 AND e.redirect_id IS NULL
            ORDER BY e.id
            FOR UPDATE OF e
            "#,
        )
        .bind(id)
        .fetch_all(&mut *self.tx)
        .await?;
        convert_all(rows)
    }
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn commit(self: Box<Self>) -> Result<(), EditError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), EditError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
