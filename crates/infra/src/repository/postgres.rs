//! PostgreSQL-backed stores.
//!
//! Runtime queries only (no compile-time checked macros), so the crate builds
//! without a database. Error mapping:
//!
//! | sqlx error | code | RepositoryError |
//! |---|---|---|
//! | Database (unique violation) | `23505` | `AlreadyExists` |
//! | anything else | | `Storage` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::instrument;
use uuid::Uuid;

use songsmith_billing::{EntitlementChange, Tier, TokenCeilings, User};
use songsmith_core::{SongId, UserId};
use songsmith_songs::{MetadataPatch, Song, SongStatus, Transition};

use super::{RepositoryError, SongRepository, SongStats, UserStore};

const MIGRATION: &str = include_str!("../../migrations/0001_init.sql");

const SONG_COLUMNS: &str = "id, owner_id, title, description, prompt, token_budget, status, \
     result_reference, error_detail, created_at, updated_at";

const USER_COLUMNS: &str =
    "id, email, tier, token_budget, external_billing_id, created_at, updated_at";

/// Status compare-and-set. `updated_at` only moves forward, even when a
/// metadata write with a later timestamp landed after the row was read.
fn transition_sql() -> String {
    format!(
        r#"
        UPDATE songs
           SET status = $3, result_reference = $4, error_detail = $5,
               updated_at = GREATEST(updated_at, $6)
         WHERE id = $1 AND status = $2
        RETURNING {SONG_COLUMNS}
        "#
    )
}

fn metadata_sql() -> String {
    format!(
        r#"
        UPDATE songs
           SET title = $3, description = $4, updated_at = GREATEST(updated_at, $5)
         WHERE id = $1 AND owner_id = $2
        RETURNING {SONG_COLUMNS}
        "#
    )
}

/// Open a connection pool.
pub async fn connect(database_url: &str) -> Result<PgPool, RepositoryError> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))
}

/// Apply the schema. Idempotent.
pub async fn run_migrations(pool: &PgPool) -> Result<(), RepositoryError> {
    sqlx::raw_sql(MIGRATION)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("migrate", e))?;
    Ok(())
}

/// Postgres-backed song repository.
#[derive(Debug, Clone)]
pub struct PostgresSongRepository {
    pool: Arc<PgPool>,
}

impl PostgresSongRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl SongRepository for PostgresSongRepository {
    #[instrument(skip(self, song), fields(song_id = %song.id), err)]
    async fn insert(&self, song: Song) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO songs (id, owner_id, title, description, prompt, token_budget, status,
                               result_reference, error_detail, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(song.id.as_uuid())
        .bind(song.owner_id.as_uuid())
        .bind(&song.title)
        .bind(&song.description)
        .bind(&song.prompt)
        .bind(budget_to_db(song.token_budget)?)
        .bind(song.status.as_str())
        .bind(&song.result_reference)
        .bind(&song.error_detail)
        .bind(song.created_at)
        .bind(song.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_song", e))?;
        Ok(())
    }

    async fn get(&self, id: SongId) -> Result<Option<Song>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {SONG_COLUMNS} FROM songs WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_song", e))?;
        row.as_ref().map(song_from_row).transpose()
    }

    async fn get_owned(&self, owner: UserId, id: SongId) -> Result<Option<Song>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SONG_COLUMNS} FROM songs WHERE id = $1 AND owner_id = $2"
        ))
        .bind(id.as_uuid())
        .bind(owner.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_owned_song", e))?;
        row.as_ref().map(song_from_row).transpose()
    }

    async fn list_by_owner(&self, owner: UserId) -> Result<Vec<Song>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SONG_COLUMNS} FROM songs WHERE owner_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(owner.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_songs", e))?;
        rows.iter().map(song_from_row).collect()
    }

    #[instrument(skip(self, transition), fields(song_id = %id, to = %transition.target()), err)]
    async fn transition(
        &self,
        id: SongId,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<Option<Song>, RepositoryError> {
        let Some(mut next) = self.get(id).await? else {
            return Ok(None);
        };
        if next.status != transition.expected_from() {
            return Ok(None);
        }
        next.apply(transition, now)?;

        // The status predicate makes this a compare-and-set: a concurrent
        // writer that got there first leaves zero rows to update.
        let row = sqlx::query(&transition_sql())
        .bind(id.as_uuid())
        .bind(transition.expected_from().as_str())
        .bind(next.status.as_str())
        .bind(&next.result_reference)
        .bind(&next.error_detail)
        .bind(next.updated_at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("transition_song", e))?;
        row.as_ref().map(song_from_row).transpose()
    }

    async fn update_metadata(
        &self,
        owner: UserId,
        id: SongId,
        patch: MetadataPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Song>, RepositoryError> {
        let Some(mut next) = self.get_owned(owner, id).await? else {
            return Ok(None);
        };
        next.apply_metadata(patch, now)?;

        let row = sqlx::query(&metadata_sql())
        .bind(id.as_uuid())
        .bind(owner.as_uuid())
        .bind(&next.title)
        .bind(&next.description)
        .bind(next.updated_at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_song_metadata", e))?;
        row.as_ref().map(song_from_row).transpose()
    }

    #[instrument(skip(self), fields(song_id = %id, user_id = %owner), err)]
    async fn delete_owned(&self, owner: UserId, id: SongId) -> Result<Option<Song>, RepositoryError> {
        let row = sqlx::query(&format!(
            "DELETE FROM songs WHERE id = $1 AND owner_id = $2 RETURNING {SONG_COLUMNS}"
        ))
        .bind(id.as_uuid())
        .bind(owner.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete_song", e))?;
        row.as_ref().map(song_from_row).transpose()
    }

    async fn stale_processing(&self, cutoff: DateTime<Utc>) -> Result<Vec<SongId>, RepositoryError> {
        let rows = sqlx::query("SELECT id FROM songs WHERE status = 'processing' AND updated_at < $1")
            .bind(cutoff)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("stale_processing", e))?;
        rows.iter()
            .map(|row| {
                row.try_get::<Uuid, _>("id")
                    .map(SongId::from_uuid)
                    .map_err(|e| map_sqlx_error("stale_processing", e))
            })
            .collect()
    }

    async fn stats(&self) -> Result<SongStats, RepositoryError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM songs GROUP BY status")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("song_stats", e))?;

        let mut stats = SongStats::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(|e| map_sqlx_error("song_stats", e))?;
            let n: i64 = row.try_get("n").map_err(|e| map_sqlx_error("song_stats", e))?;
            let n = usize::try_from(n).unwrap_or(0);
            match SongStatus::parse(&status) {
                Some(SongStatus::Pending) => stats.pending = n,
                Some(SongStatus::Processing) => stats.processing = n,
                Some(SongStatus::Completed) => stats.completed = n,
                Some(SongStatus::Failed) => stats.failed = n,
                None => {}
            }
        }
        Ok(stats)
    }
}

/// Postgres-backed entitlement store.
#[derive(Debug, Clone)]
pub struct PostgresUserStore {
    pool: Arc<PgPool>,
}

impl PostgresUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl UserStore for PostgresUserStore {
    #[instrument(skip(self, user), fields(user_id = %user.id), err)]
    async fn insert(&self, user: User) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, tier, token_budget, external_billing_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(&user.email)
        .bind(user.tier.as_str())
        .bind(budget_to_db(user.token_budget)?)
        .bind(&user.external_billing_id)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_user", e))?;
        Ok(())
    }

    async fn get(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_user", e))?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_by_billing_id(&self, billing_id: &str) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE external_billing_id = $1 ORDER BY updated_at DESC LIMIT 1"
        ))
        .bind(billing_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_user_by_billing_id", e))?;
        row.as_ref().map(user_from_row).transpose()
    }

    #[instrument(skip(self, change, ceilings), fields(user_id = %id), err)]
    async fn apply_change(
        &self,
        id: UserId,
        change: &EntitlementChange,
        ceilings: &TokenCeilings,
        now: DateTime<Utc>,
    ) -> Result<Option<(User, bool)>, RepositoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_user", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut user = user_from_row(&row)?;
        let changed = user.apply_change(change, ceilings, now)?;

        if changed {
            sqlx::query(
                r#"
                UPDATE users
                   SET tier = $2, token_budget = $3, external_billing_id = $4, updated_at = $5
                 WHERE id = $1
                "#,
            )
            .bind(id.as_uuid())
            .bind(user.tier.as_str())
            .bind(budget_to_db(user.token_budget)?)
            .bind(&user.external_billing_id)
            .bind(user.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_user", e))?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(Some((user, changed)))
    }
}

fn song_from_row(row: &PgRow) -> Result<Song, RepositoryError> {
    let decode = |e| map_sqlx_error("decode_song", e);
    let status: String = row.try_get("status").map_err(decode)?;
    let status = SongStatus::parse(&status)
        .ok_or_else(|| RepositoryError::Storage(format!("unknown song status: {status}")))?;

    Ok(Song {
        id: SongId::from_uuid(row.try_get::<Uuid, _>("id").map_err(decode)?),
        owner_id: UserId::from_uuid(row.try_get::<Uuid, _>("owner_id").map_err(decode)?),
        title: row.try_get("title").map_err(decode)?,
        description: row.try_get("description").map_err(decode)?,
        prompt: row.try_get("prompt").map_err(decode)?,
        token_budget: budget_from_db(row.try_get("token_budget").map_err(decode)?)?,
        status,
        result_reference: row.try_get("result_reference").map_err(decode)?,
        error_detail: row.try_get("error_detail").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn user_from_row(row: &PgRow) -> Result<User, RepositoryError> {
    let decode = |e| map_sqlx_error("decode_user", e);
    let tier: String = row.try_get("tier").map_err(decode)?;
    let tier = Tier::parse(&tier)
        .ok_or_else(|| RepositoryError::Storage(format!("unknown tier: {tier}")))?;

    Ok(User {
        id: UserId::from_uuid(row.try_get::<Uuid, _>("id").map_err(decode)?),
        email: row.try_get("email").map_err(decode)?,
        tier,
        token_budget: budget_from_db(row.try_get("token_budget").map_err(decode)?)?,
        external_billing_id: row.try_get("external_billing_id").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn budget_to_db(budget: u32) -> Result<i32, RepositoryError> {
    i32::try_from(budget)
        .map_err(|_| RepositoryError::Storage(format!("token budget out of range: {budget}")))
}

fn budget_from_db(budget: i32) -> Result<u32, RepositoryError> {
    u32::try_from(budget)
        .map_err(|_| RepositoryError::Storage(format!("negative token budget: {budget}")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => RepositoryError::AlreadyExists(msg),
                _ => RepositoryError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            RepositoryError::Storage(format!("connection pool closed in {}", operation))
        }
        other => RepositoryError::Storage(format!("sqlx error in {}: {}", operation, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn song_updates_never_move_updated_at_backwards() {
        for sql in [transition_sql(), metadata_sql()] {
            assert!(
                sql.contains("updated_at = GREATEST(updated_at, $"),
                "non-monotonic updated_at in: {sql}"
            );
        }
    }

    #[test]
    fn transition_is_a_status_compare_and_set() {
        let sql = transition_sql();
        assert!(sql.contains("WHERE id = $1 AND status = $2"));
        assert!(sql.contains(SONG_COLUMNS));
    }
}
