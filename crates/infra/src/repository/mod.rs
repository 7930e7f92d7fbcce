//! Song and user persistence.
//!
//! Two interchangeable implementations of each store: in-memory (tests, local
//! development) and PostgreSQL. Every song lifecycle transition is a
//! compare-and-set on the expected predecessor status, and every entitlement
//! change is applied under a row lock, so concurrent writers never interleave
//! half-applied state.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use songsmith_billing::{EntitlementChange, TokenCeilings, User};
use songsmith_core::{DomainError, SongId, UserId};
use songsmith_songs::{MetadataPatch, Song, Transition};

pub use memory::{InMemorySongRepository, InMemoryUserStore};
pub use postgres::{connect, run_migrations, PostgresSongRepository, PostgresUserStore};

/// Repository error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// The stored record refused the change (domain rule violation).
    #[error(transparent)]
    Rejected(#[from] DomainError),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Song counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SongStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Durable record of songs.
#[async_trait]
pub trait SongRepository: Send + Sync {
    /// Persist a new song.
    async fn insert(&self, song: Song) -> Result<(), RepositoryError>;

    /// Load a song regardless of owner (lifecycle use only).
    async fn get(&self, id: SongId) -> Result<Option<Song>, RepositoryError>;

    /// Load a song owned by `owner`. A foreign song is indistinguishable from a missing one.
    async fn get_owned(&self, owner: UserId, id: SongId) -> Result<Option<Song>, RepositoryError>;

    /// All songs of `owner`, newest first (ties broken by id, descending).
    async fn list_by_owner(&self, owner: UserId) -> Result<Vec<Song>, RepositoryError>;

    /// Compare-and-set a lifecycle transition.
    ///
    /// Returns the updated song, or `None` when the song is gone or its status
    /// is not the transition's expected predecessor.
    async fn transition(
        &self,
        id: SongId,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<Option<Song>, RepositoryError>;

    /// Apply owner-editable metadata. `None` when missing or foreign.
    async fn update_metadata(
        &self,
        owner: UserId,
        id: SongId,
        patch: MetadataPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Song>, RepositoryError>;

    /// Delete a song owned by `owner`, returning the removed record.
    async fn delete_owned(&self, owner: UserId, id: SongId) -> Result<Option<Song>, RepositoryError>;

    /// Ids of songs that have been Processing since before `cutoff`.
    async fn stale_processing(&self, cutoff: DateTime<Utc>) -> Result<Vec<SongId>, RepositoryError>;

    async fn stats(&self) -> Result<SongStats, RepositoryError>;
}

/// Entitlement store.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Persist a new user. Duplicate id or email is `AlreadyExists`.
    async fn insert(&self, user: User) -> Result<(), RepositoryError>;

    async fn get(&self, id: UserId) -> Result<Option<User>, RepositoryError>;

    async fn find_by_billing_id(&self, billing_id: &str) -> Result<Option<User>, RepositoryError>;

    /// Atomically apply an entitlement change.
    ///
    /// Returns the resulting user and whether anything changed, or `None`
    /// when the user does not exist.
    async fn apply_change(
        &self,
        id: UserId,
        change: &EntitlementChange,
        ceilings: &TokenCeilings,
        now: DateTime<Utc>,
    ) -> Result<Option<(User, bool)>, RepositoryError>;
}

/// Newest first, ties by id descending.
pub(crate) fn newest_first(a: &Song, b: &Song) -> core::cmp::Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}
