//! Owner-facing song operations.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use songsmith_billing::TokenCeilings;
use songsmith_core::{DomainError, SongId, UserId};
use songsmith_songs::{MetadataPatch, NewSong, Song};

use crate::error::ServiceError;
use crate::jobs::BackgroundExecutor;
use crate::repository::{SongRepository, UserStore};
use crate::storage::StorageBackend;

/// Input of `SongService::create`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateSong {
    pub prompt: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub requested_budget: Option<u32>,
}

/// Result of an anonymous generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnonymousSong {
    pub song_id: Uuid,
    pub download_url: String,
}

pub struct SongService {
    songs: Arc<dyn SongRepository>,
    users: Arc<dyn UserStore>,
    storage: Arc<dyn StorageBackend>,
    executor: BackgroundExecutor,
    ceilings: TokenCeilings,
}

impl SongService {
    pub fn new(
        songs: Arc<dyn SongRepository>,
        users: Arc<dyn UserStore>,
        storage: Arc<dyn StorageBackend>,
        executor: BackgroundExecutor,
        ceilings: TokenCeilings,
    ) -> Self {
        Self {
            songs,
            users,
            storage,
            executor,
            ceilings,
        }
    }

    pub fn executor(&self) -> &BackgroundExecutor {
        &self.executor
    }

    /// Persist a Pending song and hand it to the executor.
    ///
    /// Generation failures never surface here; they end up on the song.
    #[instrument(skip(self, input), fields(user_id = %owner))]
    pub async fn create(&self, owner: UserId, input: CreateSong) -> Result<Song, ServiceError> {
        let user = self
            .users
            .get(owner)
            .await?
            .ok_or_else(DomainError::not_found)?;
        let token_budget = self
            .ceilings
            .resolve_song_budget(&user, input.requested_budget)?;

        let song = Song::create(
            NewSong {
                owner_id: owner,
                title: input.title,
                description: input.description,
                prompt: input.prompt,
                token_budget,
            },
            Utc::now(),
        )?;
        self.songs.insert(song.clone()).await?;
        info!(song_id = %song.id, token_budget, tier = %user.tier, "song created");

        self.executor.submit(song.id);
        Ok(song)
    }

    pub async fn get(&self, owner: UserId, id: SongId) -> Result<Song, ServiceError> {
        Ok(self
            .songs
            .get_owned(owner, id)
            .await?
            .ok_or_else(DomainError::not_found)?)
    }

    pub async fn list(&self, owner: UserId) -> Result<Vec<Song>, ServiceError> {
        Ok(self.songs.list_by_owner(owner).await?)
    }

    pub async fn update_metadata(
        &self,
        owner: UserId,
        id: SongId,
        patch: MetadataPatch,
    ) -> Result<Song, ServiceError> {
        Ok(self
            .songs
            .update_metadata(owner, id, patch, Utc::now())
            .await?
            .ok_or_else(DomainError::not_found)?)
    }

    /// Delete the record, then release its artifact best-effort.
    #[instrument(skip(self), fields(user_id = %owner, song_id = %id))]
    pub async fn delete(&self, owner: UserId, id: SongId) -> Result<Song, ServiceError> {
        let song = self
            .songs
            .delete_owned(owner, id)
            .await?
            .ok_or_else(DomainError::not_found)?;

        if let Some(reference) = &song.result_reference {
            match self.storage.key_for(reference) {
                Some(key) => {
                    if let Err(e) = self.storage.delete(&key).await {
                        warn!(%reference, error = %e, "artifact delete failed; record already removed");
                    }
                }
                None => warn!(%reference, "reference not owned by the active storage backend"),
            }
        }
        info!("song deleted");
        Ok(song)
    }

    /// Generate synchronously at the free ceiling, without a record.
    pub async fn generate_anonymous(&self, prompt: &str) -> Result<AnonymousSong, ServiceError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(DomainError::validation("prompt cannot be empty").into());
        }
        let artifact = self
            .executor
            .lifecycle()
            .run_detached(prompt, self.ceilings.free)
            .await?;
        Ok(AnonymousSong {
            song_id: artifact.id,
            download_url: artifact.reference,
        })
    }
}
