//! In-memory stores for tests and local development.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use songsmith_billing::{EntitlementChange, TokenCeilings, User};
use songsmith_core::{SongId, UserId};
use songsmith_songs::{MetadataPatch, Song, SongStatus, Transition};

use super::{newest_first, RepositoryError, SongRepository, SongStats, UserStore};

// A panic while holding the lock cannot leave a half-written record: every
// mutation below clones, mutates, then inserts.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory song repository.
#[derive(Debug, Default)]
pub struct InMemorySongRepository {
    songs: RwLock<HashMap<SongId, Song>>,
}

impl InMemorySongRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl SongRepository for InMemorySongRepository {
    async fn insert(&self, song: Song) -> Result<(), RepositoryError> {
        let mut songs = write(&self.songs);
        if songs.contains_key(&song.id) {
            return Err(RepositoryError::AlreadyExists(format!("song {}", song.id)));
        }
        songs.insert(song.id, song);
        Ok(())
    }

    async fn get(&self, id: SongId) -> Result<Option<Song>, RepositoryError> {
        Ok(read(&self.songs).get(&id).cloned())
    }

    async fn get_owned(&self, owner: UserId, id: SongId) -> Result<Option<Song>, RepositoryError> {
        Ok(read(&self.songs)
            .get(&id)
            .filter(|s| s.owner_id == owner)
            .cloned())
    }

    async fn list_by_owner(&self, owner: UserId) -> Result<Vec<Song>, RepositoryError> {
        let mut out: Vec<Song> = read(&self.songs)
            .values()
            .filter(|s| s.owner_id == owner)
            .cloned()
            .collect();
        out.sort_by(newest_first);
        Ok(out)
    }

    async fn transition(
        &self,
        id: SongId,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<Option<Song>, RepositoryError> {
        let mut songs = write(&self.songs);
        let Some(current) = songs.get(&id) else {
            return Ok(None);
        };
        if current.status != transition.expected_from() {
            return Ok(None);
        }

        let mut next = current.clone();
        next.apply(transition, now)?;
        songs.insert(id, next.clone());
        Ok(Some(next))
    }

    async fn update_metadata(
        &self,
        owner: UserId,
        id: SongId,
        patch: MetadataPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Song>, RepositoryError> {
        let mut songs = write(&self.songs);
        let Some(current) = songs.get(&id).filter(|s| s.owner_id == owner) else {
            return Ok(None);
        };

        let mut next = current.clone();
        next.apply_metadata(patch, now)?;
        songs.insert(id, next.clone());
        Ok(Some(next))
    }

    async fn delete_owned(&self, owner: UserId, id: SongId) -> Result<Option<Song>, RepositoryError> {
        let mut songs = write(&self.songs);
        match songs.get(&id) {
            Some(s) if s.owner_id == owner => Ok(songs.remove(&id)),
            _ => Ok(None),
        }
    }

    async fn stale_processing(&self, cutoff: DateTime<Utc>) -> Result<Vec<SongId>, RepositoryError> {
        Ok(read(&self.songs)
            .values()
            .filter(|s| s.status == SongStatus::Processing && s.updated_at < cutoff)
            .map(|s| s.id)
            .collect())
    }

    async fn stats(&self) -> Result<SongStats, RepositoryError> {
        let mut stats = SongStats::default();
        for song in read(&self.songs).values() {
            match song.status {
                SongStatus::Pending => stats.pending += 1,
                SongStatus::Processing => stats.processing += 1,
                SongStatus::Completed => stats.completed += 1,
                SongStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}

/// In-memory entitlement store.
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<UserId, User>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn insert(&self, user: User) -> Result<(), RepositoryError> {
        let mut users = write(&self.users);
        if users.contains_key(&user.id) {
            return Err(RepositoryError::AlreadyExists(format!("user {}", user.id)));
        }
        if users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(RepositoryError::AlreadyExists(format!("email {}", user.email)));
        }
        users.insert(user.id, user);
        Ok(())
    }

    async fn get(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(read(&self.users).get(&id).cloned())
    }

    async fn find_by_billing_id(&self, billing_id: &str) -> Result<Option<User>, RepositoryError> {
        Ok(read(&self.users)
            .values()
            .find(|u| u.external_billing_id.as_deref() == Some(billing_id))
            .cloned())
    }

    async fn apply_change(
        &self,
        id: UserId,
        change: &EntitlementChange,
        ceilings: &TokenCeilings,
        now: DateTime<Utc>,
    ) -> Result<Option<(User, bool)>, RepositoryError> {
        let mut users = write(&self.users);
        let Some(current) = users.get(&id) else {
            return Ok(None);
        };

        let mut next = current.clone();
        let changed = next.apply_change(change, ceilings, now)?;
        if changed {
            users.insert(id, next.clone());
        }
        Ok(Some((next, changed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use songsmith_billing::Tier;
    use songsmith_songs::NewSong;

    fn test_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn song_for(owner: UserId, at: DateTime<Utc>) -> Song {
        Song::create(
            NewSong {
                owner_id: owner,
                title: None,
                description: None,
                prompt: "calm piano".to_string(),
                token_budget: 100,
            },
            at,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let repo = InMemorySongRepository::new();
        let song = song_for(UserId::new(), test_time());
        let id = song.id;
        repo.insert(song).await.unwrap();

        let first = repo
            .transition(id, &Transition::StartProcessing, test_time())
            .await
            .unwrap();
        assert_eq!(first.unwrap().status, SongStatus::Processing);

        let second = repo
            .transition(id, &Transition::StartProcessing, test_time())
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn transition_on_missing_song_is_none() {
        let repo = InMemorySongRepository::new();
        let out = repo
            .transition(SongId::new(), &Transition::StartProcessing, test_time())
            .await
            .unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn foreign_songs_are_invisible() {
        let repo = InMemorySongRepository::new();
        let owner = UserId::new();
        let song = song_for(owner, test_time());
        let id = song.id;
        repo.insert(song).await.unwrap();

        let stranger = UserId::new();
        assert!(repo.get_owned(stranger, id).await.unwrap().is_none());
        assert!(repo.delete_owned(stranger, id).await.unwrap().is_none());
        assert!(repo.get_owned(owner, id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn listing_is_newest_first() {
        let repo = InMemorySongRepository::new();
        let owner = UserId::new();
        let older = song_for(owner, test_time());
        let newer = song_for(owner, test_time() + Duration::seconds(5));
        let (older_id, newer_id) = (older.id, newer.id);
        repo.insert(older).await.unwrap();
        repo.insert(newer).await.unwrap();
        repo.insert(song_for(UserId::new(), test_time())).await.unwrap();

        let ids: Vec<_> = repo
            .list_by_owner(owner)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![newer_id, older_id]);
    }

    #[tokio::test]
    async fn empty_title_patch_is_rejected_and_leaves_song_untouched() {
        let repo = InMemorySongRepository::new();
        let owner = UserId::new();
        let song = song_for(owner, test_time());
        let id = song.id;
        repo.insert(song.clone()).await.unwrap();

        let err = repo
            .update_metadata(
                owner,
                id,
                MetadataPatch {
                    title: Some("  ".to_string()),
                    description: None,
                },
                test_time(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Rejected(_)));
        assert_eq!(repo.get(id).await.unwrap().unwrap(), song);
    }

    #[tokio::test]
    async fn stale_processing_uses_updated_at() {
        let repo = InMemorySongRepository::new();
        let song = song_for(UserId::new(), test_time());
        let id = song.id;
        repo.insert(song).await.unwrap();
        repo.transition(id, &Transition::StartProcessing, test_time())
            .await
            .unwrap();

        assert!(repo.stale_processing(test_time()).await.unwrap().is_empty());
        let cutoff = test_time() + Duration::minutes(10);
        assert_eq!(repo.stale_processing(cutoff).await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = InMemoryUserStore::new();
        let ceilings = TokenCeilings::default();
        store
            .insert(User::new_free("ada@example.com", &ceilings, test_time()).unwrap())
            .await
            .unwrap();
        let err = store
            .insert(User::new_free("ADA@example.com", &ceilings, test_time()).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn apply_change_reports_no_op() {
        let store = InMemoryUserStore::new();
        let ceilings = TokenCeilings::default();
        let user = User::new_free("ada@example.com", &ceilings, test_time()).unwrap();
        let id = user.id;
        store.insert(user).await.unwrap();

        let change = EntitlementChange::Activate {
            billing_id: "cus_1".to_string(),
        };
        let (user, changed) = store
            .apply_change(id, &change, &ceilings, test_time())
            .await
            .unwrap()
            .unwrap();
        assert!(changed);
        assert_eq!(user.tier, Tier::Paid);

        let (again, changed) = store
            .apply_change(id, &change, &ceilings, test_time())
            .await
            .unwrap()
            .unwrap();
        assert!(!changed);
        assert_eq!(again, user);
        assert_eq!(
            store.find_by_billing_id("cus_1").await.unwrap().map(|u| u.id),
            Some(id)
        );
    }

    #[tokio::test]
    async fn apply_change_on_unknown_user_is_none() {
        let store = InMemoryUserStore::new();
        let out = store
            .apply_change(
                UserId::new(),
                &EntitlementChange::Cancel,
                &TokenCeilings::default(),
                test_time(),
            )
            .await
            .unwrap();
        assert!(out.is_none());
    }
}
