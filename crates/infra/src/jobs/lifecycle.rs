//! Drives one song through Pending -> Processing -> {Completed | Failed}.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use songsmith_core::SongId;
use songsmith_songs::{SongStatus, Transition};

use crate::generation::{GenerationError, GenerationService};
use crate::repository::{RepositoryError, SongRepository};
use crate::storage::{anonymous_key, song_key, StorageBackend, StorageError};

/// Why a generation cycle produced no artifact.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutionFailure {
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),
    #[error("storing the artifact failed: {0}")]
    Storage(#[from] StorageError),
}

/// Result of one `advance` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// No such song.
    Missing,
    /// The song was not Pending; somebody else owns (or owned) this attempt.
    Skipped { status: SongStatus },
    Completed { reference: String },
    Failed { detail: String },
    /// The song left Processing while generating (deleted or swept); any
    /// stored artifact was released.
    Discarded,
}

/// An artifact produced without a song record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedArtifact {
    pub id: Uuid,
    pub reference: String,
}

/// The song state machine driver.
pub struct SongLifecycle {
    songs: Arc<dyn SongRepository>,
    storage: Arc<dyn StorageBackend>,
    generator: Arc<dyn GenerationService>,
}

impl SongLifecycle {
    pub fn new(
        songs: Arc<dyn SongRepository>,
        storage: Arc<dyn StorageBackend>,
        generator: Arc<dyn GenerationService>,
    ) -> Self {
        Self {
            songs,
            storage,
            generator,
        }
    }

    /// Run one song to a terminal state.
    ///
    /// Only the caller whose Pending -> Processing compare-and-set succeeds
    /// generates; every other concurrent caller gets `Skipped`.
    #[instrument(skip(self), fields(song_id = %song_id))]
    pub async fn advance(&self, song_id: SongId) -> Result<AdvanceOutcome, RepositoryError> {
        let Some(song) = self.songs.get(song_id).await? else {
            debug!("song vanished before processing");
            return Ok(AdvanceOutcome::Missing);
        };
        if song.status != SongStatus::Pending {
            return Ok(AdvanceOutcome::Skipped {
                status: song.status,
            });
        }

        let Some(song) = self
            .songs
            .transition(song_id, &Transition::StartProcessing, Utc::now())
            .await?
        else {
            return Ok(match self.songs.get(song_id).await? {
                Some(current) => AdvanceOutcome::Skipped {
                    status: current.status,
                },
                None => AdvanceOutcome::Missing,
            });
        };

        info!(token_budget = song.token_budget, "generation started");
        let key = song_key(song_id);

        match self.produce(&key, &song.prompt, song.token_budget).await {
            Ok(reference) => {
                let done = Transition::Complete {
                    reference: reference.clone(),
                };
                match self.songs.transition(song_id, &done, Utc::now()).await? {
                    Some(_) => {
                        info!(%reference, "song completed");
                        Ok(AdvanceOutcome::Completed { reference })
                    }
                    None => {
                        warn!("song left processing during generation; releasing artifact");
                        self.release(&key).await;
                        Ok(AdvanceOutcome::Discarded)
                    }
                }
            }
            Err(failure) => {
                let detail = failure.to_string();
                warn!(error = %detail, "song failed");
                let failed = Transition::Fail {
                    detail: detail.clone(),
                };
                match self.songs.transition(song_id, &failed, Utc::now()).await? {
                    Some(_) => Ok(AdvanceOutcome::Failed { detail }),
                    None => Ok(AdvanceOutcome::Discarded),
                }
            }
        }
    }

    /// Force a non-terminal song to Failed. Returns whether it was marked.
    ///
    /// Used when `advance` could not finish (repository error, panic).
    #[instrument(skip(self, detail), fields(song_id = %song_id))]
    pub async fn abandon(&self, song_id: SongId, detail: &str) -> Result<bool, RepositoryError> {
        // Pending needs two hops; allow one retry per hop for racing writers.
        for _ in 0..4 {
            let Some(song) = self.songs.get(song_id).await? else {
                return Ok(false);
            };
            let step = match song.status {
                SongStatus::Pending => Transition::StartProcessing,
                SongStatus::Processing => Transition::Fail {
                    detail: detail.to_string(),
                },
                SongStatus::Completed | SongStatus::Failed => return Ok(false),
            };
            let applied = self.songs.transition(song_id, &step, Utc::now()).await?;
            if applied.is_some_and(|s| s.status == SongStatus::Failed) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Fail every song stuck in Processing for longer than `max_age`.
    pub async fn sweep_stale(&self, max_age: Duration) -> Result<usize, RepositoryError> {
        let cutoff = Utc::now() - max_age;
        let stale = self.songs.stale_processing(cutoff).await?;
        let detail = format!(
            "interrupted: processing exceeded {}s without finishing",
            max_age.num_seconds()
        );

        let mut swept = 0;
        for id in stale {
            let failed = Transition::Fail {
                detail: detail.clone(),
            };
            if self.songs.transition(id, &failed, Utc::now()).await?.is_some() {
                warn!(song_id = %id, "stale processing song marked failed");
                swept += 1;
            }
        }
        Ok(swept)
    }

    /// Generate and store without a song record.
    #[instrument(skip(self, prompt))]
    pub async fn run_detached(
        &self,
        prompt: &str,
        token_budget: u32,
    ) -> Result<DetachedArtifact, ExecutionFailure> {
        let id = Uuid::now_v7();
        let reference = self
            .produce(&anonymous_key(id), prompt, token_budget)
            .await?;
        info!(%id, %reference, "anonymous song generated");
        Ok(DetachedArtifact { id, reference })
    }

    /// Best-effort removal of an artifact nobody references.
    pub async fn release(&self, key: &str) {
        if let Err(e) = self.storage.delete(key).await {
            warn!(key, error = %e, "failed to release artifact");
        }
    }

    async fn produce(
        &self,
        key: &str,
        prompt: &str,
        token_budget: u32,
    ) -> Result<String, ExecutionFailure> {
        let bytes = self.generator.generate(prompt, token_budget).await?;
        if bytes.is_empty() {
            return Err(GenerationError::EmptyOutput.into());
        }
        Ok(self.storage.put(key, bytes).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use songsmith_core::UserId;
    use tempfile::TempDir;

    use crate::repository::InMemorySongRepository;
    use crate::storage::LocalStorage;
    use crate::testing::{pending_song, FailingGenerator, FixedGenerator, GatedGenerator};

    struct Fixture {
        songs: Arc<InMemorySongRepository>,
        storage: Arc<LocalStorage>,
        _dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            Self {
                songs: InMemorySongRepository::arc(),
                storage: Arc::new(LocalStorage::new(dir.path())),
                _dir: dir,
            }
        }

        fn lifecycle(&self, generator: Arc<dyn GenerationService>) -> SongLifecycle {
            SongLifecycle::new(self.songs.clone(), self.storage.clone(), generator)
        }

        async fn seed(&self) -> SongId {
            let song = pending_song(UserId::new(), "calm piano", 100);
            let id = song.id;
            self.songs.insert(song).await.unwrap();
            id
        }
    }

    #[tokio::test]
    async fn successful_generation_completes_with_resolvable_reference() {
        let fx = Fixture::new();
        let id = fx.seed().await;
        let lifecycle = fx.lifecycle(Arc::new(FixedGenerator::default()));

        let outcome = lifecycle.advance(id).await.unwrap();
        let reference = match outcome {
            AdvanceOutcome::Completed { reference } => reference,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(reference, format!("/storage/{id}.wav"));

        let song = fx.songs.get(id).await.unwrap().unwrap();
        assert_eq!(song.status, SongStatus::Completed);
        assert_eq!(song.result_reference.as_deref(), Some(reference.as_str()));
        assert!(song.is_consistent());

        let path = fx.storage.resolve(&reference).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"calm piano:100");
    }

    #[tokio::test]
    async fn generation_failure_is_recorded_on_the_song() {
        let fx = Fixture::new();
        let id = fx.seed().await;
        let lifecycle = fx.lifecycle(Arc::new(FailingGenerator));

        let outcome = lifecycle.advance(id).await.unwrap();
        assert!(matches!(outcome, AdvanceOutcome::Failed { .. }));

        let song = fx.songs.get(id).await.unwrap().unwrap();
        assert_eq!(song.status, SongStatus::Failed);
        assert!(song.error_detail.unwrap().contains("CUDA out of memory"));
        assert!(song.result_reference.is_none());
    }

    #[tokio::test]
    async fn storage_failure_is_recorded_on_the_song() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the root directory should be.
        let blocker = dir.path().join("root");
        std::fs::write(&blocker, b"").unwrap();

        let songs = InMemorySongRepository::arc();
        let song = pending_song(UserId::new(), "calm piano", 100);
        let id = song.id;
        songs.insert(song).await.unwrap();
        let lifecycle = SongLifecycle::new(
            songs.clone(),
            Arc::new(LocalStorage::new(&blocker)),
            Arc::new(FixedGenerator::default()),
        );

        let outcome = lifecycle.advance(id).await.unwrap();
        match outcome {
            AdvanceOutcome::Failed { detail } => assert!(detail.starts_with("storing the artifact failed")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_and_terminal_songs_are_no_ops() {
        let fx = Fixture::new();
        let generator = Arc::new(FixedGenerator::default());
        let lifecycle = fx.lifecycle(generator.clone());

        assert_eq!(lifecycle.advance(SongId::new()).await.unwrap(), AdvanceOutcome::Missing);

        let id = fx.seed().await;
        lifecycle.advance(id).await.unwrap();
        assert_eq!(
            lifecycle.advance(id).await.unwrap(),
            AdvanceOutcome::Skipped {
                status: SongStatus::Completed
            }
        );
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_advances_generate_once() {
        let fx = Fixture::new();
        let id = fx.seed().await;
        let generator = Arc::new(FixedGenerator::default());
        let lifecycle = Arc::new(fx.lifecycle(generator.clone()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let lifecycle = lifecycle.clone();
                tokio::spawn(async move { lifecycle.advance(id).await.unwrap() })
            })
            .collect();

        let mut completed = 0;
        for h in handles {
            if matches!(h.await.unwrap(), AdvanceOutcome::Completed { .. }) {
                completed += 1;
            }
        }
        assert_eq!(completed, 1);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deletion_mid_flight_releases_the_artifact() {
        let fx = Fixture::new();
        let song = pending_song(UserId::new(), "calm piano", 100);
        let (id, owner) = (song.id, song.owner_id);
        fx.songs.insert(song).await.unwrap();

        let generator = Arc::new(GatedGenerator::new());
        let lifecycle = Arc::new(fx.lifecycle(generator.clone()));
        let task = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.advance(id).await.unwrap() })
        };

        generator.started.acquire().await.unwrap().forget();
        assert!(fx.songs.delete_owned(owner, id).await.unwrap().is_some());
        generator.gate.add_permits(1);

        assert_eq!(task.await.unwrap(), AdvanceOutcome::Discarded);
        assert!(fx.storage.resolve(&format!("/storage/{id}.wav")).is_none());
    }

    #[tokio::test]
    async fn abandon_fails_pending_and_processing_songs() {
        let fx = Fixture::new();
        let lifecycle = fx.lifecycle(Arc::new(FixedGenerator::default()));

        let pending = fx.seed().await;
        assert!(lifecycle.abandon(pending, "task panicked").await.unwrap());
        let song = fx.songs.get(pending).await.unwrap().unwrap();
        assert_eq!(song.status, SongStatus::Failed);
        assert_eq!(song.error_detail.as_deref(), Some("task panicked"));

        assert!(!lifecycle.abandon(pending, "again").await.unwrap());
        assert!(!lifecycle.abandon(SongId::new(), "none").await.unwrap());
    }

    #[tokio::test]
    async fn sweep_fails_only_stale_processing_songs() {
        let fx = Fixture::new();
        let lifecycle = fx.lifecycle(Arc::new(FixedGenerator::default()));

        let long_ago = Utc::now() - Duration::hours(2);
        let mut song = pending_song(UserId::new(), "calm piano", 100);
        song.created_at = long_ago;
        song.updated_at = long_ago;
        let stuck = song.id;
        fx.songs.insert(song).await.unwrap();
        fx.songs
            .transition(stuck, &Transition::StartProcessing, long_ago)
            .await
            .unwrap();
        let fresh = fx.seed().await;
        fx.songs
            .transition(fresh, &Transition::StartProcessing, Utc::now())
            .await
            .unwrap();

        assert_eq!(lifecycle.sweep_stale(Duration::minutes(30)).await.unwrap(), 1);

        let stuck = fx.songs.get(stuck).await.unwrap().unwrap();
        assert_eq!(stuck.status, SongStatus::Failed);
        assert!(stuck.error_detail.unwrap().starts_with("interrupted"));
        let fresh = fx.songs.get(fresh).await.unwrap().unwrap();
        assert_eq!(fresh.status, SongStatus::Processing);
    }

    #[tokio::test]
    async fn detached_generation_stores_under_anonymous_prefix() {
        let fx = Fixture::new();
        let lifecycle = fx.lifecycle(Arc::new(FixedGenerator::default()));

        let artifact = lifecycle.run_detached("calm piano", 256).await.unwrap();
        assert_eq!(artifact.reference, format!("/storage/anonymous/{}.wav", artifact.id));
        assert!(fx.storage.resolve(&artifact.reference).is_some());

        let failing = fx.lifecycle(Arc::new(FailingGenerator));
        let err = failing.run_detached("calm piano", 256).await.unwrap_err();
        assert!(matches!(err, ExecutionFailure::Generation(_)));
    }
}
