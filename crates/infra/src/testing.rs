//! Shared fakes for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;

use songsmith_billing::{TokenCeilings, User};
use songsmith_core::UserId;
use songsmith_songs::{NewSong, Song};

use crate::generation::{GenerationError, GenerationService};

pub fn test_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-03-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn pending_song(owner: UserId, prompt: &str, budget: u32) -> Song {
    Song::create(
        NewSong {
            owner_id: owner,
            title: None,
            description: None,
            prompt: prompt.to_string(),
            token_budget: budget,
        },
        Utc::now(),
    )
    .unwrap()
}

pub fn free_user(email: &str) -> User {
    User::new_free(email, &TokenCeilings::default(), Utc::now()).unwrap()
}

/// Returns fixed bytes and counts calls.
#[derive(Default)]
pub struct FixedGenerator {
    pub calls: AtomicUsize,
}

#[async_trait]
impl GenerationService for FixedGenerator {
    async fn generate(&self, prompt: &str, token_budget: u32) -> Result<Vec<u8>, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{prompt}:{token_budget}").into_bytes())
    }
}

pub struct FailingGenerator;

#[async_trait]
impl GenerationService for FailingGenerator {
    async fn generate(&self, _prompt: &str, _token_budget: u32) -> Result<Vec<u8>, GenerationError> {
        Err(GenerationError::Inference("CUDA out of memory".to_string()))
    }
}

pub struct PanickingGenerator;

#[async_trait]
impl GenerationService for PanickingGenerator {
    async fn generate(&self, _prompt: &str, _token_budget: u32) -> Result<Vec<u8>, GenerationError> {
        panic!("model exploded")
    }
}

/// Blocks every call until a permit is released.
pub struct GatedGenerator {
    pub gate: Arc<Semaphore>,
    pub started: Arc<Semaphore>,
    pub calls: AtomicUsize,
}

impl GatedGenerator {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            started: Arc::new(Semaphore::new(0)),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl GenerationService for GatedGenerator {
    async fn generate(&self, prompt: &str, _token_budget: u32) -> Result<Vec<u8>, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.add_permits(1);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| GenerationError::Inference(e.to_string()))?;
        permit.forget();
        Ok(prompt.as_bytes().to_vec())
    }
}
