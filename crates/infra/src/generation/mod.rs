//! Prompt-to-audio generation.
//!
//! `GenerationService` is the opaque capability the lifecycle calls. The
//! process holds exactly one, a `ModelHost`, which loads the underlying model
//! once and reports its readiness.

mod host;
mod http;
mod tone;

use async_trait::async_trait;

pub use host::{ModelHost, ModelLoader, ModelReadiness, Preloaded};
pub use http::HttpGenerator;
pub use tone::ToneSynthesizer;

#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("model produced no audio")]
    EmptyOutput,
}

/// Prompt + token budget to WAV bytes.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, prompt: &str, token_budget: u32) -> Result<Vec<u8>, GenerationError>;
}
