use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{error, info};

use super::{GenerationError, GenerationService};

/// Load state of the hosted model.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelReadiness {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

impl ModelReadiness {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelReadiness::Unloaded => "unloaded",
            ModelReadiness::Loading => "loading",
            ModelReadiness::Ready => "ready",
            ModelReadiness::Failed => "failed",
        }
    }
}

/// Produces the model on first use.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    fn name(&self) -> &str;

    async fn load(&self) -> Result<Arc<dyn GenerationService>, GenerationError>;
}

/// A model that needs no loading.
pub struct Preloaded {
    name: String,
    service: Arc<dyn GenerationService>,
}

impl Preloaded {
    pub fn new(name: impl Into<String>, service: Arc<dyn GenerationService>) -> Self {
        Self {
            name: name.into(),
            service,
        }
    }
}

#[async_trait]
impl ModelLoader for Preloaded {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> Result<Arc<dyn GenerationService>, GenerationError> {
        Ok(self.service.clone())
    }
}

/// Owns the single model instance of the process.
///
/// Loading happens at most once successfully; a failed load leaves the host
/// in `Failed` and the next call retries.
pub struct ModelHost {
    loader: Box<dyn ModelLoader>,
    model: OnceCell<Arc<dyn GenerationService>>,
    state: Mutex<(ModelReadiness, Option<String>)>,
}

impl core::fmt::Debug for ModelHost {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ModelHost")
            .field("model", &self.loader.name())
            .field("readiness", &self.readiness())
            .finish()
    }
}

impl ModelHost {
    pub fn new(loader: impl ModelLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            model: OnceCell::new(),
            state: Mutex::new((ModelReadiness::Unloaded, None)),
        }
    }

    /// Host around an already constructed service.
    pub fn preloaded(name: impl Into<String>, service: Arc<dyn GenerationService>) -> Self {
        Self::new(Preloaded::new(name, service))
    }

    pub fn name(&self) -> &str {
        self.loader.name()
    }

    pub fn readiness(&self) -> ModelReadiness {
        self.lock_state().0
    }

    /// The last load error, if the host is `Failed`.
    pub fn last_error(&self) -> Option<String> {
        self.lock_state().1.clone()
    }

    /// Load the model if needed and return it.
    pub async fn ensure_loaded(&self) -> Result<Arc<dyn GenerationService>, GenerationError> {
        if let Some(model) = self.model.get() {
            return Ok(model.clone());
        }

        self.set_state(ModelReadiness::Loading, None);
        let loaded = self
            .model
            .get_or_try_init(|| async {
                info!(model = self.loader.name(), "loading generation model");
                self.loader.load().await
            })
            .await;

        match loaded {
            Ok(model) => {
                self.set_state(ModelReadiness::Ready, None);
                Ok(model.clone())
            }
            Err(e) => {
                error!(model = self.loader.name(), error = %e, "generation model failed to load");
                self.set_state(ModelReadiness::Failed, Some(e.to_string()));
                Err(e)
            }
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, (ModelReadiness, Option<String>)> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, readiness: ModelReadiness, error: Option<String>) {
        *self.lock_state() = (readiness, error);
    }
}

#[async_trait]
impl GenerationService for ModelHost {
    async fn generate(&self, prompt: &str, token_budget: u32) -> Result<Vec<u8>, GenerationError> {
        let model = self.ensure_loaded().await?;
        model.generate(prompt, token_budget).await
    }
}
