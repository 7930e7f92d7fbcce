//! Process wiring: picks a backend for each concern from `Settings`.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use songsmith_auth::{Hs256JwtValidator, JwtValidator};
use songsmith_billing::WebhookVerifier;
use songsmith_infra::{
    billing::{BillingService, EntitlementReconciler, StripeConfig, StripeGateway},
    generation::{GenerationError, HttpGenerator, ModelHost, ToneSynthesizer},
    jobs::{BackgroundExecutor, SongLifecycle},
    repository::{
        self, InMemorySongRepository, InMemoryUserStore, PostgresSongRepository,
        PostgresUserStore, RepositoryError, SongRepository, UserStore,
    },
    storage::{LocalStorage, RemoteStorage, StorageBackend},
    AccountService, Settings, SongService, StorageSettings,
};

#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error("database: {0}")]
    Repository(#[from] RepositoryError),
    #[error("generation backend: {0}")]
    Generation(#[from] GenerationError),
}

pub struct AppServices {
    pub songs: SongService,
    pub billing: BillingService,
    pub accounts: Arc<AccountService>,
    pub storage: Arc<dyn StorageBackend>,
    pub model: Arc<ModelHost>,
    pub jwt: Arc<dyn JwtValidator>,
    pub admin_token: Option<Arc<str>>,
    stale_processing: Option<chrono::Duration>,
}

pub async fn build_services(settings: &Settings) -> Result<AppServices, BootError> {
    let songs: Arc<dyn SongRepository>;
    let users: Arc<dyn UserStore>;
    match &settings.database_url {
        Some(url) => {
            let pool = repository::connect(url).await?;
            repository::run_migrations(&pool).await?;
            info!("using postgres repositories");
            songs = Arc::new(PostgresSongRepository::new(pool.clone()));
            users = Arc::new(PostgresUserStore::new(pool));
        }
        None => {
            info!("using in-memory repositories");
            songs = InMemorySongRepository::arc();
            users = InMemoryUserStore::arc();
        }
    }

    let storage: Arc<dyn StorageBackend> = match &settings.storage {
        StorageSettings::Local { root } => {
            info!(root = %root.display(), "using local artifact storage");
            Arc::new(LocalStorage::new(root.clone()))
        }
        StorageSettings::Remote(config) => {
            info!(bucket = %config.bucket, "using remote artifact storage");
            Arc::new(RemoteStorage::new(config.clone()))
        }
    };

    let model = Arc::new(match &settings.generation_endpoint {
        Some(endpoint) => ModelHost::preloaded("http", Arc::new(HttpGenerator::new(endpoint.clone())?)),
        None => ModelHost::preloaded("tone", Arc::new(ToneSynthesizer::default())),
    });

    let lifecycle = Arc::new(SongLifecycle::new(songs.clone(), storage.clone(), model.clone()));
    let executor = BackgroundExecutor::new(lifecycle);

    let reconciler = Arc::new(EntitlementReconciler::new(users.clone(), settings.ceilings));
    let mut billing = BillingService::new(users.clone(), reconciler);
    if let Some(secret) = &settings.webhook_secret {
        billing = billing.with_webhook_verifier(WebhookVerifier::new(secret.clone()));
    }
    if let Some(payment) = &settings.payment {
        let gateway = StripeGateway::new(StripeConfig {
            secret_key: payment.secret_key.clone(),
            price_id: payment.price_id.clone(),
            api_base: payment.api_base.clone(),
        });
        billing = billing.with_gateway(Arc::new(gateway), payment.publishable_key.clone());
    }

    Ok(AppServices {
        songs: SongService::new(songs, users.clone(), storage.clone(), executor, settings.ceilings),
        billing,
        accounts: Arc::new(AccountService::new(users, settings.ceilings)),
        storage,
        model,
        jwt: Arc::new(Hs256JwtValidator::new(settings.jwt_secret.as_bytes())),
        admin_token: settings.admin_token.as_deref().map(Arc::from),
        stale_processing: settings.stale_processing,
    })
}

impl AppServices {
    pub fn executor(&self) -> &BackgroundExecutor {
        self.songs.executor()
    }

    /// Load the model in the background so the first request does not pay for it.
    pub fn warm_up(&self) -> JoinHandle<()> {
        let model = self.model.clone();
        tokio::spawn(async move {
            match model.ensure_loaded().await {
                Ok(_) => info!(model = model.name(), "model ready"),
                Err(e) => warn!(model = model.name(), error = %e, "model failed to load"),
            }
        })
    }

    /// Periodically fail songs stuck in Processing. `None` when the sweep is disabled.
    pub fn spawn_stale_sweep(&self) -> Option<JoinHandle<()>> {
        let max_age = self.stale_processing?;
        let lifecycle = self.executor().lifecycle().clone();
        let period = max_age
            .to_std()
            .map(|d| (d / 2).max(Duration::from_secs(1)))
            .unwrap_or(Duration::from_secs(60));

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                match lifecycle.sweep_stale(max_age).await {
                    Ok(0) => {}
                    Ok(swept) => info!(swept, "failed stale processing songs"),
                    Err(e) => warn!(error = %e, "stale sweep failed"),
                }
            }
        }))
    }
}
