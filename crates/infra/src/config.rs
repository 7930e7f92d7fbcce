//! Process configuration from environment variables.

use std::path::PathBuf;

use chrono::Duration;

use songsmith_billing::TokenCeilings;

use crate::billing::DEFAULT_STRIPE_API_BASE;
use crate::storage::RemoteStorageConfig;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_JWT_SECRET: &str = "dev-secret";
pub const DEFAULT_LOCAL_STORAGE_PATH: &str = "./storage/songs";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a positive integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
    #[error("invalid token ceilings: {0}")]
    InvalidCeilings(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageSettings {
    Local { root: PathBuf },
    Remote(RemoteStorageConfig),
}

/// Outbound payment provider credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSettings {
    pub secret_key: String,
    pub publishable_key: String,
    pub price_id: String,
    pub api_base: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub bind_addr: String,
    pub jwt_secret: String,
    /// `None` keeps everything in memory.
    pub database_url: Option<String>,
    pub storage: StorageSettings,
    /// Present when secret key, publishable key, and price id are all set.
    pub payment: Option<PaymentSettings>,
    pub webhook_secret: Option<String>,
    pub ceilings: TokenCeilings,
    /// `None` uses the built-in tone synthesizer.
    pub generation_endpoint: Option<String>,
    /// `None` disables the stale-processing sweep.
    pub stale_processing: Option<Duration>,
    /// `None` disables admin routes.
    pub admin_token: Option<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let defaults = TokenCeilings::default();
        let ceilings = TokenCeilings {
            free: number(&get, "FREE_USER_MAX_TOKENS", defaults.free)?,
            paid: number(&get, "PAID_USER_MAX_TOKENS", defaults.paid)?,
            max_configurable: number(&get, "MAX_CONFIGURABLE_TOKENS", defaults.max_configurable)?,
        };
        ceilings
            .validate()
            .map_err(|e| ConfigError::InvalidCeilings(e.to_string()))?;

        let storage = match get("GCS_BUCKET_NAME") {
            Some(bucket) => {
                let mut remote = RemoteStorageConfig::new(bucket);
                if let Some(base) = get("GCS_API_BASE") {
                    remote.api_base = base;
                }
                if let Some(base) = get("GCS_PUBLIC_BASE") {
                    remote.public_base = base;
                }
                remote.access_token = get("GCS_ACCESS_TOKEN");
                StorageSettings::Remote(remote)
            }
            None => StorageSettings::Local {
                root: PathBuf::from(
                    get("LOCAL_STORAGE_PATH").unwrap_or_else(|| DEFAULT_LOCAL_STORAGE_PATH.to_string()),
                ),
            },
        };

        let payment = match (
            get("STRIPE_SECRET_KEY"),
            get("STRIPE_PUBLISHABLE_KEY"),
            get("STRIPE_PRICE_ID"),
        ) {
            (Some(secret_key), Some(publishable_key), Some(price_id)) => Some(PaymentSettings {
                secret_key,
                publishable_key,
                price_id,
                api_base: get("STRIPE_API_BASE")
                    .unwrap_or_else(|| DEFAULT_STRIPE_API_BASE.to_string()),
            }),
            _ => None,
        };

        let stale_processing = match get("STALE_PROCESSING_SECS") {
            Some(raw) => {
                let secs = parse_positive("STALE_PROCESSING_SECS", &raw)?;
                Some(Duration::seconds(i64::from(secs)))
            }
            None => None,
        };

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            jwt_secret: get("JWT_SECRET").unwrap_or_else(|| DEFAULT_JWT_SECRET.to_string()),
            database_url: get("DATABASE_URL"),
            storage,
            payment,
            webhook_secret: get("STRIPE_WEBHOOK_SECRET"),
            ceilings,
            generation_endpoint: get("GENERATION_ENDPOINT"),
            stale_processing,
            admin_token: get("ADMIN_TOKEN"),
        })
    }

    pub fn uses_default_jwt_secret(&self) -> bool {
        self.jwt_secret == DEFAULT_JWT_SECRET
    }
}

fn number(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u32,
) -> Result<u32, ConfigError> {
    match get(name) {
        Some(raw) => parse_positive(name, &raw),
        None => Ok(default),
    }
}

fn parse_positive(name: &'static str, raw: &str) -> Result<u32, ConfigError> {
    match raw.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidNumber {
            name,
            value: raw.to_string(),
        }),
    }
}
