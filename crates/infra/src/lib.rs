//! Infrastructure layer: persistence, artifact storage, generation, background
//! execution, payment integration, and the service facades the API calls.

pub mod accounts;
pub mod billing;
pub mod config;
pub mod error;
pub mod generation;
pub mod jobs;
pub mod repository;
pub mod song_service;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use accounts::AccountService;
pub use config::{ConfigError, PaymentSettings, Settings, StorageSettings};
pub use error::ServiceError;
pub use song_service::{AnonymousSong, CreateSong, SongService};
