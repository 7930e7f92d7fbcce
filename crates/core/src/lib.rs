//! `songsmith-core`: shared domain primitives.
//!
//! Identifiers and the error taxonomy. No IO lives here.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{SongId, UserId};
