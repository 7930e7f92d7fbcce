//! Domain error model shared by every layer.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Each variant is a class of failure the caller can act on. Infrastructure
/// failures (database, network) are modelled by the layer that owns them and
/// only reach this type through `DomainError::Internal`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input (e.g. empty prompt). Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown id, or an id owned by somebody else. The two are reported
    /// identically so callers cannot enumerate foreign records.
    #[error("not found")]
    NotFound,

    /// The caller's entitlement does not allow the request.
    #[error("quota exceeded: {0}")]
    Quota(String),

    /// A backend the operation needs (payment, storage, admin) is not configured.
    #[error("not configured: {0}")]
    Configuration(String),

    /// A signed payload failed verification.
    #[error("authenticity check failed: {0}")]
    Authenticity(String),

    /// The request conflicts with current state (e.g. already subscribed).
    #[error("conflict: {0}")]
    Conflict(String),

    /// An identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Infrastructure failure surfaced to the caller.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn quota(msg: impl Into<String>) -> Self {
        Self::Quota(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn authenticity(msg: impl Into<String>) -> Self {
        Self::Authenticity(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    /// Whether the failure is the caller's fault (maps to a 4xx response).
    pub fn is_client_error(&self) -> bool {
        !matches!(self, DomainError::Internal(_))
    }
}
