//! Error surfaced by the service layer to the HTTP edge.

use songsmith_billing::{EventParseError, SignatureError};
use songsmith_core::DomainError;

use crate::billing::GatewayError;
use crate::jobs::ExecutionFailure;
use crate::repository::RepositoryError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(DomainError),
    #[error(transparent)]
    Repository(RepositoryError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Execution(#[from] ExecutionFailure),
    /// A webhook body that verified but is not an event.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        Self::Domain(value)
    }
}

impl From<RepositoryError> for ServiceError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Rejected(e) => Self::Domain(e),
            RepositoryError::AlreadyExists(what) => Self::Domain(DomainError::conflict(what)),
            other => Self::Repository(other),
        }
    }
}

impl From<SignatureError> for ServiceError {
    fn from(value: SignatureError) -> Self {
        Self::Domain(DomainError::authenticity(value.to_string()))
    }
}

impl From<EventParseError> for ServiceError {
    fn from(value: EventParseError) -> Self {
        match value {
            EventParseError::InvalidJson(msg) => Self::InvalidPayload(msg),
        }
    }
}
