//! `songsmith-auth`: bearer token validation boundary.
//!
//! Token *issuance* and credential storage belong to an external identity
//! service. This crate only answers "which user does this token speak for".

pub mod claims;
pub mod validator;

pub use claims::{validate_claims, JwtClaims, TokenValidationError};
pub use validator::{Hs256JwtValidator, JwtValidator};
