//! Billing and entitlement domain.
//!
//! - `entitlement`: users, tiers, token ceilings, budget resolution
//! - `event`: parsing of externally delivered billing events
//! - `signature`: webhook signature verification
//!
//! Pure logic; persistence and HTTP live in `songsmith-infra` / `songsmith-api`.

pub mod entitlement;
pub mod event;
pub mod signature;

pub use entitlement::{EntitlementChange, Tier, TokenCeilings, User};
pub use event::{BillingEvent, EventParseError, ReceivedEvent};
pub use signature::{SignatureError, WebhookVerifier, SIGNATURE_HEADER};
