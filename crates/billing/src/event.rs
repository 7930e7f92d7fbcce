//! Billing event parsing.
//!
//! Events arrive as Stripe-shaped JSON: `{"id", "type", "data": {"object": {...}}}`.
//! Only two types change entitlements; everything else parses to
//! `BillingEvent::Unrecognized` so the sender gets an acknowledgement instead
//! of retrying forever.

use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use songsmith_core::UserId;

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";
pub const SUBSCRIPTION_DELETED: &str = "customer.subscription.deleted";

/// The entitlement-relevant meaning of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEvent {
    /// A subscription was created for `user_id` under customer `billing_id`.
    SubscriptionActivated { user_id: UserId, billing_id: String },
    /// The subscription of customer `billing_id` ended.
    SubscriptionCancelled { billing_id: String },
    /// A recognized type whose payload lacks what we need.
    Incomplete { reason: String },
    /// A type this system does not act on.
    Unrecognized,
}

/// An event as received, with its envelope metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedEvent {
    pub id: Option<String>,
    pub event_type: String,
    pub kind: BillingEvent,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventParseError {
    #[error("invalid payload: {0}")]
    InvalidJson(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: EnvelopeData,
}

#[derive(Debug, Default, Deserialize)]
struct EnvelopeData {
    #[serde(default)]
    object: JsonValue,
}

impl ReceivedEvent {
    /// Parse a raw (already verified) webhook body.
    pub fn parse(payload: &[u8]) -> Result<Self, EventParseError> {
        let envelope: Envelope = serde_json::from_slice(payload)
            .map_err(|e| EventParseError::InvalidJson(e.to_string()))?;

        let object = &envelope.data.object;
        let kind = match envelope.event_type.as_str() {
            CHECKOUT_COMPLETED => parse_activation(object),
            SUBSCRIPTION_DELETED => match str_field(object, &["customer"]) {
                Some(billing_id) => BillingEvent::SubscriptionCancelled { billing_id },
                None => BillingEvent::Incomplete {
                    reason: "missing data.object.customer".to_string(),
                },
            },
            _ => BillingEvent::Unrecognized,
        };

        Ok(Self {
            id: envelope.id,
            event_type: envelope.event_type,
            kind,
        })
    }
}

fn parse_activation(object: &JsonValue) -> BillingEvent {
    let Some(billing_id) = str_field(object, &["customer"]) else {
        return BillingEvent::Incomplete {
            reason: "missing data.object.customer".to_string(),
        };
    };
    let Some(raw_user) = str_field(object, &["metadata", "user_id"]) else {
        return BillingEvent::Incomplete {
            reason: "missing data.object.metadata.user_id".to_string(),
        };
    };
    match raw_user.parse::<UserId>() {
        Ok(user_id) => BillingEvent::SubscriptionActivated { user_id, billing_id },
        Err(e) => BillingEvent::Incomplete {
            reason: e.to_string(),
        },
    }
}

fn str_field(object: &JsonValue, path: &[&str]) -> Option<String> {
    let mut cur = object;
    for key in path {
        cur = cur.get(key)?;
    }
    cur.as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
