use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use songsmith_core::{DomainError, DomainResult, UserId};

/// Subscription tier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Paid,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Paid => "paid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "free" => Some(Tier::Free),
            "paid" => Some(Tier::Paid),
            _ => None,
        }
    }
}

impl core::fmt::Display for Tier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token ceilings per tier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCeilings {
    /// Budget every free-tier song gets, regardless of what was requested.
    pub free: u32,
    /// Default budget granted when a subscription activates.
    pub paid: u32,
    /// Hard maximum any song may use.
    pub max_configurable: u32,
}

impl Default for TokenCeilings {
    fn default() -> Self {
        Self {
            free: 256,
            paid: 2048,
            max_configurable: 4096,
        }
    }
}

impl TokenCeilings {
    /// Check the ordering `0 < free <= paid <= max_configurable`.
    pub fn validate(&self) -> DomainResult<()> {
        if self.free == 0 {
            return Err(DomainError::validation("free token ceiling must be positive"));
        }
        if self.free > self.paid || self.paid > self.max_configurable {
            return Err(DomainError::validation(format!(
                "token ceilings must satisfy free <= paid <= max (got {} / {} / {})",
                self.free, self.paid, self.max_configurable
            )));
        }
        Ok(())
    }

    /// Resolve the budget of a new song for `user`.
    ///
    /// Free tier always gets the free ceiling and ignores `requested`. Paid tier
    /// gets `min(requested or the user's own budget, max_configurable)`.
    pub fn resolve_song_budget(&self, user: &User, requested: Option<u32>) -> DomainResult<u32> {
        if user.token_budget == 0 {
            return Err(DomainError::quota("entitlement grants no tokens"));
        }
        match user.tier {
            Tier::Free => Ok(self.free),
            Tier::Paid => {
                if requested == Some(0) {
                    return Err(DomainError::validation("requested budget must be positive"));
                }
                Ok(requested
                    .unwrap_or(user.token_budget)
                    .min(self.max_configurable))
            }
        }
    }
}

/// An entitlement mutation, applied atomically by the user store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitlementChange {
    /// Subscription activated by the billing provider.
    Activate { billing_id: String },
    /// Administrative upgrade with an explicit budget.
    Upgrade { billing_id: String, token_budget: u32 },
    /// Subscription ended (provider cancellation or administrative downgrade).
    Cancel,
}

/// User entitlement record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub tier: Tier,
    pub token_budget: u32,
    /// Billing-provider customer id. Kept after a downgrade so a later
    /// re-subscription maps back to the same user.
    pub external_billing_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// A new free-tier user.
    pub fn new_free(email: impl Into<String>, ceilings: &TokenCeilings, now: DateTime<Utc>) -> DomainResult<Self> {
        let email = email.into();
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(DomainError::validation("email must be a valid address"));
        }
        Ok(Self {
            id: UserId::new(),
            email: email.to_string(),
            tier: Tier::Free,
            token_budget: ceilings.free,
            external_billing_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_paid(&self) -> bool {
        self.tier == Tier::Paid
    }

    /// Subscription activated: Paid tier, paid ceiling, bound billing id.
    ///
    /// Sets absolute values, so applying it again is a no-op. Returns whether
    /// anything changed.
    pub fn activate_subscription(
        &mut self,
        billing_id: &str,
        ceilings: &TokenCeilings,
        now: DateTime<Utc>,
    ) -> DomainResult<bool> {
        self.upgrade(billing_id, ceilings.paid, ceilings, now)
    }

    /// Administrative upgrade with an explicit budget (clamped to the hard maximum).
    pub fn upgrade(
        &mut self,
        billing_id: &str,
        token_budget: u32,
        ceilings: &TokenCeilings,
        now: DateTime<Utc>,
    ) -> DomainResult<bool> {
        let billing_id = billing_id.trim();
        if billing_id.is_empty() {
            return Err(DomainError::validation("billing id cannot be empty"));
        }
        if token_budget == 0 {
            return Err(DomainError::validation("token budget must be positive"));
        }
        let budget = token_budget.min(ceilings.max_configurable);

        let changed = self.tier != Tier::Paid
            || self.token_budget != budget
            || self.external_billing_id.as_deref() != Some(billing_id);

        if changed {
            self.tier = Tier::Paid;
            self.token_budget = budget;
            self.external_billing_id = Some(billing_id.to_string());
            self.touch(now);
        }
        Ok(changed)
    }

    /// Subscription cancelled: Free tier, free ceiling, billing id retained.
    pub fn cancel_subscription(&mut self, ceilings: &TokenCeilings, now: DateTime<Utc>) -> bool {
        let changed = self.tier != Tier::Free || self.token_budget != ceilings.free;
        if changed {
            self.tier = Tier::Free;
            self.token_budget = ceilings.free;
            self.touch(now);
        }
        changed
    }

    /// Apply `change`; returns whether the record changed.
    pub fn apply_change(
        &mut self,
        change: &EntitlementChange,
        ceilings: &TokenCeilings,
        now: DateTime<Utc>,
    ) -> DomainResult<bool> {
        match change {
            EntitlementChange::Activate { billing_id } => {
                self.activate_subscription(billing_id, ceilings, now)
            }
            EntitlementChange::Upgrade {
                billing_id,
                token_budget,
            } => self.upgrade(billing_id, *token_budget, ceilings, now),
            EntitlementChange::Cancel => Ok(self.cancel_subscription(ceilings, now)),
        }
    }

    /// Paid implies a billing id.
    pub fn is_consistent(&self) -> bool {
        self.tier == Tier::Free || self.external_billing_id.is_some()
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.updated_at {
            self.updated_at = now;
        }
    }
}
