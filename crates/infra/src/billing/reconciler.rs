//! Applies billing events to the entitlement store.
//!
//! Every event maps to an absolute change (tier, budget, billing id), so
//! redelivery of the same event leaves the store as a single delivery did.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use songsmith_billing::{BillingEvent, EntitlementChange, ReceivedEvent, Tier, TokenCeilings, User};
use songsmith_core::UserId;

use crate::repository::{RepositoryError, UserStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied {
        user_id: UserId,
        tier: Tier,
        /// False when the event was a redelivery.
        changed: bool,
    },
    Ignored {
        reason: String,
    },
}

pub struct EntitlementReconciler {
    users: Arc<dyn UserStore>,
    ceilings: TokenCeilings,
}

impl EntitlementReconciler {
    pub fn new(users: Arc<dyn UserStore>, ceilings: TokenCeilings) -> Self {
        Self { users, ceilings }
    }

    pub fn ceilings(&self) -> &TokenCeilings {
        &self.ceilings
    }

    #[instrument(skip(self, event), fields(event_type = %event.event_type, event_id = ?event.id))]
    pub async fn apply(&self, event: &ReceivedEvent) -> Result<ReconcileOutcome, RepositoryError> {
        let outcome = match &event.kind {
            BillingEvent::SubscriptionActivated {
                user_id,
                billing_id,
            } => {
                let change = EntitlementChange::Activate {
                    billing_id: billing_id.clone(),
                };
                self.change(*user_id, &change).await?
            }
            BillingEvent::SubscriptionCancelled { billing_id } => {
                match self.users.find_by_billing_id(billing_id).await? {
                    Some(user) => self.change(user.id, &EntitlementChange::Cancel).await?,
                    None => ReconcileOutcome::Ignored {
                        reason: format!("no user with billing id {billing_id}"),
                    },
                }
            }
            BillingEvent::Incomplete { reason } => ReconcileOutcome::Ignored {
                reason: reason.clone(),
            },
            BillingEvent::Unrecognized => ReconcileOutcome::Ignored {
                reason: format!("event type {} not handled", event.event_type),
            },
        };

        match &outcome {
            ReconcileOutcome::Applied {
                user_id,
                tier,
                changed,
            } => info!(user_id = %user_id, %tier, changed, "entitlement reconciled"),
            ReconcileOutcome::Ignored { reason } => warn!(%reason, "billing event ignored"),
        }
        Ok(outcome)
    }

    /// Administrative upgrade. `None` when the user does not exist.
    #[instrument(skip(self, billing_id), fields(user_id = %user_id))]
    pub async fn upgrade(
        &self,
        user_id: UserId,
        billing_id: &str,
        token_budget: Option<u32>,
    ) -> Result<Option<User>, RepositoryError> {
        let change = EntitlementChange::Upgrade {
            billing_id: billing_id.to_string(),
            token_budget: token_budget.unwrap_or(self.ceilings.paid),
        };
        let result = self
            .users
            .apply_change(user_id, &change, &self.ceilings, Utc::now())
            .await?;
        Ok(result.map(|(user, _)| user))
    }

    /// Administrative downgrade. `None` when the user does not exist.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn downgrade(&self, user_id: UserId) -> Result<Option<User>, RepositoryError> {
        let result = self
            .users
            .apply_change(user_id, &EntitlementChange::Cancel, &self.ceilings, Utc::now())
            .await?;
        Ok(result.map(|(user, _)| user))
    }

    async fn change(
        &self,
        user_id: UserId,
        change: &EntitlementChange,
    ) -> Result<ReconcileOutcome, RepositoryError> {
        match self
            .users
            .apply_change(user_id, change, &self.ceilings, Utc::now())
            .await
        {
            Ok(Some((user, changed))) => Ok(ReconcileOutcome::Applied {
                user_id: user.id,
                tier: user.tier,
                changed,
            }),
            Ok(None) => Ok(ReconcileOutcome::Ignored {
                reason: format!("unknown user {user_id}"),
            }),
            Err(RepositoryError::Rejected(e)) => Ok(ReconcileOutcome::Ignored {
                reason: e.to_string(),
            }),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    use crate::repository::InMemoryUserStore;
    use crate::testing::free_user;

    fn event(value: serde_json::Value) -> ReceivedEvent {
        ReceivedEvent::parse(&serde_json::to_vec(&value).unwrap()).unwrap()
    }

    fn activated(user_id: UserId, customer: &str) -> ReceivedEvent {
        event(json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": {"object": {"customer": customer, "metadata": {"user_id": user_id.to_string()}}}
        }))
    }

    fn cancelled(customer: &str) -> ReceivedEvent {
        event(json!({
            "id": "evt_2",
            "type": "customer.subscription.deleted",
            "data": {"object": {"customer": customer}}
        }))
    }

    async fn setup() -> (Arc<InMemoryUserStore>, EntitlementReconciler, UserId) {
        let users = InMemoryUserStore::arc();
        let user = free_user("ada@example.com");
        let id = user.id;
        users.insert(user).await.unwrap();
        let reconciler = EntitlementReconciler::new(users.clone(), TokenCeilings::default());
        (users, reconciler, id)
    }

    #[tokio::test]
    async fn activation_is_idempotent() {
        let (users, reconciler, id) = setup().await;
        let ev = activated(id, "cus_42");

        let first = reconciler.apply(&ev).await.unwrap();
        assert_eq!(
            first,
            ReconcileOutcome::Applied {
                user_id: id,
                tier: Tier::Paid,
                changed: true
            }
        );
        let after_one = users.get(id).await.unwrap().unwrap();

        let second = reconciler.apply(&ev).await.unwrap();
        assert!(matches!(second, ReconcileOutcome::Applied { changed: false, .. }));
        assert_eq!(users.get(id).await.unwrap().unwrap(), after_one);
        assert_eq!(after_one.token_budget, 2048);
        assert_eq!(after_one.external_billing_id.as_deref(), Some("cus_42"));
    }

    #[tokio::test]
    async fn cancellation_downgrades_and_keeps_billing_id() {
        let (users, reconciler, id) = setup().await;
        reconciler.apply(&activated(id, "cus_42")).await.unwrap();

        let outcome = reconciler.apply(&cancelled("cus_42")).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Applied { tier: Tier::Free, .. }));

        let user = users.get(id).await.unwrap().unwrap();
        assert_eq!(user.tier, Tier::Free);
        assert_eq!(user.token_budget, 256);
        assert_eq!(user.external_billing_id.as_deref(), Some("cus_42"));
    }

    #[tokio::test]
    async fn unknown_billing_id_is_ignored_without_mutation() {
        let (users, reconciler, id) = setup().await;
        let before = users.get(id).await.unwrap().unwrap();

        let outcome = reconciler.apply(&cancelled("cus_unknown")).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Ignored { .. }));
        assert_eq!(users.get(id).await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn unknown_user_and_unhandled_types_are_ignored() {
        let (_users, reconciler, _id) = setup().await;

        let outcome = reconciler.apply(&activated(UserId::new(), "cus_1")).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Ignored { .. }));

        let outcome = reconciler
            .apply(&event(json!({"type": "invoice.paid", "data": {"object": {}}})))
            .await
            .unwrap();
        match outcome {
            ReconcileOutcome::Ignored { reason } => assert!(reason.contains("invoice.paid")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn admin_upgrade_defaults_to_paid_ceiling_and_clamps() {
        let (_users, reconciler, id) = setup().await;

        let user = reconciler.upgrade(id, "cus_admin", None).await.unwrap().unwrap();
        assert_eq!(user.token_budget, 2048);

        let user = reconciler
            .upgrade(id, "cus_admin", Some(1_000_000))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.token_budget, 4096);

        let user = reconciler.downgrade(id).await.unwrap().unwrap();
        assert_eq!(user.tier, Tier::Free);
        assert!(reconciler.downgrade(UserId::new()).await.unwrap().is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 32,
            ..ProptestConfig::default()
        })]

        /// Property: replaying any delivery sequence with duplicates ends in the
        /// same state as applying it without duplicates.
        #[test]
        fn duplicate_deliveries_do_not_change_the_result(
            script in proptest::collection::vec((any::<bool>(), 1usize..4), 1..8)
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let template = free_user("ada@example.com");
                let id = template.id;
                let once_users = InMemoryUserStore::arc();
                let dup_users = InMemoryUserStore::arc();
                once_users.insert(template.clone()).await.unwrap();
                dup_users.insert(template).await.unwrap();
                let once = EntitlementReconciler::new(once_users.clone(), TokenCeilings::default());
                let dup = EntitlementReconciler::new(dup_users.clone(), TokenCeilings::default());

                for (activate, copies) in &script {
                    let ev = if *activate { activated(id, "cus_p") } else { cancelled("cus_p") };
                    once.apply(&ev).await.unwrap();
                    for _ in 0..*copies {
                        dup.apply(&ev).await.unwrap();
                    }
                }

                let a = once_users.get(id).await.unwrap().unwrap();
                let b = dup_users.get(id).await.unwrap().unwrap();
                assert_eq!((a.tier, a.token_budget, a.external_billing_id), (b.tier, b.token_budget, b.external_billing_id));
            });
        }
    }
}
