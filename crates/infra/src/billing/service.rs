use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use songsmith_billing::{ReceivedEvent, WebhookVerifier};
use songsmith_core::{DomainError, UserId};

use super::gateway::{BillingGateway, CheckoutRequest, CheckoutSession};
use super::reconciler::{EntitlementReconciler, ReconcileOutcome};
use crate::error::ServiceError;
use crate::repository::UserStore;

/// What the frontend needs to start a checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentConfig {
    pub publishable_key: Option<String>,
    pub enabled: bool,
}

/// Payment operations: inbound webhooks and outbound subscription management.
pub struct BillingService {
    users: Arc<dyn UserStore>,
    reconciler: Arc<EntitlementReconciler>,
    verifier: Option<WebhookVerifier>,
    gateway: Option<Arc<dyn BillingGateway>>,
    publishable_key: Option<String>,
}

impl BillingService {
    pub fn new(users: Arc<dyn UserStore>, reconciler: Arc<EntitlementReconciler>) -> Self {
        Self {
            users,
            reconciler,
            verifier: None,
            gateway: None,
            publishable_key: None,
        }
    }

    pub fn with_webhook_verifier(mut self, verifier: WebhookVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_gateway(
        mut self,
        gateway: Arc<dyn BillingGateway>,
        publishable_key: impl Into<String>,
    ) -> Self {
        self.gateway = Some(gateway);
        self.publishable_key = Some(publishable_key.into());
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.gateway.is_some()
    }

    pub fn reconciler(&self) -> &Arc<EntitlementReconciler> {
        &self.reconciler
    }

    pub fn config(&self) -> PaymentConfig {
        PaymentConfig {
            publishable_key: self.publishable_key.clone(),
            enabled: self.is_enabled(),
        }
    }

    /// Verify, parse, and apply one webhook delivery.
    ///
    /// Nothing is read from or written to the store unless the signature
    /// verifies.
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let verifier = self
            .verifier
            .as_ref()
            .ok_or_else(|| DomainError::configuration("payment webhooks are not configured"))?;
        verifier.verify(payload, signature, Utc::now())?;

        let event = ReceivedEvent::parse(payload)?;
        Ok(self.reconciler.apply(&event).await?)
    }

    pub async fn create_checkout_session(
        &self,
        user_id: UserId,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession, ServiceError> {
        let gateway = self.gateway()?;
        let user = self
            .users
            .get(user_id)
            .await?
            .ok_or_else(DomainError::not_found)?;
        if user.is_paid() {
            return Err(DomainError::conflict("user is already a paid subscriber").into());
        }

        let customer_id = match &user.external_billing_id {
            Some(id) => id.clone(),
            None => gateway.create_customer(&user.email, user.id).await?,
        };
        let session = gateway
            .create_checkout_session(CheckoutRequest {
                customer_id: &customer_id,
                user_id,
                success_url,
                cancel_url,
            })
            .await?;
        info!(user_id = %user_id, session_id = %session.id, "checkout session created");
        Ok(session)
    }

    /// Cancel at the provider. The entitlement change arrives later by webhook.
    pub async fn cancel_subscription(&self, user_id: UserId) -> Result<usize, ServiceError> {
        let gateway = self.gateway()?;
        let user = self
            .users
            .get(user_id)
            .await?
            .ok_or_else(DomainError::not_found)?;
        let customer_id = user
            .external_billing_id
            .ok_or_else(|| DomainError::conflict("user has no subscription"))?;

        let cancelled = gateway.cancel_subscriptions(&customer_id).await?;
        info!(user_id = %user_id, cancelled, "subscription cancellation requested");
        Ok(cancelled)
    }

    fn gateway(&self) -> Result<&Arc<dyn BillingGateway>, DomainError> {
        self.gateway
            .as_ref()
            .ok_or_else(|| DomainError::configuration("payment processing is not configured"))
    }
}
