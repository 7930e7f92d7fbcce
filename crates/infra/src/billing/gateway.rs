//! Outbound billing-provider client (Stripe REST API, form-encoded).

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use tracing::{debug, info};

use songsmith_core::UserId;

pub const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("billing provider unreachable: {0}")]
    Transport(String),
    #[error("billing provider returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("unexpected billing provider response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest<'a> {
    pub customer_id: &'a str,
    pub user_id: UserId,
    pub success_url: &'a str,
    pub cancel_url: &'a str,
}

/// Subscription management at the billing provider.
#[async_trait]
pub trait BillingGateway: Send + Sync {
    async fn create_customer(&self, email: &str, user_id: UserId) -> Result<String, GatewayError>;

    async fn create_checkout_session(
        &self,
        request: CheckoutRequest<'_>,
    ) -> Result<CheckoutSession, GatewayError>;

    /// Cancel every subscription of `customer_id`; returns how many were cancelled.
    async fn cancel_subscriptions(&self, customer_id: &str) -> Result<usize, GatewayError>;
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub price_id: String,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct StripeGateway {
    client: Client,
    config: StripeConfig,
}

#[derive(Deserialize)]
struct IdObject {
    id: String,
}

#[derive(Deserialize)]
struct SessionObject {
    id: String,
    url: Option<String>,
}

#[derive(Deserialize)]
struct SubscriptionList {
    data: Vec<IdObject>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl StripeGateway {
    pub fn new(mut config: StripeConfig) -> Self {
        config.api_base = config.api_base.trim_end_matches('/').to_string();
        Self {
            client: Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.api_base, path)
    }

    async fn decode<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, GatewayError> {
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorEnvelope>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message,
            });
        }
        serde_json::from_slice(&body).map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

fn transport(e: reqwest::Error) -> GatewayError {
    GatewayError::Transport(e.to_string())
}

#[async_trait]
impl BillingGateway for StripeGateway {
    async fn create_customer(&self, email: &str, user_id: UserId) -> Result<String, GatewayError> {
        let user_id = user_id.to_string();
        let response = self
            .client
            .post(self.url("customers"))
            .bearer_auth(&self.config.secret_key)
            .form(&[("email", email), ("metadata[user_id]", user_id.as_str())])
            .send()
            .await
            .map_err(transport)?;
        let customer: IdObject = Self::decode(response).await?;
        info!(customer_id = %customer.id, user_id = %user_id, "billing customer created");
        Ok(customer.id)
    }

    async fn create_checkout_session(
        &self,
        request: CheckoutRequest<'_>,
    ) -> Result<CheckoutSession, GatewayError> {
        let user_id = request.user_id.to_string();
        let form = [
            ("customer", request.customer_id),
            ("payment_method_types[0]", "card"),
            ("line_items[0][price]", self.config.price_id.as_str()),
            ("line_items[0][quantity]", "1"),
            ("mode", "subscription"),
            ("success_url", request.success_url),
            ("cancel_url", request.cancel_url),
            ("metadata[user_id]", user_id.as_str()),
        ];
        let response = self
            .client
            .post(self.url("checkout/sessions"))
            .bearer_auth(&self.config.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(transport)?;
        let session: SessionObject = Self::decode(response).await?;
        debug!(session_id = %session.id, "checkout session created");
        Ok(CheckoutSession {
            id: session.id,
            url: session.url,
        })
    }

    async fn cancel_subscriptions(&self, customer_id: &str) -> Result<usize, GatewayError> {
        let response = self
            .client
            .get(self.url("subscriptions"))
            .bearer_auth(&self.config.secret_key)
            .query(&[("customer", customer_id)])
            .send()
            .await
            .map_err(transport)?;
        let list: SubscriptionList = Self::decode(response).await?;

        for subscription in &list.data {
            let response = self
                .client
                .delete(self.url(&format!("subscriptions/{}", subscription.id)))
                .bearer_auth(&self.config.secret_key)
                .send()
                .await
                .map_err(transport)?;
            let _: IdObject = Self::decode(response).await?;
            info!(customer_id, subscription_id = %subscription.id, "subscription cancelled");
        }
        Ok(list.data.len())
    }
}
