//! Payment integration: webhook reconciliation and the outbound provider client.

pub mod gateway;
pub mod reconciler;
pub mod service;

pub use gateway::{
    BillingGateway, CheckoutRequest, CheckoutSession, GatewayError, StripeConfig, StripeGateway,
    DEFAULT_STRIPE_API_BASE,
};
pub use reconciler::{EntitlementReconciler, ReconcileOutcome};
pub use service::{BillingService, PaymentConfig};
