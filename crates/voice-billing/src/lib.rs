//! # voice-billing
//!
//! Subscription billing for the voice AI platform: plan catalog, Stripe
//! provisioning, hosted checkout and webhook-driven subscription records.
//!
//! ## Flow
//!
//! ```text
//! ┌─────────────┐  reconcile()   ┌──────────────────┐
//! │ PlanCatalog │───────────────▶│ ProvisionedPlans │  (startup, once)
//! └─────────────┘                └────────┬─────────┘
//!                                         │ read-only
//!                                         ▼
//! ┌─────────────┐  plan key      ┌──────────────────────┐     ┌───────────────┐
//! │   Browser   │───────────────▶│ CheckoutSessionBuilder│────▶│ Stripe hosted │
//! │  (pricing)  │◀── session id ─│                      │     │   checkout    │
//! └─────────────┘                └──────────────────────┘     └───────────────┘
//! ```
//!
//! Each plan is provisioned as one usage meter (voice minutes), one product,
//! one licensed base price and one metered overage price. Repeated runs reuse
//! what already exists.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use voice_billing::{
//!     reconcile, BillingConfig, CheckoutSessionBuilder, CheckoutSessionRequest,
//!     PlanCatalog, StripeBillingApi,
//! };
//!
//! let config = BillingConfig::from_env()?;
//! let api = Arc::new(StripeBillingApi::from_config(&config)?);
//! let catalog = Arc::new(PlanCatalog::default());
//!
//! let provisioned = reconcile(&catalog, api.as_ref()).await?;
//! let builder = CheckoutSessionBuilder::new(catalog, Arc::new(provisioned), api);
//!
//! let session = builder.create_checkout_session(&CheckoutSessionRequest::new(
//!     "essential",
//!     "https://example.com/dashboard",
//!     "https://example.com/pricing",
//! )).await?;
//! // Hand session.id to Stripe.js redirectToCheckout
//! ```

mod api;
mod catalog;
mod checkout;
mod config;
mod error;
mod memory;
mod reconcile;
mod stripe_api;
mod subscription;
mod webhook;

pub use api::{
    BillingApi, CheckoutSessionRef, LineItem, METER_VALUE_KEY, Metadata, Meter, MeterEvent, MeterStatus, NewCheckoutSession,
    NewMeter, NewPrice, NewProduct, Price, Product, Recurring, UsageType, metadata,
};
pub use catalog::{BillingInterval, CURRENCY, INTERVAL_COUNT, PlanCatalog, PlanDefinition};
pub use checkout::{CheckoutSessionBuilder, CheckoutSessionRequest};
pub use config::{BillingConfig, DEFAULT_API_BASE};
pub use error::{BillingError, Result};
pub use memory::{MemoryBillingApi, Operation};
pub use reconcile::{ProvisionedPlans, Reconciled, RemoteBillingRefs, find_or_create, reconcile};
pub use stripe_api::StripeBillingApi;
pub use subscription::{MemorySubscriptionStore, SubscriptionRecord, SubscriptionStore};
pub use webhook::{WebhookEvent, WebhookHandler};
