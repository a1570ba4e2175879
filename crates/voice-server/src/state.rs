//! Application State

use std::sync::Arc;

use voice_billing::{CheckoutSessionBuilder, MemorySubscriptionStore, PlanCatalog};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Plan tiers, in display order
    pub catalog: Arc<PlanCatalog>,

    /// Checkout builder over the provisioned catalog (None if Stripe is not configured)
    pub checkout: Option<CheckoutSessionBuilder>,

    /// Subscription records maintained by the webhook
    pub subscriptions: Arc<MemorySubscriptionStore>,

    /// Handed to the browser for Stripe.js
    pub publishable_key: Option<String>,

    pub webhook_secret: Option<String>,

    /// Shared secret for usage reports (None disables /api/usage)
    pub usage_token: Option<String>,

    /// Public base URL used for checkout redirects
    pub app_url: String,
}
