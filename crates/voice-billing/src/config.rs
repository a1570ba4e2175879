//! Billing configuration

use crate::error::{BillingError, Result};

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

/// Stripe credentials and endpoint
#[derive(Clone, Debug)]
pub struct BillingConfig {
    /// Server-side secret key
    pub secret_key: String,

    /// Browser-side key; without it the client gateway cannot redirect
    pub publishable_key: Option<String>,

    /// Without it webhooks are rejected
    pub webhook_secret: Option<String>,

    pub api_base: String,
}

impl BillingConfig {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            publishable_key: None,
            webhook_secret: None,
            api_base: DEFAULT_API_BASE.into(),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| BillingError::Config("STRIPE_SECRET_KEY not set".into()))?;

        Ok(Self {
            secret_key,
            publishable_key: non_empty_var("STRIPE_PUBLISHABLE_KEY"),
            webhook_secret: non_empty_var("STRIPE_WEBHOOK_SECRET"),
            api_base: non_empty_var("STRIPE_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.into()),
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
